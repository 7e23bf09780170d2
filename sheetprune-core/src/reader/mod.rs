//! Read side of a package: the picture index and the cell store

pub mod cells;
pub mod pictures;
pub mod styles;

pub use cells::{CellStore, CellStyle, XlsxCellStore};
pub use pictures::{
    ImageKind, ImagePayload, LoadWarning, PictureIndex, PictureRecord, ScanOptions, ScanOutcome,
};
