//! sheetprune-core: review and prune cell-anchored pictures in XLSX packages
//!
//! A session indexes the pictures anchored to one worksheet, pairs each with
//! the description held in the cell below it, and saves the operator's
//! decisions into a staged copy of the package. Saving either recolours
//! description cells ([`SaveMode::Annotate`]) or removes the pictures, their
//! relationships and orphaned media ([`SaveMode::Purge`]).

pub mod address;
pub mod config;
pub mod error;
pub mod model;
pub mod package;
pub mod progress;
pub mod reader;
pub mod session;
pub mod writer;

pub use address::{CellCoordinate, RangeAddress, col_to_num, num_to_col};
pub use config::EditorConfig;
pub use error::{EditorError, Result, SaveStage};
pub use model::{Entry, EntryModel, Selection, Toggle};
pub use package::{ArchiveCodec, ArchiveEntry, ZipCodec};
pub use progress::{CancelToken, NoProgress, Progress};
pub use reader::{
    CellStore, CellStyle, ImageKind, LoadWarning, PictureIndex, PictureRecord, XlsxCellStore,
};
pub use session::EditorSession;
pub use writer::{PackageHandles, SaveEngine, SaveMode, SaveReport};
