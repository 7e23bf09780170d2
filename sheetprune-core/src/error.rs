//! Error types shared by the reader, model and writer layers

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::address::CellCoordinate;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EditorError>;

/// Errors raised while loading, editing or saving a package
#[derive(Debug, Error)]
pub enum EditorError {
    /// The source is unreadable or is not a valid package
    #[error("failed to open package {}: {message}", path.display())]
    PackageOpen { path: PathBuf, message: String },

    /// The requested sheet name is absent from the workbook
    #[error("sheet '{0}' not found in workbook")]
    SheetNotFound(String),

    /// Scratch unpack failed or produced no usable directory
    #[error("failed to extract {}: {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    /// One picture's bytes are malformed. Recovered locally during scans.
    #[error("picture {part} could not be decoded: {message}")]
    ImageDecode { part: String, message: String },

    /// A package part holds malformed XML
    #[error("malformed XML in {part}: {message}")]
    XmlParse { part: String, message: String },

    /// Archive re-assembly failed
    #[error("failed to repack {}: {message}", path.display())]
    Repack { path: PathBuf, message: String },

    /// Copy to the output directory failed
    #[error("failed to stage copy at {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The cell read/write primitive rejected an operation
    #[error("cell store error: {0}")]
    CellStore(String),

    /// No entry is anchored at the given cell
    #[error("no picture entry at {0}")]
    UnknownEntry(CellCoordinate),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A scan was cancelled before completion
    #[error("scan cancelled")]
    Cancelled,

    /// A save pipeline stage failed
    #[error("save failed during {stage} stage: {source}")]
    Save {
        stage: SaveStage,
        #[source]
        source: Box<EditorError>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EditorError {
    pub(crate) fn xml(part: &str, err: impl fmt::Display) -> Self {
        EditorError::XmlParse {
            part: part.to_string(),
            message: err.to_string(),
        }
    }

    /// The save stage that failed, if this is a save error
    pub fn stage(&self) -> Option<SaveStage> {
        match self {
            EditorError::Save { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Wrap into a save error for `stage`. Already staged errors keep their stage.
    pub fn at_stage(self, stage: SaveStage) -> Self {
        match self {
            err @ EditorError::Save { .. } => err,
            other => EditorError::Save {
                stage,
                source: Box::new(other),
            },
        }
    }
}

/// Phases of the save pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SaveStage {
    /// Copy of the source into the output directory
    Stage,
    /// Opening handles on the staged copy
    Reopen,
    /// Description-cell recolouring
    Annotate,
    /// Clearing description cells of deleted entries
    WriteBack,
    /// Unpacking the staged archive into a scratch tree
    Extract,
    /// Drawing/relationship edits and orphaned media removal
    Surgery,
    Repack,
    /// Reopening handles on the finalized package
    Finalize,
}

impl fmt::Display for SaveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveStage::Stage => "stage",
            SaveStage::Reopen => "reopen",
            SaveStage::Annotate => "annotate",
            SaveStage::WriteBack => "write-back",
            SaveStage::Extract => "extract",
            SaveStage::Surgery => "surgery",
            SaveStage::Repack => "repack",
            SaveStage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Attach a save stage to the error side of a result
pub(crate) trait StageExt<T> {
    fn stage(self, stage: SaveStage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: SaveStage) -> Result<T> {
        self.map_err(|err| err.at_stage(stage))
    }
}
