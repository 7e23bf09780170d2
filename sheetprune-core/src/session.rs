//! Editing session: one package, one sheet, one range

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::address::{CellCoordinate, RangeAddress};
use crate::config::EditorConfig;
use crate::error::Result;
use crate::model::{EntryModel, Selection, Toggle};
use crate::package::{ArchiveCodec, ZipCodec};
use crate::progress::{CancelToken, NoProgress, Progress};
use crate::reader::{LoadWarning, ScanOptions};
use crate::writer::{PackageHandles, SaveEngine, SaveMode, SaveReport};

/// Load, toggle and save against a single source package.
///
/// Saves always stage from the untouched source, so the saved artifact reflects
/// the full set of deleted entries rather than a delta on a previous save.
pub struct EditorSession<C: ArchiveCodec = ZipCodec> {
    source: PathBuf,
    /// File the open handles point at: the source, or the last saved copy
    active: PathBuf,
    sheet_name: String,
    sheet_index: usize,
    range: RangeAddress,
    mode: SaveMode,
    engine: SaveEngine<C>,
    handles: PackageHandles,
    model: EntryModel,
    warnings: Vec<LoadWarning>,
}

impl EditorSession<ZipCodec> {
    pub fn open(
        source: &Path,
        sheet_name: &str,
        range: &str,
        mode: SaveMode,
        config: EditorConfig,
    ) -> Result<Self> {
        Self::with_codec(source, sheet_name, range, mode, config, ZipCodec)
    }
}

impl<C: ArchiveCodec> EditorSession<C> {
    /// Open handles on `source`. Call [`EditorSession::load`] to scan pictures.
    pub fn with_codec(
        source: &Path,
        sheet_name: &str,
        range: &str,
        mode: SaveMode,
        config: EditorConfig,
        codec: C,
    ) -> Result<Self> {
        config.validate()?;
        let handles = PackageHandles::open(source, sheet_name)?;
        let sheet_index = handles.pictures.sheet_index(sheet_name)?;
        let range = RangeAddress::parse(range);
        if range.is_empty() {
            warn!(range = %range, "range is empty or malformed, no entries will load");
        }

        Ok(Self {
            source: source.to_path_buf(),
            active: source.to_path_buf(),
            sheet_name: sheet_name.to_string(),
            sheet_index,
            range,
            mode,
            engine: SaveEngine::new(config, codec),
            handles,
            model: EntryModel::default(),
            warnings: Vec::new(),
        })
    }

    /// Scan the source sheet and rebuild the model from pictures inside the range.
    ///
    /// The source is scanned even after a save, since saves restage from it.
    /// On error (including cancellation) the current model is left as it was.
    pub fn load(&mut self, cancel: &CancelToken, progress: &mut dyn Progress) -> Result<&EntryModel> {
        let options = ScanOptions {
            cancel: cancel.clone(),
            threads: self.engine.config().scan_threads,
        };
        let reopened;
        let source = if self.active == self.source {
            &self.handles
        } else {
            reopened = PackageHandles::open(&self.source, &self.sheet_name)?;
            &reopened
        };
        let outcome = source.pictures.scan(self.sheet_index, &options, progress)?;

        let range = self.range;
        self.warnings = outcome
            .warnings
            .into_iter()
            .filter(|warning| range.contains(warning.coordinate))
            .collect();
        let model = EntryModel::load(outcome.records, range, &source.cells);
        self.model = model;
        info!(
            sheet = %self.sheet_name,
            range = %range,
            entries = self.model.len(),
            warnings = self.warnings.len(),
            "loaded entries"
        );
        Ok(&self.model)
    }

    pub fn model(&self) -> &EntryModel {
        &self.model
    }

    /// Per-picture problems found by the last load
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    pub fn toggle_deleted(&mut self, cell: CellCoordinate) -> Result<Toggle> {
        self.model.toggle_deleted(cell)
    }

    pub fn set_deleted_bulk(&mut self, selection: &Selection, deleted: bool) -> Vec<CellCoordinate> {
        self.model.set_deleted_bulk(selection, deleted)
    }

    /// Stage, edit and finalize a copy of the source.
    ///
    /// The dirty set is cleared only when every stage succeeds.
    pub fn save(&mut self, progress: &mut dyn Progress) -> Result<SaveReport> {
        let result = self
            .engine
            .save(&self.source, &self.sheet_name, &self.model, self.mode, progress);

        match result {
            Ok((report, handles)) => {
                self.handles = handles;
                self.active = report.path.clone();
                self.model.clear_dirty();
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "save failed, source left untouched");
                // Handles on a previously saved copy may now see a half-edited file
                if self.active != self.source {
                    match PackageHandles::open(&self.source, &self.sheet_name) {
                        Ok(handles) => {
                            self.handles = handles;
                            self.active = self.source.clone();
                        }
                        Err(reopen) => warn!(error = %reopen, "could not reopen source"),
                    }
                }
                Err(err)
            }
        }
    }

    /// Save without progress reporting
    pub fn save_quiet(&mut self) -> Result<SaveReport> {
        self.save(&mut NoProgress)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn active_path(&self) -> &Path {
        &self.active
    }

    pub fn staged_path(&self) -> Result<PathBuf> {
        self.engine.staged_path(&self.source)
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn range(&self) -> RangeAddress {
        self.range
    }

    pub fn mode(&self) -> SaveMode {
        self.mode
    }
}
