//! Save pipeline: stage a copy, then annotate it or purge pictures from it

pub mod surgeon;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::CellCoordinate;
use crate::config::EditorConfig;
use crate::error::{EditorError, Result, SaveStage, StageExt};
use crate::model::{Entry, EntryModel};
use crate::package::relationships::parse_relationships;
use crate::package::{
    ArchiveCodec, CONTENT_TYPES_PART, DirParts, PartReader, SheetPart, ZipCodec, sheet_drawings,
};
use crate::progress::Progress;
use crate::reader::{CellStore, CellStyle, PictureIndex, XlsxCellStore};
use surgeon::{SurgeryOutcome, remove_deleted};

/// How deleted entries are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Recolour description cells, keep every picture
    Annotate,
    /// Remove pictures, their relationships and orphaned media
    Purge,
}

/// Outcome of a successful save
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// The staged copy that now holds the result
    pub path: PathBuf,
    pub mode: SaveMode,
    pub removed_anchors: Vec<CellCoordinate>,
    pub removed_relationships: Vec<String>,
    pub removed_media: Vec<String>,
}

impl SaveReport {
    fn new(path: PathBuf, mode: SaveMode) -> Self {
        Self {
            path,
            mode,
            removed_anchors: Vec::new(),
            removed_relationships: Vec::new(),
            removed_media: Vec::new(),
        }
    }
}

/// Cell-store and picture-index handles over one package file
pub struct PackageHandles {
    pub cells: XlsxCellStore,
    pub pictures: PictureIndex,
}

impl PackageHandles {
    pub fn open(path: &Path, sheet_name: &str) -> Result<Self> {
        let pictures = PictureIndex::open(path)?;
        pictures.sheet_index(sheet_name)?;
        let cells = XlsxCellStore::open(path, sheet_name)?;
        Ok(Self { cells, pictures })
    }

    pub fn path(&self) -> &Path {
        self.pictures.path()
    }

    fn sheet(&self, sheet_name: &str) -> Result<SheetPart> {
        self.pictures
            .sheets()
            .iter()
            .find(|sheet| sheet.name == sheet_name)
            .cloned()
            .ok_or_else(|| EditorError::SheetNotFound(sheet_name.to_string()))
    }
}

/// Runs the stage → reopen → annotate/purge → finalize pipeline
pub struct SaveEngine<C: ArchiveCodec = ZipCodec> {
    config: EditorConfig,
    codec: C,
}

impl<C: ArchiveCodec> SaveEngine<C> {
    pub fn new(config: EditorConfig, codec: C) -> Self {
        Self { config, codec }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// `<source dir>/<output_dir>/<source file name>`
    pub fn staged_path(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source.file_name().ok_or_else(|| EditorError::Staging {
            path: source.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"),
        })?;
        let dir = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok(dir.join(&self.config.output_dir).join(file_name))
    }

    /// Persist `model` into a staged copy of `source`.
    ///
    /// `source` is only ever read. On success the returned handles are open on
    /// the staged copy; on failure the staged copy is disposable.
    pub fn save(
        &self,
        source: &Path,
        sheet_name: &str,
        model: &EntryModel,
        mode: SaveMode,
        progress: &mut dyn Progress,
    ) -> Result<(SaveReport, PackageHandles)> {
        let total = match mode {
            SaveMode::Annotate => 4,
            SaveMode::Purge => 8,
        };
        let mut steps = Steps {
            done: 0,
            total,
            enabled: self.config.report_progress,
            progress,
        };

        let staged = self.stage(source).stage(SaveStage::Stage)?;
        info!(source = %source.display(), staged = %staged.display(), ?mode, "staged copy");
        steps.advance();

        let handles = PackageHandles::open(&staged, sheet_name).stage(SaveStage::Reopen)?;
        steps.advance();

        let (report, handles) = match mode {
            SaveMode::Annotate => {
                let handles = self.annotate(handles, model).stage(SaveStage::Annotate)?;
                steps.advance();
                info!(path = %staged.display(), "annotated package saved");
                (SaveReport::new(staged, mode), handles)
            }
            SaveMode::Purge => self.purge(handles, sheet_name, model, staged, &mut steps)?,
        };
        steps.advance();
        Ok((report, handles))
    }

    fn stage(&self, source: &Path) -> Result<PathBuf> {
        let staged = self.staged_path(source)?;
        if let Some(dir) = staged.parent() {
            fs::create_dir_all(dir).map_err(|e| staging_error(dir, e))?;
        }
        fs::copy(source, &staged).map_err(|e| staging_error(&staged, e))?;
        Ok(staged)
    }

    fn annotate(&self, mut handles: PackageHandles, model: &EntryModel) -> Result<PackageHandles> {
        let marker = self.config.marker_argb()?;
        for entry in model.entries() {
            let Some(cell) = entry.description_cell() else {
                continue;
            };
            let style = if entry.deleted {
                CellStyle::filled(&marker)
            } else {
                CellStyle::default()
            };
            handles.cells.set_cell_style(cell, &style)?;
        }
        handles.cells.save()?;
        Ok(handles)
    }

    fn purge(
        &self,
        mut handles: PackageHandles,
        sheet_name: &str,
        model: &EntryModel,
        staged: PathBuf,
        steps: &mut Steps<'_>,
    ) -> Result<(SaveReport, PackageHandles)> {
        let deleted = model.deleted_coordinates();
        let sheet = handles.sheet(sheet_name).stage(SaveStage::WriteBack)?;

        write_back(&mut handles.cells, model).stage(SaveStage::WriteBack)?;
        // The raw archive edit below must not race the cell store
        drop(handles);
        steps.advance();

        let mut report = SaveReport::new(staged.clone(), SaveMode::Purge);
        if deleted.is_empty() {
            steps.skip(3);
        } else {
            let scratch = tempfile::tempdir()
                .map_err(|e| EditorError::Extraction {
                    path: staged.clone(),
                    message: e.to_string(),
                })
                .stage(SaveStage::Extract)?;
            let entries = self
                .codec
                .unpack(&staged, scratch.path())
                .stage(SaveStage::Extract)?;
            steps.advance();

            let outcomes = operate(scratch.path(), &sheet, &deleted).stage(SaveStage::Surgery)?;
            steps.advance();

            if outcomes.iter().any(|outcome| !outcome.is_empty()) {
                // The scratch tree goes away whether or not the pack succeeds
                let packed = self.codec.pack(scratch.path(), &entries, &staged);
                drop(scratch);
                packed.stage(SaveStage::Repack)?;
            } else {
                debug!(path = %staged.display(), "no anchors matched, archive left as is");
            }
            steps.advance();

            for outcome in outcomes {
                report.removed_anchors.extend(outcome.removed_anchors);
                report.removed_relationships.extend(outcome.removed_relationships);
                report.removed_media.extend(outcome.orphaned_media);
            }
            report.removed_anchors.sort();
        }

        let handles = PackageHandles::open(&staged, sheet_name).stage(SaveStage::Finalize)?;
        steps.advance();
        info!(
            path = %staged.display(),
            anchors = report.removed_anchors.len(),
            media = report.removed_media.len(),
            "purged package saved"
        );
        Ok((report, handles))
    }
}

/// Save progress, reported per completed stage
struct Steps<'a> {
    done: usize,
    total: usize,
    enabled: bool,
    progress: &'a mut dyn Progress,
}

impl Steps<'_> {
    fn advance(&mut self) {
        self.skip(1);
    }

    fn skip(&mut self, count: usize) {
        self.done = (self.done + count).min(self.total);
        if self.enabled {
            self.progress.progress(self.done, self.total);
        }
    }
}

fn staging_error(path: &Path, source: io::Error) -> EditorError {
    EditorError::Staging {
        path: path.to_path_buf(),
        source,
    }
}

/// Blank the description cells of deleted entries
fn write_back(cells: &mut XlsxCellStore, model: &EntryModel) -> Result<()> {
    for cell in model.deleted().filter_map(Entry::description_cell) {
        cells.clear_cell_value(cell)?;
        cells.set_cell_style(cell, &CellStyle::default())?;
    }
    cells.save()
}

/// Edit every drawing of `sheet` inside the extracted tree at `root`.
///
/// A sheet without drawings yields no outcomes and no file is touched.
fn operate(
    root: &Path,
    sheet: &SheetPart,
    deleted: &BTreeSet<CellCoordinate>,
) -> Result<Vec<SurgeryOutcome>> {
    let mut parts = DirParts::new(root);
    let drawings = sheet_drawings(&mut parts, &sheet.part)?;
    if drawings.is_empty() {
        debug!(sheet = %sheet.name, "sheet has no drawings, nothing to remove");
        return Ok(Vec::new());
    }

    let mut outcomes = Vec::new();
    for drawing in drawings {
        let Some(mut drawing_doc) = parts.read_xml(&drawing.drawing)? else {
            warn!(part = %drawing.drawing, "drawing referenced by sheet is missing");
            continue;
        };
        let mut rels_doc = parts.read_xml(&drawing.rels)?;

        let mut outcome = remove_deleted(&mut drawing_doc, rels_doc.as_mut(), &drawing.drawing, deleted);
        if outcome.is_empty() {
            continue;
        }

        fs::write(parts.path_of(&drawing.drawing), drawing_doc.to_xml()?)?;
        if let Some(rels_doc) = &rels_doc {
            fs::write(parts.path_of(&drawing.rels), rels_doc.to_xml()?)?;
        }

        // Other parts (another sheet's drawing, say) may still use the media
        let elsewhere = referenced_elsewhere(root, &drawing.rels)?;
        outcome.orphaned_media.retain(|media| !elsewhere.contains(media));
        for media in &outcome.orphaned_media {
            let path = parts.path_of(media);
            match fs::remove_file(&path) {
                Ok(()) => debug!(part = %media, "removed orphaned media"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(part = %media, "orphaned media already absent")
                }
                Err(e) => return Err(e.into()),
            }
        }
        remove_content_type_overrides(&mut parts, &outcome.orphaned_media)?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Targets of every relationship in the tree, except those in `skip_rels`
fn referenced_elsewhere(root: &Path, skip_rels: &str) -> Result<BTreeSet<String>> {
    let mut rels_files = Vec::new();
    collect_rels(root, root, &mut rels_files)?;

    let mut targets = BTreeSet::new();
    for part in rels_files.into_iter().filter(|part| part != skip_rels) {
        let text = fs::read_to_string(crate::package::codec::member_path(root, &part))?;
        let source = source_part_of(&part);
        for rel in parse_relationships(&text, &part)? {
            targets.extend(rel.resolved_target(&source));
        }
    }
    Ok(targets)
}

fn collect_rels(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_rels(root, &path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rels") {
            if let Ok(relative) = path.strip_prefix(root) {
                let name: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(name.join("/"));
            }
        }
    }
    Ok(())
}

/// `xl/drawings/_rels/drawing1.xml.rels` → `xl/drawings/drawing1.xml`
fn source_part_of(rels_part: &str) -> String {
    let (dir, file) = rels_part.rsplit_once('/').unwrap_or(("", rels_part));
    let file = file.strip_suffix(".rels").unwrap_or(file);
    let dir = dir.strip_suffix("_rels").unwrap_or(dir).trim_end_matches('/');
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{dir}/{file}")
    }
}

fn remove_content_type_overrides(parts: &mut DirParts, removed: &BTreeSet<String>) -> Result<()> {
    if removed.is_empty() {
        return Ok(());
    }
    let Some(mut doc) = parts.read_xml(CONTENT_TYPES_PART)? else {
        return Ok(());
    };
    let before = doc.root.element_count();
    doc.root.retain_elements(|el| {
        !(el.is("Override")
            && el
                .attribute("PartName")
                .is_some_and(|name| removed.contains(name.trim_start_matches('/'))))
    });
    if doc.root.element_count() != before {
        fs::write(parts.path_of(CONTENT_TYPES_PART), doc.to_xml()?)?;
    }
    Ok(())
}
