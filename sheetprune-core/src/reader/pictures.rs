//! Picture index: every picture anchored to a worksheet, keyed by origin cell

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, ImageReader};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::address::CellCoordinate;
use crate::error::{EditorError, Result};
use crate::package::drawing::{AnchorInfo, anchor_info};
use crate::package::relationships::{Relationship, parse_relationships};
use crate::package::{PartReader, SheetPart, ZipParts, sheet_drawings, workbook_sheets};
use crate::progress::{CancelToken, Progress};

/// Recognised picture encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    WebP,
    /// Windows metafiles are kept but never decoded
    Emf,
    Wmf,
}

impl ImageKind {
    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Gif => Some(ImageKind::Gif),
            ImageFormat::Bmp => Some(ImageKind::Bmp),
            ImageFormat::Tiff => Some(ImageKind::Tiff),
            ImageFormat::WebP => Some(ImageKind::WebP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
            ImageKind::Gif => "gif",
            ImageKind::Bmp => "bmp",
            ImageKind::Tiff => "tiff",
            ImageKind::WebP => "webp",
            ImageKind::Emf => "emf",
            ImageKind::Wmf => "wmf",
        }
    }
}

/// Raw picture bytes plus what could be learned from their header.
///
/// `bytes` is empty when the media part is missing or malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub kind: Option<ImageKind>,
    /// Pixel size, for raster formats
    pub dimensions: Option<(u32, u32)>,
}

impl ImagePayload {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One anchored picture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureRecord {
    /// Top-left cell of the anchor, 1-based
    pub coordinate: CellCoordinate,
    /// Relationship id referenced by the anchor's image fill
    pub relationship_id: String,
    /// Resolved media part, e.g. `xl/media/image1.png`; empty when unresolvable
    pub media_path: String,
    pub image: ImagePayload,
}

/// A recovered, per-picture problem found while scanning
#[derive(Debug)]
pub struct LoadWarning {
    pub coordinate: CellCoordinate,
    pub error: EditorError,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Sorted by (row, col)
    pub records: Vec<PictureRecord>,
    pub warnings: Vec<LoadWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub cancel: CancelToken,
    /// Worker threads for payload inspection; 0 uses rayon's global pool
    pub threads: usize,
}

/// Handle over a package's worksheets and their drawings.
///
/// The archive is only held open for the duration of a scan.
#[derive(Debug, Clone)]
pub struct PictureIndex {
    path: PathBuf,
    sheets: Vec<SheetPart>,
}

struct RawPicture {
    coordinate: CellCoordinate,
    relationship_id: String,
    media_path: String,
    /// Part named in a warning when the payload cannot be used
    part: String,
    /// Media bytes, or why there are none
    bytes: std::result::Result<Vec<u8>, String>,
}

impl PictureIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let mut parts = ZipParts::open(path)?;
        let sheets = workbook_sheets(&mut parts).map_err(|e| EditorError::PackageOpen {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), sheets = sheets.len(), "opened picture index");
        Ok(Self {
            path: path.to_path_buf(),
            sheets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheets(&self) -> &[SheetPart] {
        &self.sheets
    }

    /// Index of the sheet named exactly `name`
    pub fn sheet_index(&self, name: &str) -> Result<usize> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name == name)
            .map(|sheet| sheet.index)
            .ok_or_else(|| EditorError::SheetNotFound(name.to_string()))
    }

    fn sheet(&self, index: usize) -> Result<&SheetPart> {
        self.sheets
            .iter()
            .find(|sheet| sheet.index == index)
            .ok_or_else(|| EditorError::SheetNotFound(format!("#{index}")))
    }

    /// Every picture anchored to the sheet, sorted by (row, col).
    ///
    /// A picture whose media is missing or undecodable is still returned, with
    /// an empty payload and a matching warning.
    pub fn scan(
        &self,
        sheet_index: usize,
        options: &ScanOptions,
        progress: &mut dyn Progress,
    ) -> Result<ScanOutcome> {
        let sheet = self.sheet(sheet_index)?;
        let mut parts = ZipParts::open(&self.path)?;

        let mut drawings: Vec<(String, Vec<Relationship>)> = Vec::new();
        let mut anchors: Vec<(usize, CellCoordinate, AnchorInfo)> = Vec::new();
        for drawing in sheet_drawings(&mut parts, &sheet.part)? {
            let Some(doc) = parts.read_xml(&drawing.drawing)? else {
                warn!(part = %drawing.drawing, "drawing referenced by sheet is missing");
                continue;
            };
            let rels = match parts.read_text(&drawing.rels)? {
                Some(text) => parse_relationships(&text, &drawing.rels)?,
                None => Vec::new(),
            };
            let slot = drawings.len();
            for info in doc.root.elements().filter_map(anchor_info) {
                if !info.is_picture {
                    continue;
                }
                match info.origin {
                    Some(origin) => anchors.push((slot, origin, info)),
                    None if info.absolute => {}
                    None => {
                        warn!(part = %drawing.drawing, "picture anchor outside the worksheet grid, skipping")
                    }
                }
            }
            drawings.push((drawing.drawing, rels));
        }

        let total = anchors.len();
        let mut raw = Vec::with_capacity(total);
        for (done, (slot, coordinate, info)) in anchors.into_iter().enumerate() {
            if options.cancel.is_cancelled() {
                return Err(EditorError::Cancelled);
            }
            progress.progress(done + 1, total);

            let (drawing, rels) = &drawings[slot];
            let Some(relationship_id) = info.embeds.into_iter().next() else {
                // Linked pictures keep their entry but carry no payload
                let (relationship_id, message) = match info.links.into_iter().next() {
                    Some(id) => (id, "picture is linked to an external file, not embedded"),
                    None => (String::new(), "picture has no image reference"),
                };
                let part = rels
                    .iter()
                    .find(|rel| rel.id == relationship_id)
                    .map(|rel| rel.target.clone())
                    .unwrap_or_else(|| drawing.clone());
                raw.push(RawPicture {
                    coordinate,
                    relationship_id,
                    media_path: String::new(),
                    part,
                    bytes: Err(message.to_string()),
                });
                continue;
            };

            let media_path = rels
                .iter()
                .find(|rel| rel.id == relationship_id)
                .and_then(|rel| rel.resolved_target(drawing))
                .unwrap_or_default();
            let bytes = if media_path.is_empty() {
                Err(format!("relationship {relationship_id} does not name a media part"))
            } else {
                match parts.read_part(&media_path) {
                    Ok(Some(bytes)) => Ok(bytes),
                    Ok(None) => Err("media part is missing from the package".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            };

            raw.push(RawPicture {
                coordinate,
                relationship_id: relationship_id.clone(),
                part: if media_path.is_empty() {
                    relationship_id
                } else {
                    media_path.clone()
                },
                media_path,
                bytes,
            });
        }

        let inspected: Vec<(PictureRecord, Option<LoadWarning>)> = if options.threads == 0 {
            raw.into_par_iter().map(inspect_picture).collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(options.threads)
                .build()
            {
                Ok(pool) => pool.install(|| raw.into_par_iter().map(inspect_picture).collect()),
                Err(e) => {
                    warn!(error = %e, "could not build scan pool, using global pool");
                    raw.into_par_iter().map(inspect_picture).collect()
                }
            }
        };

        if options.cancel.is_cancelled() {
            return Err(EditorError::Cancelled);
        }

        let mut outcome = ScanOutcome::default();
        for (record, warning) in inspected {
            if let Some(warning) = warning {
                warn!(cell = %warning.coordinate, error = %warning.error, "picture payload dropped");
                outcome.warnings.push(warning);
            }
            outcome.records.push(record);
        }
        // Parallel completion order is not stable
        outcome
            .records
            .sort_by_key(|r| (r.coordinate, r.relationship_id.clone()));
        outcome.warnings.sort_by_key(|w| w.coordinate);

        debug!(sheet = %sheet.name, pictures = outcome.records.len(), "scanned sheet");
        Ok(outcome)
    }
}

fn inspect_picture(raw: RawPicture) -> (PictureRecord, Option<LoadWarning>) {
    let (image, failure) = match raw.bytes {
        Err(message) => (ImagePayload::default(), Some(message)),
        Ok(bytes) => match inspect_bytes(&bytes) {
            Ok((kind, dimensions)) => (
                ImagePayload {
                    bytes,
                    kind: Some(kind),
                    dimensions,
                },
                None,
            ),
            Err(message) => (ImagePayload::default(), Some(message)),
        },
    };

    let warning = failure.map(|message| LoadWarning {
        coordinate: raw.coordinate,
        error: EditorError::ImageDecode {
            part: raw.part,
            message,
        },
    });

    (
        PictureRecord {
            coordinate: raw.coordinate,
            relationship_id: raw.relationship_id,
            media_path: raw.media_path,
            image,
        },
        warning,
    )
}

/// Identify the payload and read its pixel size without decoding pixels
pub fn inspect_bytes(bytes: &[u8]) -> std::result::Result<(ImageKind, Option<(u32, u32)>), String> {
    if bytes.is_empty() {
        return Err("payload is empty".to_string());
    }
    if let Some(kind) = sniff_metafile(bytes) {
        return Ok((kind, None));
    }

    let format = image::guess_format(bytes).map_err(|e| e.to_string())?;
    let kind = ImageKind::from_format(format)
        .ok_or_else(|| format!("unsupported picture format {format:?}"))?;
    let dimensions = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| e.to_string())?;
    Ok((kind, Some(dimensions)))
}

fn sniff_metafile(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.len() >= 44 && bytes[..4] == [1, 0, 0, 0] && &bytes[40..44] == b" EMF" {
        return Some(ImageKind::Emf);
    }
    if bytes.starts_with(&[0xD7, 0xCD, 0xC6, 0x9A])
        || bytes.starts_with(&[1, 0, 9, 0])
        || bytes.starts_with(&[2, 0, 9, 0])
    {
        return Some(ImageKind::Wmf);
    }
    None
}
