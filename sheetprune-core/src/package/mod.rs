//! Package graph: locating workbook, worksheet and drawing parts

pub mod codec;
pub mod drawing;
pub mod relationships;
pub mod xml;

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{EditorError, Result};
use relationships::{
    OFFICE_DOCUMENT_REL_SUFFIX, STYLES_REL_SUFFIX, WORKSHEET_REL_SUFFIX, parse_relationships,
    rels_for_part,
};
use xml::XmlDocument;

pub use codec::{ArchiveCodec, ArchiveEntry, ZipCodec};

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";
const DEFAULT_STYLES_PART: &str = "xl/styles.xml";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Read access to package parts by name
pub trait PartReader {
    /// Raw bytes of `name`, or `None` when the part does not exist
    fn read_part(&mut self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Part content as UTF-8 text
    fn read_text(&mut self, name: &str) -> Result<Option<String>> {
        match self.read_part(name)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| EditorError::xml(name, e)),
            None => Ok(None),
        }
    }

    /// Parsed XML of `name`, or `None` when the part does not exist
    fn read_xml(&mut self, name: &str) -> Result<Option<XmlDocument>> {
        match self.read_text(name)? {
            Some(text) => XmlDocument::parse(&text, name).map(Some),
            None => Ok(None),
        }
    }
}

/// Parts read straight from a zip container
pub struct ZipParts {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl ZipParts {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            archive: codec::open_zip(path)?,
        })
    }
}

impl PartReader for ZipParts {
    fn read_part(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(EditorError::PackageOpen {
                    path: self.path.clone(),
                    message: format!("{name}: {e}"),
                });
            }
        };
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(Some(buffer))
    }
}

/// Parts read from an extracted scratch tree
pub struct DirParts {
    root: PathBuf,
}

impl DirParts {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        codec::member_path(&self.root, name)
    }
}

impl PartReader for DirParts {
    fn read_part(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_of(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A worksheet listed in the workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetPart {
    /// 0-based position in the workbook's sheet list
    pub index: usize,
    pub name: String,
    /// Worksheet part name, e.g. `xl/worksheets/sheet1.xml`
    pub part: String,
}

/// A drawing attached to a worksheet, with its relationship part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawingPart {
    pub drawing: String,
    pub rels: String,
}

/// Locate the workbook part through the package root relationships
pub fn workbook_part(parts: &mut impl PartReader) -> Result<String> {
    let Some(rels) = parts.read_text("_rels/.rels")? else {
        return Ok(DEFAULT_WORKBOOK_PART.to_string());
    };
    let target = parse_relationships(&rels, "_rels/.rels")?
        .into_iter()
        .find(|rel| rel.type_.ends_with(OFFICE_DOCUMENT_REL_SUFFIX))
        .and_then(|rel| rel.resolved_target(""));
    Ok(target.unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string()))
}

/// Locate the workbook's styles part
pub fn styles_part(parts: &mut impl PartReader) -> Result<String> {
    let workbook = workbook_part(parts)?;
    let rels_part = rels_for_part(&workbook);
    let Some(rels) = parts.read_text(&rels_part)? else {
        return Ok(DEFAULT_STYLES_PART.to_string());
    };
    let target = parse_relationships(&rels, &rels_part)?
        .into_iter()
        .find(|rel| rel.type_.ends_with(STYLES_REL_SUFFIX))
        .and_then(|rel| rel.resolved_target(&workbook));
    Ok(target.unwrap_or_else(|| DEFAULT_STYLES_PART.to_string()))
}

/// List the worksheets in workbook order, resolving each to its part
pub fn workbook_sheets(parts: &mut impl PartReader) -> Result<Vec<SheetPart>> {
    let workbook = workbook_part(parts)?;
    let doc = parts
        .read_xml(&workbook)?
        .ok_or_else(|| EditorError::xml(&workbook, "workbook part is missing"))?;

    let rels_part = rels_for_part(&workbook);
    let rels = match parts.read_text(&rels_part)? {
        Some(text) => parse_relationships(&text, &rels_part)?,
        None => Vec::new(),
    };

    let Some(sheets) = doc.root.child("sheets") else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for (index, sheet) in sheets.elements().filter(|el| el.is("sheet")).enumerate() {
        let name = sheet.attribute("name").unwrap_or_default();
        let part = sheet
            .attribute("id")
            .and_then(|rid| rels.iter().find(|rel| rel.id == rid))
            .filter(|rel| rel.type_.ends_with(WORKSHEET_REL_SUFFIX))
            .and_then(|rel| rel.resolved_target(&workbook));

        match part {
            Some(part) => out.push(SheetPart { index, name, part }),
            // Chart sheets and dialog sheets have no cells to anchor to
            None => debug!(sheet = %name, "sheet is not a worksheet, skipping"),
        }
    }

    Ok(out)
}

/// Drawings attached to `sheet_part`. Empty when the sheet has none.
pub fn sheet_drawings(parts: &mut impl PartReader, sheet_part: &str) -> Result<Vec<DrawingPart>> {
    let rels_part = rels_for_part(sheet_part);
    let Some(text) = parts.read_text(&rels_part)? else {
        return Ok(Vec::new());
    };

    Ok(parse_relationships(&text, &rels_part)?
        .into_iter()
        .filter(|rel| rel.is_drawing())
        .filter_map(|rel| rel.resolved_target(sheet_part))
        .map(|drawing| DrawingPart {
            rels: rels_for_part(&drawing),
            drawing,
        })
        .collect())
}
