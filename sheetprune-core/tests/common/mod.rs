//! Minimal XLSX fixtures built in a temp directory
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{ImageBuffer, ImageFormat, Rgba};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// A picture anchored at a 0-based (row, col), pointing at relationship `rid`
pub struct Anchor {
    pub row0: u32,
    pub col0: u32,
    pub rid: &'static str,
}

/// Description of the "Photos" sheet; "Plain" never has a drawing
pub struct Book {
    pub anchors: Vec<Anchor>,
    /// Drawing relationships: (id, file name under xl/media)
    pub image_rels: Vec<(&'static str, &'static str)>,
    /// Media files actually stored in the package
    pub media: Vec<(&'static str, Vec<u8>)>,
    /// Text cells on the Photos sheet
    pub cells: Vec<(&'static str, &'static str)>,
    /// Pictures linked to an external file through `r:link`
    pub linked: Vec<Anchor>,
    /// External image relationships: (id, URL)
    pub external_rels: Vec<(&'static str, &'static str)>,
    /// Prefix bound to the relationships namespace on each blip
    pub rel_prefix: &'static str,
    /// Written verbatim instead of the generated drawing
    pub drawing_xml: Option<String>,
}

impl Book {
    /// Pictures at B7, C7 and B12 with descriptions below each
    pub fn standard() -> Self {
        Self {
            anchors: vec![
                Anchor { row0: 6, col0: 1, rid: "rId1" },
                Anchor { row0: 6, col0: 2, rid: "rId2" },
                Anchor { row0: 11, col0: 1, rid: "rId3" },
            ],
            image_rels: vec![
                ("rId1", "image1.png"),
                ("rId2", "image2.png"),
                ("rId3", "image3.png"),
            ],
            media: vec![
                ("image1.png", png(4, 3)),
                ("image2.png", png(2, 2)),
                ("image3.png", png(5, 1)),
            ],
            cells: vec![
                ("B2", "Site survey"),
                ("B8", "front door"),
                ("C8", "garden"),
                ("B13", "kitchen"),
            ],
            linked: Vec::new(),
            external_rels: Vec::new(),
            rel_prefix: "r",
            drawing_xml: None,
        }
    }

    /// Standard book plus a fourth picture at D7 sharing image1.png
    pub fn shared_media() -> Self {
        let mut book = Self::standard();
        book.anchors.push(Anchor { row0: 6, col0: 3, rid: "rId4" });
        book.image_rels.push(("rId4", "image1.png"));
        book.cells.push(("D8", "front door again"));
        book
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut strings: Vec<&str> = Vec::new();
        let mut index_of = |text: &'static str| {
            strings.iter().position(|s| *s == text).unwrap_or_else(|| {
                strings.push(text);
                strings.len() - 1
            })
        };

        let photo_cells: Vec<(String, usize)> = self
            .cells
            .iter()
            .map(|(cell, text)| (cell.to_string(), index_of(*text)))
            .collect();
        let plain_cells = vec![("A1".to_string(), index_of("nothing to see"))];

        let mut overrides = vec![
            ("/xl/workbook.xml", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml".to_string()),
            ("/xl/worksheets/sheet1.xml", "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml".to_string()),
            ("/xl/worksheets/sheet2.xml", "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml".to_string()),
            ("/xl/styles.xml", "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml".to_string()),
            ("/xl/sharedStrings.xml", "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml".to_string()),
            ("/xl/drawings/drawing1.xml", "application/vnd.openxmlformats-officedocument.drawing+xml".to_string()),
        ];
        let media_names: Vec<String> = self
            .media
            .iter()
            .map(|(name, _)| format!("/xl/media/{name}"))
            .collect();
        let mut content_types = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>"#
        );
        for name in &media_names {
            overrides.push((name.as_str(), "image/png".to_string()));
        }
        for (name, kind) in &overrides {
            content_types.push_str(&format!(r#"<Override PartName="{name}" ContentType="{kind}"/>"#));
        }
        content_types.push_str("</Types>");

        let root_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{PKG_REL_NS}"><Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
        );

        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheets><sheet name="Photos" sheetId="1" r:id="rId1"/><sheet name="Plain" sheetId="2" r:id="rId2"/></sheets></workbook>"#
        );

        let workbook_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{PKG_REL_NS}"><Relationship Id="rId1" Type="{REL_NS}/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="{REL_NS}/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="{REL_NS}/styles" Target="styles.xml"/><Relationship Id="rId4" Type="{REL_NS}/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#
        );

        let styles = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="{MAIN_NS}"><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs></styleSheet>"#
        );

        let shared_strings = {
            let items: String = strings
                .iter()
                .map(|s| format!("<si><t>{s}</t></si>"))
                .collect();
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="{MAIN_NS}" count="{n}" uniqueCount="{n}">{items}</sst>"#,
                n = strings.len()
            )
        };

        let sheet1 = worksheet(&photo_cells, true);
        let sheet2 = worksheet(&plain_cells, false);

        let sheet1_rels = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{PKG_REL_NS}"><Relationship Id="rId1" Type="{REL_NS}/drawing" Target="../drawings/drawing1.xml"/></Relationships>"#
        );

        let drawing = self.drawing_xml.clone().unwrap_or_else(|| {
            let embedded = self.anchors.iter().map(|a| (a, "embed"));
            let linked = self.linked.iter().map(|a| (a, "link"));
            let anchors: String = embedded
                .chain(linked)
                .enumerate()
                .map(|(n, (anchor, attr))| anchor_xml(anchor, n as u32 + 2, self.rel_prefix, attr))
                .collect();
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main">{anchors}</xdr:wsDr>"#
            )
        });

        let drawing_rels = {
            let rels: String = self
                .image_rels
                .iter()
                .map(|(id, name)| {
                    format!(r#"<Relationship Id="{id}" Type="{REL_NS}/image" Target="../media/{name}"/>"#)
                })
                .chain(self.external_rels.iter().map(|(id, url)| {
                    format!(
                        r#"<Relationship Id="{id}" Type="{REL_NS}/image" Target="{url}" TargetMode="External"/>"#
                    )
                }))
                .collect();
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{PKG_REL_NS}">{rels}</Relationships>"#
            )
        };

        let mut members: Vec<(String, Vec<u8>)> = vec![
            ("[Content_Types].xml".to_string(), content_types.into_bytes()),
            ("_rels/.rels".to_string(), root_rels.into_bytes()),
            ("xl/workbook.xml".to_string(), workbook.into_bytes()),
            ("xl/_rels/workbook.xml.rels".to_string(), workbook_rels.into_bytes()),
            ("xl/styles.xml".to_string(), styles.into_bytes()),
            ("xl/sharedStrings.xml".to_string(), shared_strings.into_bytes()),
            ("xl/worksheets/sheet1.xml".to_string(), sheet1.into_bytes()),
            ("xl/worksheets/sheet2.xml".to_string(), sheet2.into_bytes()),
            ("xl/worksheets/_rels/sheet1.xml.rels".to_string(), sheet1_rels.into_bytes()),
            ("xl/drawings/drawing1.xml".to_string(), drawing.into_bytes()),
            ("xl/drawings/_rels/drawing1.xml.rels".to_string(), drawing_rels.into_bytes()),
        ];
        for (name, bytes) in &self.media {
            members.push((format!("xl/media/{name}"), bytes.clone()));
        }

        let mut zip = ZipWriter::new(File::create(path)?);
        for (name, content) in members {
            zip.start_file(name, SimpleFileOptions::default())?;
            zip.write_all(&content)?;
        }
        zip.finish()?;
        Ok(())
    }
}

fn worksheet(cells: &[(String, usize)], with_drawing: bool) -> String {
    let mut rows: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
    for (cell, index) in cells {
        let coord = sheetprune_core::CellCoordinate::parse(cell).expect("fixture cell reference");
        rows.entry(coord.row)
            .or_default()
            .insert(coord.col, format!(r#"<c r="{cell}" t="s"><v>{index}</v></c>"#));
    }
    let body: String = rows
        .iter()
        .map(|(row, cells)| format!(r#"<row r="{row}">{}</row>"#, cells.values().cloned().collect::<String>()))
        .collect();
    let drawing = if with_drawing { r#"<drawing r:id="rId1"/>"# } else { "" };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheetData>{body}</sheetData>{drawing}</worksheet>"#
    )
}

fn anchor_xml(anchor: &Anchor, id: u32, prefix: &str, attr: &str) -> String {
    let Anchor { row0, col0, rid } = anchor;
    format!(
        r#"<xdr:twoCellAnchor editAs="oneCell"><xdr:from><xdr:col>{col0}</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{row0}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:to><xdr:col>{col0}</xdr:col><xdr:colOff>600000</xdr:colOff><xdr:row>{row0}</xdr:row><xdr:rowOff>180000</xdr:rowOff></xdr:to><xdr:pic><xdr:nvPicPr><xdr:cNvPr id="{id}" name="Picture {id}"/><xdr:cNvPicPr/></xdr:nvPicPr><xdr:blipFill><a:blip xmlns:{prefix}="{REL_NS}" {prefix}:{attr}="{rid}"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill><xdr:spPr/></xdr:pic><xdr:clientData/></xdr:twoCellAnchor>"#,
    )
}

/// A small opaque PNG
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgba([200u8, 30, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("encoding an in-memory PNG");
    out.into_inner()
}

/// A workbook written to `<tempdir>/survey.xlsx`
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl Fixture {
    pub fn new(book: &Book) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("survey.xlsx");
        book.write(&path)?;
        Ok(Self { dir, path })
    }

    pub fn staged(&self) -> PathBuf {
        self.dir.path().join("filtered").join("survey.xlsx")
    }
}

pub fn member_names(path: &Path) -> Result<Vec<String>> {
    let archive = ZipArchive::new(File::open(path)?)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

pub fn read_member(path: &Path, name: &str) -> Result<Option<String>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let Ok(mut file) = archive.by_name(name) else {
        return Ok(None);
    };
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(Some(text))
}

/// Flip one byte inside a member's stored data so reading it fails
pub fn corrupt_member(path: &Path, name: &str) -> Result<()> {
    let (start, size) = {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        let member = archive.by_name(name)?;
        (member.data_start(), member.compressed_size())
    };
    let mut raw = std::fs::read(path)?;
    let at = usize::try_from(start + size / 2)?;
    raw[at] ^= 0xFF;
    std::fs::write(path, raw)?;
    Ok(())
}
