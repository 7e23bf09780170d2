//! Cell store: values read through calamine, styles and clears written as XML edits

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{Data, Range, Reader, Xlsx, open_workbook};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader as XmlReader, Writer};
use tracing::debug;

use super::styles::StyleSheet;
use crate::address::CellCoordinate;
use crate::error::{EditorError, Result};
use crate::package::{PartReader, ZipCodec, ZipParts, styles_part, workbook_sheets};

/// The one style attribute the editor manages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellStyle {
    /// ARGB, e.g. `FFFF0000`. `None` means no fill.
    pub background_color: Option<String>,
}

impl CellStyle {
    pub fn filled(argb: &str) -> Self {
        Self {
            background_color: Some(argb.to_string()),
        }
    }
}

/// Key-value access to one worksheet's cells.
///
/// Edits are buffered until [`CellStore::save`] writes them to the package.
pub trait CellStore {
    /// Display text of the cell, `None` when empty
    fn cell_value(&self, cell: CellCoordinate) -> Option<String>;

    fn cell_style(&self, cell: CellCoordinate) -> Result<CellStyle>;

    fn set_cell_style(&mut self, cell: CellCoordinate, style: &CellStyle) -> Result<()>;

    fn clear_cell_value(&mut self, cell: CellCoordinate) -> Result<()>;

    /// Persist buffered edits
    fn save(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct PendingEdit {
    /// `Some(None)` clears the fill
    background: Option<Option<String>>,
    clear_value: bool,
}

/// What the sheet rewrite applies to one cell
#[derive(Debug, Clone, Copy)]
struct CellEdit {
    style: Option<u32>,
    clear_value: bool,
    /// Create the `<c>` element when the sheet lacks it
    create: bool,
}

/// [`CellStore`] over one worksheet of an XLSX package
pub struct XlsxCellStore {
    path: PathBuf,
    sheet_name: String,
    sheet_part: String,
    values: Range<Data>,
    sheet_xml: String,
    styles: Option<StyleSheet>,
    pending: BTreeMap<CellCoordinate, PendingEdit>,
}

impl XlsxCellStore {
    pub fn open(path: &Path, sheet_name: &str) -> Result<Self> {
        let mut parts = ZipParts::open(path)?;
        let sheet = workbook_sheets(&mut parts)?
            .into_iter()
            .find(|sheet| sheet.name == sheet_name)
            .ok_or_else(|| EditorError::SheetNotFound(sheet_name.to_string()))?;

        let sheet_xml = parts
            .read_text(&sheet.part)?
            .ok_or_else(|| EditorError::xml(&sheet.part, "worksheet part is missing"))?;

        let styles_part = styles_part(&mut parts)?;
        let styles = match parts.read_text(&styles_part)? {
            Some(text) => Some(StyleSheet::parse(&text, &styles_part)?),
            None => None,
        };

        let mut workbook = open_workbook::<Xlsx<BufReader<File>>, _>(path)
            .map_err(|e| EditorError::PackageOpen {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let values = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| EditorError::CellStore(format!("{sheet_name}: {e}")))?;

        debug!(path = %path.display(), sheet = sheet_name, part = %sheet.part, "opened cell store");
        Ok(Self {
            path: path.to_path_buf(),
            sheet_name: sheet_name.to_string(),
            sheet_part: sheet.part,
            values,
            sheet_xml,
            styles,
            pending: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Whether edits are waiting for [`CellStore::save`]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn styles_mut(&mut self) -> Result<&mut StyleSheet> {
        let path = self.path.display().to_string();
        self.styles
            .as_mut()
            .ok_or_else(|| EditorError::CellStore(format!("{path} has no styles part")))
    }

    /// Resolve pending edits into per-cell style indices and clears
    fn resolve_edits(&mut self) -> Result<BTreeMap<CellCoordinate, CellEdit>> {
        let targets: Vec<CellCoordinate> = self.pending.keys().copied().collect();
        let existing = style_indices(&self.sheet_xml, &self.sheet_part, &targets)?;
        let pending = self.pending.clone();

        let mut edits = BTreeMap::new();
        for (cell, edit) in &pending {
            let present = existing.get(cell);
            let style = match &edit.background {
                None => None,
                // Clearing the fill of a cell that does not exist is a no-op
                Some(None) if present.is_none() => None,
                Some(background) => {
                    let base = present.copied().flatten().unwrap_or(0);
                    let styles = self.styles_mut()?;
                    let fill = match background {
                        Some(argb) => styles.ensure_solid_fill(argb)?,
                        None => 0,
                    };
                    Some(styles.derive_xf(base, fill)?)
                }
            };
            edits.insert(
                *cell,
                CellEdit {
                    style,
                    clear_value: edit.clear_value,
                    create: matches!(edit.background, Some(Some(_))) && present.is_none(),
                },
            );
        }
        Ok(edits)
    }
}

impl CellStore for XlsxCellStore {
    fn cell_value(&self, cell: CellCoordinate) -> Option<String> {
        if self.pending.get(&cell).is_some_and(|edit| edit.clear_value) {
            return None;
        }
        let value = self
            .values
            .get_value((cell.row.checked_sub(1)?, cell.col.checked_sub(1)?))?;
        data_to_string(value)
    }

    fn cell_style(&self, cell: CellCoordinate) -> Result<CellStyle> {
        if let Some(background) = self.pending.get(&cell).and_then(|e| e.background.clone()) {
            return Ok(CellStyle {
                background_color: background,
            });
        }
        let index = style_indices(&self.sheet_xml, &self.sheet_part, &[cell])?
            .get(&cell)
            .copied()
            .flatten();
        let background_color = match (index, &self.styles) {
            (Some(index), Some(styles)) => styles.fill_color(index),
            _ => None,
        };
        Ok(CellStyle { background_color })
    }

    fn set_cell_style(&mut self, cell: CellCoordinate, style: &CellStyle) -> Result<()> {
        if style.background_color.is_some() && self.styles.is_none() {
            self.styles_mut()?;
        }
        self.pending.entry(cell).or_default().background = Some(style.background_color.clone());
        Ok(())
    }

    fn clear_cell_value(&mut self, cell: CellCoordinate) -> Result<()> {
        self.pending.entry(cell).or_default().clear_value = true;
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let edits = self.resolve_edits()?;
        let sheet_xml = rewrite_sheet(&self.sheet_xml, &self.sheet_part, &edits)?;

        let mut replacements = BTreeMap::new();
        replacements.insert(self.sheet_part.clone(), sheet_xml.into_bytes());
        if let Some(styles) = self.styles.as_ref().filter(|s| s.is_modified()) {
            replacements.insert(styles.part().to_string(), styles.to_xml()?.into_bytes());
        }
        ZipCodec.rewrite(&self.path, &replacements)?;

        debug!(path = %self.path.display(), cells = edits.len(), "saved cell edits");
        *self = Self::open(&self.path, &self.sheet_name)?;
        Ok(())
    }
}

fn data_to_string(value: &Data) -> Option<String> {
    match value {
        Data::Empty => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                Some(format!("{}", *f as i64))
            } else {
                Some(f.to_string())
            }
        }
        Data::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => Some(dt.as_f64().to_string()),
        Data::Error(e) => Some(e.to_string()),
    }
}

fn attr_value(element: &BytesStart, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn local_is(element: &BytesStart, local: &[u8]) -> bool {
    element.local_name().as_ref() == local
}

/// Existing `s` attribute of each target cell present in the sheet.
///
/// A present cell without `s` maps to `None`; absent cells are not in the map.
fn style_indices(
    sheet_xml: &str,
    part: &str,
    targets: &[CellCoordinate],
) -> Result<HashMap<CellCoordinate, Option<u32>>> {
    let mut found = HashMap::new();
    if targets.is_empty() {
        return Ok(found);
    }

    let mut reader = XmlReader::from_str(sheet_xml);
    let mut row = 0u32;
    let mut col = 0u32;
    loop {
        match reader.read_event().map_err(|e| EditorError::xml(part, e))? {
            Event::Start(e) | Event::Empty(e) if local_is(&e, b"row") => {
                row = attr_value(&e, b"r")
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(row + 1);
                col = 0;
            }
            Event::Start(e) | Event::Empty(e) if local_is(&e, b"c") => {
                let cell = attr_value(&e, b"r")
                    .and_then(|r| CellCoordinate::parse(&r))
                    .unwrap_or(CellCoordinate::new(row, col + 1));
                col = cell.col;
                if targets.contains(&cell) {
                    let style = attr_value(&e, b"s").and_then(|s| s.parse().ok());
                    found.insert(cell, style);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

struct SheetRewriter<'a> {
    writer: Writer<Vec<u8>>,
    part: &'a str,
    /// Element prefix used by `<sheetData>`, e.g. `x:`
    prefix: String,
    /// Remaining edits grouped by row, then column
    rows: BTreeMap<u32, BTreeMap<u32, CellEdit>>,
    current_row: u32,
    current_col: u32,
}

impl SheetRewriter<'_> {
    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| EditorError::xml(self.part, e))
    }

    fn new_cell(&self, row: u32, col: u32, edit: &CellEdit) -> Option<BytesStart<'static>> {
        let style = edit.style.filter(|_| edit.create)?;
        let mut cell = BytesStart::new(format!("{}c", self.prefix));
        cell.push_attribute(("r", CellCoordinate::new(row, col).to_a1().as_str()));
        cell.push_attribute(("s", style.to_string().as_str()));
        Some(cell)
    }

    /// Emit created cells of the current row with column below `before`
    fn flush_cells(&mut self, before: Option<u32>) -> Result<()> {
        let row = self.current_row;
        let Some(cells) = self.rows.get_mut(&row) else {
            return Ok(());
        };
        let cols: Vec<u32> = cells
            .keys()
            .copied()
            .filter(|col| before.is_none_or(|limit| *col < limit))
            .collect();
        let removed: Vec<(u32, CellEdit)> = cols
            .into_iter()
            .filter_map(|col| cells.remove(&col).map(|edit| (col, edit)))
            .collect();
        if cells.is_empty() {
            self.rows.remove(&row);
        }

        for (col, edit) in removed {
            if let Some(cell) = self.new_cell(row, col, &edit) {
                self.write(Event::Empty(cell))?;
            }
        }
        Ok(())
    }

    /// Emit whole new rows numbered below `before`
    fn flush_rows(&mut self, before: Option<u32>) -> Result<()> {
        let rows: Vec<u32> = self
            .rows
            .keys()
            .copied()
            .filter(|row| before.is_none_or(|limit| *row < limit))
            .collect();
        for row in rows {
            let Some(cells) = self.rows.remove(&row) else {
                continue;
            };
            let created: Vec<_> = cells
                .iter()
                .filter_map(|(col, edit)| self.new_cell(row, *col, edit))
                .collect();
            if created.is_empty() {
                continue;
            }
            let mut start = BytesStart::new(format!("{}row", self.prefix));
            start.push_attribute(("r", row.to_string().as_str()));
            let end = start.to_end().into_owned();
            self.write(Event::Start(start))?;
            for cell in created {
                self.write(Event::Empty(cell))?;
            }
            self.write(Event::End(end))?;
        }
        Ok(())
    }

    /// Write one existing `<c>`; returns true when its children must be dropped
    fn rewrite_cell(&mut self, element: BytesStart<'_>, self_closing: bool) -> Result<bool> {
        let cell = attr_value(&element, b"r")
            .and_then(|r| CellCoordinate::parse(&r))
            .unwrap_or(CellCoordinate::new(self.current_row, self.current_col + 1));
        self.current_col = cell.col;
        self.flush_cells(Some(cell.col))?;

        match self.take_edit(cell) {
            Some(edit) if edit.clear_value => {
                self.write(Event::Empty(edited_cell(&element, &edit)))?;
                Ok(!self_closing)
            }
            Some(edit) => {
                let edited = edited_cell(&element, &edit);
                if self_closing {
                    self.write(Event::Empty(edited))?;
                } else {
                    self.write(Event::Start(edited))?;
                }
                Ok(false)
            }
            None if self_closing => self.write(Event::Empty(element)).map(|_| false),
            None => self.write(Event::Start(element)).map(|_| false),
        }
    }

    fn take_edit(&mut self, cell: CellCoordinate) -> Option<CellEdit> {
        let cells = self.rows.get_mut(&cell.row)?;
        let edit = cells.remove(&cell.col);
        if cells.is_empty() {
            self.rows.remove(&cell.row);
        }
        edit
    }
}

fn edited_cell(element: &BytesStart, edit: &CellEdit) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut cell = BytesStart::new(name);
    for attr in element.attributes().flatten() {
        let key = attr.key.as_ref();
        if (key == b"s" && edit.style.is_some()) || (key == b"t" && edit.clear_value) {
            continue;
        }
        cell.push_attribute((key, attr.value.as_ref()));
    }
    if let Some(style) = edit.style {
        cell.push_attribute(("s", style.to_string().as_str()));
    }
    cell
}

/// Stream the worksheet, applying `edits` to `<c>` elements inside `<sheetData>`
fn rewrite_sheet(
    sheet_xml: &str,
    part: &str,
    edits: &BTreeMap<CellCoordinate, CellEdit>,
) -> Result<String> {
    let mut rows: BTreeMap<u32, BTreeMap<u32, CellEdit>> = BTreeMap::new();
    for (cell, edit) in edits {
        rows.entry(cell.row).or_default().insert(cell.col, *edit);
    }

    let mut reader = XmlReader::from_str(sheet_xml);
    let mut out = SheetRewriter {
        writer: Writer::new(Vec::new()),
        part,
        prefix: String::new(),
        rows,
        current_row: 0,
        current_col: 0,
    };
    let mut in_sheet_data = false;
    // Depth inside a cleared cell whose children are being dropped
    let mut skipping = 0usize;

    loop {
        let event = reader.read_event().map_err(|e| EditorError::xml(part, e))?;

        if skipping > 0 {
            match event {
                Event::Start(_) => skipping += 1,
                Event::End(_) => skipping -= 1,
                Event::Eof => return Err(EditorError::xml(part, "unexpected end of document")),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(e) if local_is(&e, b"sheetData") => {
                out.prefix = e
                    .name()
                    .prefix()
                    .map(|p| format!("{}:", String::from_utf8_lossy(p.as_ref())))
                    .unwrap_or_default();
                in_sheet_data = true;
                out.write(Event::Start(e))?;
            }
            Event::Empty(e) if local_is(&e, b"sheetData") => {
                out.prefix = e
                    .name()
                    .prefix()
                    .map(|p| format!("{}:", String::from_utf8_lossy(p.as_ref())))
                    .unwrap_or_default();
                let end = e.to_end().into_owned();
                out.write(Event::Start(e))?;
                out.flush_rows(None)?;
                out.write(Event::End(end))?;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                out.flush_rows(None)?;
                in_sheet_data = false;
                out.write(Event::End(e))?;
            }
            Event::Start(e) if in_sheet_data && local_is(&e, b"row") => {
                let row = attr_value(&e, b"r")
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(out.current_row + 1);
                out.flush_rows(Some(row))?;
                out.current_row = row;
                out.current_col = 0;
                out.write(Event::Start(e))?;
            }
            Event::Empty(e) if in_sheet_data && local_is(&e, b"row") => {
                let row = attr_value(&e, b"r")
                    .and_then(|r| r.parse().ok())
                    .unwrap_or(out.current_row + 1);
                out.flush_rows(Some(row))?;
                out.current_row = row;
                out.current_col = 0;
                if out.rows.contains_key(&row) {
                    let end = e.to_end().into_owned();
                    out.write(Event::Start(e))?;
                    out.flush_cells(None)?;
                    out.write(Event::End(end))?;
                } else {
                    out.write(Event::Empty(e))?;
                }
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                out.flush_cells(None)?;
                out.write(Event::End(e))?;
            }
            Event::Start(e) if in_sheet_data && local_is(&e, b"c") => {
                if out.rewrite_cell(e, false)? {
                    skipping = 1;
                }
            }
            Event::Empty(e) if in_sheet_data && local_is(&e, b"c") => {
                out.rewrite_cell(e, true)?;
            }
            Event::Eof => break,
            other => out.write(other)?,
        }
    }

    String::from_utf8(out.writer.into_inner()).map_err(|e| EditorError::xml(part, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"<worksheet xmlns="urn:main"><sheetData><row r="2"><c r="A2" t="s"><v>0</v></c><c r="C2" s="1"><v>5</v></c></row><row r="8"><c r="B8" t="s" s="1"><v>1</v></c></row></sheetData></worksheet>"#;

    fn edit(style: Option<u32>, clear_value: bool, create: bool) -> CellEdit {
        CellEdit {
            style,
            clear_value,
            create,
        }
    }

    fn rewrite(edits: &[(&str, CellEdit)]) -> String {
        let edits: BTreeMap<_, _> = edits
            .iter()
            .map(|(cell, edit)| (CellCoordinate::parse(cell).unwrap(), *edit))
            .collect();
        rewrite_sheet(SHEET, "xl/worksheets/sheet1.xml", &edits).unwrap()
    }

    #[test]
    fn test_style_indices() {
        let targets = [
            CellCoordinate::new(2, 1),
            CellCoordinate::new(2, 3),
            CellCoordinate::new(9, 9),
        ];
        let found = style_indices(SHEET, "sheet", &targets).unwrap();
        assert_eq!(found.get(&targets[0]), Some(&None));
        assert_eq!(found.get(&targets[1]), Some(&Some(1)));
        assert!(!found.contains_key(&targets[2]));
    }

    #[test]
    fn test_restyle_existing_cell() {
        let xml = rewrite(&[("C2", edit(Some(4), false, false))]);
        assert!(xml.contains(r#"<c r="C2" s="4"><v>5</v></c>"#));
    }

    #[test]
    fn test_clear_drops_value_and_type() {
        let xml = rewrite(&[("B8", edit(Some(0), true, false))]);
        assert!(xml.contains(r#"<row r="8"><c r="B8" s="0"/></row>"#));
        assert!(!xml.contains("<v>1</v>"));
    }

    #[test]
    fn test_missing_cells_and_rows_are_created_in_order() {
        let xml = rewrite(&[
            ("B2", edit(Some(3), false, true)),
            ("D2", edit(Some(3), false, true)),
            ("A5", edit(Some(3), false, true)),
            ("B9", edit(Some(3), false, true)),
        ]);
        assert!(xml.contains(
            r#"<row r="2"><c r="A2" t="s"><v>0</v></c><c r="B2" s="3"/><c r="C2" s="1"><v>5</v></c><c r="D2" s="3"/></row>"#
        ));
        assert!(xml.contains(r#"<row r="5"><c r="A5" s="3"/></row><row r="8">"#));
        assert!(xml.contains(r#"</row><row r="9"><c r="B9" s="3"/></row></sheetData>"#));
    }

    #[test]
    fn test_clear_of_missing_cell_is_noop() {
        let xml = rewrite(&[("F20", edit(None, true, false))]);
        assert_eq!(xml, SHEET);
    }

    #[test]
    fn test_empty_sheet_data_is_expanded() {
        let sheet = r#"<worksheet><sheetData/></worksheet>"#;
        let mut edits = BTreeMap::new();
        edits.insert(CellCoordinate::new(8, 2), edit(Some(2), false, true));
        let xml = rewrite_sheet(sheet, "sheet", &edits).unwrap();
        assert_eq!(
            xml,
            r#"<worksheet><sheetData><row r="8"><c r="B8" s="2"/></row></sheetData></worksheet>"#
        );
    }

    #[test]
    fn test_float_display() {
        assert_eq!(data_to_string(&Data::Float(3.0)).as_deref(), Some("3"));
        assert_eq!(data_to_string(&Data::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(data_to_string(&Data::Empty), None);
        assert_eq!(data_to_string(&Data::Bool(true)).as_deref(), Some("TRUE"));
    }
}
