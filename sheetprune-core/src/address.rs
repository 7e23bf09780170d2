//! Cell coordinates, column letters and range parsing

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Highest column index a worksheet can address (`XFD`)
pub const MAX_COLUMN: u32 = 16_384;

/// Highest row index a worksheet can address
pub const MAX_ROW: u32 = 1_048_576;

/// 1-based (row, col) position, matching native spreadsheet addressing
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellCoordinate {
    pub row: u32,
    pub col: u32,
}

impl CellCoordinate {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Build from the 0-based row/col stored in drawing anchors.
    ///
    /// `None` when the result falls outside the worksheet grid.
    pub fn from_zero_based(row: u32, col: u32) -> Option<Self> {
        let row = row.checked_add(1).filter(|r| *r <= MAX_ROW)?;
        let col = col.checked_add(1).filter(|c| *c <= MAX_COLUMN)?;
        Some(Self { row, col })
    }

    /// Parse an A1-style reference such as `B7`
    pub fn parse(cell_ref: &str) -> Option<Self> {
        let (col, row) = split_cell_ref(cell_ref)?;
        Some(Self { row, col })
    }

    /// Convert to an A1-style reference (e.g. "B7")
    pub fn to_a1(&self) -> String {
        format!("{}{}", num_to_col(self.col), self.row)
    }

    /// Canonical `row:col` key
    pub fn key(&self) -> String {
        format!("{}:{}", self.row, self.col)
    }

    /// The cell directly below, which holds a picture's description.
    /// `None` on the last worksheet row.
    pub fn below(&self) -> Option<Self> {
        let row = self.row.checked_add(1).filter(|r| *r <= MAX_ROW)?;
        Some(Self { row, col: self.col })
    }
}

impl fmt::Display for CellCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Decode column letters (A=1 .. Z=26, AA=27, ...). Case-insensitive.
///
/// Returns `None` for empty input, non-letters, or columns past [`MAX_COLUMN`].
pub fn col_to_num(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }

    let mut num = 0u32;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        num = num.checked_mul(26)?.checked_add(digit)?;
        if num > MAX_COLUMN {
            return None;
        }
    }

    Some(num)
}

/// Encode a 1-based column number as letters (bijective base-26).
///
/// `0` has no letter form and yields an empty string.
pub fn num_to_col(mut num: u32) -> String {
    let mut letters = Vec::new();
    while num > 0 {
        num -= 1;
        letters.push(b'A' + (num % 26) as u8);
        num /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Split `B7` into (col, row). Both the letter run and the digit run are required.
fn split_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    static CELL_REF: OnceLock<Regex> = OnceLock::new();
    let re = CELL_REF.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+)([0-9]+)$").expect("cell reference pattern is valid")
    });

    let caps = re.captures(cell_ref.trim())?;
    let col = col_to_num(&caps[1])?;
    let row = parse_row(&caps[2])?;
    Some((col, row))
}

fn parse_row(text: &str) -> Option<u32> {
    let row = text.trim().parse::<u32>().ok()?;
    (1..=MAX_ROW).contains(&row).then_some(row)
}

/// Rectangular scan window with `start <= end` on both axes.
///
/// The all-zero value is the "no range" sentinel produced by malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RangeAddress {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl RangeAddress {
    /// Sentinel for "no range"
    pub const EMPTY: RangeAddress = RangeAddress {
        start_row: 0,
        start_col: 0,
        end_row: 0,
        end_col: 0,
    };

    /// Parse `COL:COL,ROW:ROW` (e.g. `B:K,7:34`) or `CELL:CELL` (e.g. `B7:K34`).
    ///
    /// Never fails: empty or malformed text yields [`RangeAddress::EMPTY`].
    pub fn parse(text: &str) -> Self {
        Self::try_parse(text).unwrap_or(Self::EMPTY)
    }

    fn try_parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let (start_col, end_col, start_row, end_row) = match text.split_once(',') {
            Some((cols, rows)) => {
                let (c1, c2) = cols.split_once(':')?;
                let (r1, r2) = rows.split_once(':')?;
                (
                    col_to_num(c1.trim())?,
                    col_to_num(c2.trim())?,
                    parse_row(r1)?,
                    parse_row(r2)?,
                )
            }
            None => {
                let (a, b) = text.split_once(':')?;
                let (c1, r1) = split_cell_ref(a)?;
                let (c2, r2) = split_cell_ref(b)?;
                (c1, c2, r1, r2)
            }
        };

        Some(Self {
            start_row: start_row.min(end_row),
            start_col: start_col.min(end_col),
            end_row: start_row.max(end_row),
            end_col: start_col.max(end_col),
        })
    }

    /// Whether this is the "no range" sentinel
    pub fn is_empty(&self) -> bool {
        self.start_row == 0 || self.start_col == 0
    }

    pub fn contains(&self, cell: CellCoordinate) -> bool {
        !self.is_empty()
            && (self.start_row..=self.end_row).contains(&cell.row)
            && (self.start_col..=self.end_col).contains(&cell.col)
    }

    /// Number of cells in the window
    pub fn cell_count(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        u64::from(self.end_row - self.start_row + 1) * u64::from(self.end_col - self.start_col + 1)
    }
}

impl fmt::Display for RangeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("<empty>");
        }
        write!(
            f,
            "{}:{}",
            CellCoordinate::new(self.start_row, self.start_col),
            CellCoordinate::new(self.end_row, self.end_col)
        )
    }
}
