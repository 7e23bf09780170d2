//! In-memory working set of picture entries and their deleted flags

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::address::{CellCoordinate, RangeAddress};
use crate::error::{EditorError, Result};
use crate::reader::{CellStore, ImagePayload, PictureRecord};

/// One picture and its description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub coordinate: CellCoordinate,
    pub media_path: String,
    pub image: ImagePayload,
    /// Text of the cell directly below the picture's origin
    pub description: String,
    pub deleted: bool,
}

impl Entry {
    /// Where the description lives; `None` for pictures on the last row
    pub fn description_cell(&self) -> Option<CellCoordinate> {
        self.coordinate.below()
    }
}

/// Batch target for [`EntryModel::set_deleted_bulk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Row(u32),
    Column(u32),
    Cells(BTreeSet<CellCoordinate>),
}

impl Selection {
    pub fn matches(&self, cell: CellCoordinate) -> bool {
        match self {
            Selection::All => true,
            Selection::Row(row) => cell.row == *row,
            Selection::Column(col) => cell.col == *col,
            Selection::Cells(cells) => cells.contains(&cell),
        }
    }
}

/// Result of a single toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toggle {
    pub coordinate: CellCoordinate,
    /// The entry's flag after the toggle
    pub deleted: bool,
    /// Every coordinate now awaiting save
    pub dirty: Vec<CellCoordinate>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryModel {
    range: RangeAddress,
    entries: Vec<Entry>,
    /// Coordinate to position in `entries`; rebuilt on every load
    index: HashMap<CellCoordinate, usize>,
    /// Coordinates whose flag changed since the last successful save
    dirty: BTreeSet<CellCoordinate>,
}

impl EntryModel {
    /// Build the working set from scanned records.
    ///
    /// Records outside `range` are skipped; when two pictures share an origin
    /// cell the first one wins.
    pub fn load(records: Vec<PictureRecord>, range: RangeAddress, cells: &dyn CellStore) -> Self {
        let mut entries = Vec::new();
        let mut index = HashMap::new();

        for record in records {
            if !range.contains(record.coordinate) || index.contains_key(&record.coordinate) {
                continue;
            }
            let description = record
                .coordinate
                .below()
                .and_then(|cell| cells.cell_value(cell))
                .unwrap_or_default();
            index.insert(record.coordinate, entries.len());
            entries.push(Entry {
                coordinate: record.coordinate,
                media_path: record.media_path,
                image: record.image,
                description,
                deleted: false,
            });
        }

        Self {
            range,
            entries,
            index,
            dirty: BTreeSet::new(),
        }
    }

    pub fn range(&self) -> RangeAddress {
        self.range
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, cell: CellCoordinate) -> Option<&Entry> {
        self.index.get(&cell).map(|&i| &self.entries[i])
    }

    /// Flip one entry's flag. The coordinate stays dirty even if toggled back.
    pub fn toggle_deleted(&mut self, cell: CellCoordinate) -> Result<Toggle> {
        let position = *self
            .index
            .get(&cell)
            .ok_or(EditorError::UnknownEntry(cell))?;
        let entry = &mut self.entries[position];
        entry.deleted = !entry.deleted;
        let deleted = entry.deleted;
        self.dirty.insert(cell);

        Ok(Toggle {
            coordinate: cell,
            deleted,
            dirty: self.dirty.iter().copied().collect(),
        })
    }

    /// Set every selected entry to `deleted`; returns the entries that changed.
    ///
    /// Entries already in the target state are neither changed nor marked dirty.
    pub fn set_deleted_bulk(&mut self, selection: &Selection, deleted: bool) -> Vec<CellCoordinate> {
        let mut changed = Vec::new();
        for entry in &mut self.entries {
            if entry.deleted != deleted && selection.matches(entry.coordinate) {
                entry.deleted = deleted;
                self.dirty.insert(entry.coordinate);
                changed.push(entry.coordinate);
            }
        }
        changed
    }

    pub fn dirty(&self) -> &BTreeSet<CellCoordinate> {
        &self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Origins of every entry marked deleted
    pub fn deleted_coordinates(&self) -> BTreeSet<CellCoordinate> {
        self.deleted().map(|entry| entry.coordinate).collect()
    }

    pub fn kept(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|entry| !entry.deleted)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|entry| entry.deleted)
    }

    /// False for an empty model
    pub fn all_deleted(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|entry| entry.deleted)
    }

    pub fn any_deleted(&self) -> bool {
        self.entries.iter().any(|entry| entry.deleted)
    }
}
