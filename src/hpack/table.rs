//! HPACK dynamic table (RFC 7541 §2.3.2, §4).
//!
//! Entries are kept oldest-first and tagged with an insertion ordinal, so an
//! entry's wire index is derived instead of stored:
//!
//! ```text
//! index = start_index + (insertions - 1 - ordinal)
//! ```
//!
//! The newest entry always has the lowest index, and evicting the oldest
//! entries never renumbers the survivors' ordinals.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use super::HeaderField;

/// Result of a table lookup. Indices are wire indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Name and value match.
    Exact(u64),
    /// Only the name matches.
    Name(u64),
    None,
}

#[derive(Debug)]
struct Entry {
    field: HeaderField,
    ordinal: u64,
}

/// Size-bounded FIFO table of header fields.
#[derive(Debug)]
pub struct HeaderTable {
    start_index: u64,
    entries: VecDeque<Entry>,
    insertions: u64,
    size: usize,
    /// `None` = unbounded.
    max_size: Option<usize>,
    /// Ordinals per name, oldest first.
    by_name: HashMap<Bytes, VecDeque<u64>>,
}

impl HeaderTable {
    pub fn new(start_index: u64, max_size: Option<usize>) -> Self {
        Self {
            start_index,
            entries: VecDeque::new(),
            insertions: 0,
            size: 0,
            max_size,
            by_name: HashMap::new(),
        }
    }

    /// Insert `field` as the newest entry, evicting the oldest entries until
    /// it fits. Returns `false` if the field alone exceeds the bound; the
    /// table is then left empty.
    pub fn add(&mut self, field: HeaderField) -> bool {
        let entry_size = field.size();
        if let Some(max) = self.max_size {
            if entry_size > max {
                while self.evict_oldest() {}
                return false;
            }
            while self.size + entry_size > max {
                self.evict_oldest();
            }
        }

        let ordinal = self.insertions;
        self.insertions += 1;
        self.size += entry_size;
        self.by_name.entry(field.name.clone()).or_default().push_back(ordinal);
        self.entries.push_back(Entry { field, ordinal });
        true
    }

    /// Field at a wire index, if it belongs to this table.
    pub fn get(&self, index: u64) -> Option<&HeaderField> {
        let offset = usize::try_from(index.checked_sub(self.start_index)?).ok()?;
        let pos = self.entries.len().checked_sub(1)?.checked_sub(offset)?;
        self.entries.get(pos).map(|e| &e.field)
    }

    /// Indices of every entry named `name`, lowest (newest) first.
    pub fn indices_for_name(&self, name: &[u8]) -> Vec<u64> {
        self.by_name
            .get(name)
            .map(|ordinals| ordinals.iter().rev().map(|&o| self.index_of(o)).collect())
            .unwrap_or_default()
    }

    /// Newest exact match, else newest name match.
    pub fn find(&self, name: &[u8], value: &[u8]) -> Match {
        let Some(ordinals) = self.by_name.get(name) else {
            return Match::None;
        };
        let oldest = self.oldest_ordinal();
        for &ordinal in ordinals.iter().rev() {
            let field = &self.entries[(ordinal - oldest) as usize].field;
            if field.value == value {
                return Match::Exact(self.index_of(ordinal));
            }
        }
        match ordinals.back() {
            Some(&newest) => Match::Name(self.index_of(newest)),
            None => Match::None,
        }
    }

    /// Sum of entry sizes (name + value + 32 each).
    pub fn current_size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Change the bound, evicting oldest entries until the content fits.
    pub fn set_max_size(&mut self, max_size: Option<usize>) {
        self.max_size = max_size;
        if let Some(max) = max_size {
            while self.size > max {
                self.evict_oldest();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest wire index currently valid.
    pub fn last_index(&self) -> u64 {
        self.start_index + self.entries.len() as u64 - 1
    }

    fn index_of(&self, ordinal: u64) -> u64 {
        self.start_index + (self.insertions - 1 - ordinal)
    }

    fn oldest_ordinal(&self) -> u64 {
        self.entries.front().map_or(self.insertions, |e| e.ordinal)
    }

    fn evict_oldest(&mut self) -> bool {
        let Some(entry) = self.entries.pop_front() else {
            return false;
        };
        self.size -= entry.field.size();
        if let Some(ordinals) = self.by_name.get_mut(&entry.field.name) {
            ordinals.pop_front();
            if ordinals.is_empty() {
                self.by_name.remove(&entry.field.name);
            }
        }
        true
    }
}
