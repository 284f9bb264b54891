//! Index maps describing collection mutations.
//!
//! An [`IndexMap`] has one entry per current item of a collection. Each entry
//! is the item's index *before* the pending mutations, or [`NEW`] for items
//! that did not exist. Removed items' prior indices are kept in
//! [`IndexMap::deleted`]. After the collection's observer flushes, the map is
//! reset to the identity of the collection's current length.
//!
//! ```
//! use trellis_core::index_map::{IndexMap, NEW};
//!
//! let mut map = IndexMap::identity(3);
//! map.splice(1, 1, 2);
//! assert_eq!(map.entries(), &[0, NEW, NEW, 2]);
//! assert_eq!(map.deleted(), &[1]);
//! ```

/// Marker for an item added since the last flush.
pub const NEW: i32 = -2;

/// Prior-index record for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexMap {
    entries: Vec<i32>,
    deleted: Vec<i32>,
}

impl IndexMap {
    /// The unchanged map for a collection of `len` items.
    pub fn identity(len: usize) -> Self {
        Self {
            entries: (0..len).map(|i| i as i32).collect(),
            deleted: Vec::new(),
        }
    }

    /// Build a map from explicit entries.
    pub fn from_entries(entries: Vec<i32>, deleted: Vec<i32>) -> Self {
        Self { entries, deleted }
    }

    /// One entry per current item.
    pub fn entries(&self) -> &[i32] {
        &self.entries
    }

    /// Prior indices of removed items, in removal order.
    pub fn deleted(&self) -> &[i32] {
        &self.deleted
    }

    /// Number of current items.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether anything changed since the identity state.
    pub fn has_changes(&self) -> bool {
        !self.deleted.is_empty() || self.entries.iter().enumerate().any(|(i, &e)| e != i as i32)
    }

    /// Reset to the identity of `len` items.
    pub fn reset(&mut self, len: usize) {
        self.entries.clear();
        self.entries.extend((0..len).map(|i| i as i32));
        self.deleted.clear();
    }

    /// Items appended at the end.
    pub fn push_new(&mut self, count: usize) {
        self.entries.extend(std::iter::repeat_n(NEW, count));
    }

    /// Remove `delete_count` entries at `start` and insert `insert_count` new
    /// ones in their place. `start` is clamped to the current length.
    pub fn splice(&mut self, start: usize, delete_count: usize, insert_count: usize) {
        let start = start.min(self.entries.len());
        let end = start.saturating_add(delete_count).min(self.entries.len());
        let inserted = std::iter::repeat_n(NEW, insert_count);
        let removed: Vec<i32> = self.entries.splice(start..end, inserted).collect();
        for entry in removed {
            self.record_deleted(entry);
        }
    }

    /// Remove and record the last entry.
    pub fn pop(&mut self) {
        if let Some(removed) = self.entries.pop() {
            self.record_deleted(removed);
        }
    }

    /// Remove and record the first entry.
    pub fn shift(&mut self) {
        if !self.entries.is_empty() {
            let removed = self.entries.remove(0);
            self.record_deleted(removed);
        }
    }

    /// Items prepended at the front.
    pub fn unshift_new(&mut self, count: usize) {
        self.splice(0, 0, count);
    }

    /// Reverse entry order.
    pub fn reverse(&mut self) {
        self.entries.reverse();
    }

    /// Reorder entries: position `i` receives the entry at `order[i]`.
    pub fn permute(&mut self, order: &[usize]) {
        let permuted: Vec<i32> = order.iter().filter_map(|&i| self.entries.get(i).copied()).collect();
        self.entries = permuted;
    }

    /// The item at `index` was replaced by a different value.
    pub fn mark_replaced(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            let previous = std::mem::replace(entry, NEW);
            self.record_deleted(previous);
        }
    }

    /// Truncate or extend to `len` entries.
    pub fn set_len(&mut self, len: usize) {
        let current = self.entries.len();
        if len < current {
            self.splice(len, current - len, 0);
        } else {
            self.push_new(len - current);
        }
    }

    /// Every item removed.
    pub fn clear(&mut self) {
        let len = self.entries.len();
        self.splice(0, len, 0);
    }

    fn record_deleted(&mut self, previous: i32) {
        // Items that were themselves new never existed in the prior state.
        if previous >= 0 {
            self.deleted.push(previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_has_no_changes() {
        let map = IndexMap::identity(4);
        assert_eq!(map.entries(), &[0, 1, 2, 3]);
        assert!(!map.has_changes());
    }

    #[test]
    fn test_push_then_pop_new_records_nothing() {
        let mut map = IndexMap::identity(2);
        map.push_new(1);
        map.pop();
        assert_eq!(map.entries(), &[0, 1]);
        assert!(map.deleted().is_empty());
    }

    #[test]
    fn test_shift_and_unshift() {
        let mut map = IndexMap::identity(3);
        map.shift();
        map.unshift_new(2);
        assert_eq!(map.entries(), &[NEW, NEW, 1, 2]);
        assert_eq!(map.deleted(), &[0]);
    }

    #[test]
    fn test_permute_and_reverse() {
        let mut map = IndexMap::identity(3);
        map.permute(&[2, 0, 1]);
        assert_eq!(map.entries(), &[2, 0, 1]);
        map.reverse();
        assert_eq!(map.entries(), &[1, 0, 2]);
    }

    #[test]
    fn test_mark_replaced() {
        let mut map = IndexMap::identity(2);
        map.mark_replaced(1);
        assert_eq!(map.entries(), &[0, NEW]);
        assert_eq!(map.deleted(), &[1]);
    }

    #[test]
    fn test_splice_clamps() {
        let mut map = IndexMap::identity(2);
        map.splice(10, 5, 1);
        assert_eq!(map.entries(), &[0, 1, NEW]);
        assert!(map.deleted().is_empty());
    }

    #[test]
    fn test_splice_records_removed_entries() {
        let mut map = IndexMap::identity(4);
        map.splice(1, 2, 1);
        assert_eq!(map.entries(), &[0, NEW, 3]);
        assert_eq!(map.deleted(), &[1, 2]);
    }

    #[test]
    fn test_clear_then_reset() {
        let mut map = IndexMap::identity(3);
        map.clear();
        assert_eq!(map.deleted(), &[0, 1, 2]);
        map.reset(0);
        assert!(map.is_empty());
        assert!(!map.has_changes());
    }
}
