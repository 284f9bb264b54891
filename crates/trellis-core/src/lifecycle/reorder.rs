//! Minimal-move reordering for collection changes.
//!
//! After a collection flush, a repeater has to bring its rendered children in
//! line with the new item order. Items whose prior indices form the longest
//! increasing subsequence of the index map can stay where they are; every
//! other item (new, or displaced) is moved.
//!
//! The planner is a standalone utility: nothing in the binding engine calls
//! it. A repeater feeds it the [`IndexMap`] it receives in
//! [`CollectionSubscriber::handle_collection_change`](crate::CollectionSubscriber::handle_collection_change)
//! and applies the plan to its own children.
//!
//! ```
//! use trellis_core::index_map::{IndexMap, NEW};
//! use trellis_core::lifecycle::ReorderPlanner;
//!
//! let mut planner = ReorderPlanner::new();
//! let plan = planner.plan(&IndexMap::from_entries(vec![2, NEW, 0, 1], vec![]));
//! assert_eq!(plan.stable, vec![2, 3]);
//! assert_eq!(plan.moved, vec![0, 1]);
//! ```

use crate::index_map::IndexMap;

const NONE: u32 = u32::MAX;

/// Which positions of the new order stay put and which move.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReorderPlan {
    /// Positions whose items are left untouched, ascending.
    pub stable: Vec<usize>,
    /// Positions whose items must be (re)inserted, ascending.
    pub moved: Vec<usize>,
    /// Prior indices of removed items.
    pub removed: Vec<i32>,
}

/// Computes [`ReorderPlan`]s, reusing its integer buffers across calls.
///
/// The buffers grow to the largest list seen so far and are never shrunk.
#[derive(Debug, Default)]
pub struct ReorderPlanner {
    tails: Vec<u32>,
    predecessors: Vec<u32>,
}

impl ReorderPlanner {
    /// A planner with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current buffer capacity in items.
    pub fn capacity(&self) -> usize {
        self.predecessors.len()
    }

    /// Positions of the longest strictly increasing subsequence of `values`,
    /// ignoring negative entries. Runs in O(n log n).
    pub fn longest_increasing_subsequence(&mut self, values: &[i32]) -> Vec<usize> {
        let n = values.len();
        if self.predecessors.len() < n {
            self.predecessors.resize(n, NONE);
        }
        self.tails.clear();

        for (i, &value) in values.iter().enumerate() {
            if value < 0 {
                continue;
            }
            let pos = self
                .tails
                .partition_point(|&t| values[t as usize] < value);
            self.predecessors[i] = if pos > 0 { self.tails[pos - 1] } else { NONE };
            if pos == self.tails.len() {
                self.tails.push(i as u32);
            } else {
                self.tails[pos] = i as u32;
            }
        }

        let mut result = vec![0usize; self.tails.len()];
        let mut cursor = self.tails.last().copied().unwrap_or(NONE);
        for slot in result.iter_mut().rev() {
            *slot = cursor as usize;
            cursor = self.predecessors[cursor as usize];
        }
        result
    }

    /// Plan the moves for an index map.
    pub fn plan(&mut self, index_map: &IndexMap) -> ReorderPlan {
        let stable = self.longest_increasing_subsequence(index_map.entries());
        let mut moved = Vec::with_capacity(index_map.len() - stable.len());
        let mut stable_iter = stable.iter().peekable();
        for position in 0..index_map.len() {
            if stable_iter.peek() == Some(&&position) {
                stable_iter.next();
            } else {
                moved.push(position);
            }
        }
        ReorderPlan {
            stable,
            moved,
            removed: index_map.deleted().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_map::NEW;

    #[test]
    fn test_identity_moves_nothing() {
        let mut planner = ReorderPlanner::new();
        let plan = planner.plan(&IndexMap::identity(4));
        assert_eq!(plan.stable, vec![0, 1, 2, 3]);
        assert!(plan.moved.is_empty());
    }

    #[test]
    fn test_reversed_keeps_one() {
        let mut planner = ReorderPlanner::new();
        let plan = planner.plan(&IndexMap::from_entries(vec![3, 2, 1, 0], vec![]));
        assert_eq!(plan.stable.len(), 1);
        assert_eq!(plan.moved.len(), 3);
    }

    #[test]
    fn test_all_new() {
        let mut planner = ReorderPlanner::new();
        let plan = planner.plan(&IndexMap::from_entries(vec![NEW, NEW], vec![0, 1]));
        assert!(plan.stable.is_empty());
        assert_eq!(plan.moved, vec![0, 1]);
        assert_eq!(plan.removed, vec![0, 1]);
    }

    #[test]
    fn test_buffers_are_reused() {
        let mut planner = ReorderPlanner::new();
        planner.longest_increasing_subsequence(&[5, 1, 2, 3, 0, 4]);
        assert_eq!(planner.capacity(), 6);
        let lis = planner.longest_increasing_subsequence(&[1, 0]);
        assert_eq!(lis.len(), 1);
        assert_eq!(planner.capacity(), 6);
    }

    #[test]
    fn test_known_subsequence() {
        let mut planner = ReorderPlanner::new();
        let lis = planner.longest_increasing_subsequence(&[5, 1, 2, 3, 0, 4]);
        assert_eq!(lis, vec![1, 2, 3, 5]);
    }
}
