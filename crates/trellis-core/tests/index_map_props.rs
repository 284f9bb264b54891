//! Property tests: an observed array's index map always explains the array.
//!
//! After any sequence of mutations (and before the flush microtask runs),
//! every non-negative entry must point at the prior index of the item now in
//! that position, and the surviving prior indices together with the deleted
//! list must cover the original indices exactly once.

use proptest::prelude::*;
use trellis_core::{ArrayRef, DirtyChecker, Lifecycle, ObserverLocator, Value};

#[derive(Debug, Clone)]
enum Op {
    Push(u8),
    Pop,
    Shift,
    Unshift(u8),
    Splice { start: usize, delete: usize, insert: u8 },
    Reverse,
    Sort,
    Set { index: usize },
    SetLen(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..3).prop_map(Op::Push),
        Just(Op::Pop),
        Just(Op::Shift),
        (1u8..3).prop_map(Op::Unshift),
        (0usize..12, 0usize..4, 0u8..3).prop_map(|(start, delete, insert)| Op::Splice {
            start,
            delete,
            insert
        }),
        Just(Op::Reverse),
        Just(Op::Sort),
        (0usize..12).prop_map(|index| Op::Set { index }),
        (0usize..14).prop_map(Op::SetLen),
    ]
}

/// Hands out values that never occurred before, so every item is distinct
/// from the originals.
struct Fresh(i32);

impl Fresh {
    fn next(&mut self) -> Value {
        self.0 += 1;
        Value::from(self.0)
    }

    fn take(&mut self, n: u8) -> Vec<Value> {
        (0..n).map(|_| self.next()).collect()
    }
}

fn apply(items: &ArrayRef, op: &Op, fresh: &mut Fresh) {
    match op {
        Op::Push(n) => {
            items.push(fresh.take(*n));
        }
        Op::Pop => {
            items.pop();
        }
        Op::Shift => {
            items.shift();
        }
        Op::Unshift(n) => {
            items.unshift(fresh.take(*n));
        }
        Op::Splice { start, delete, insert } => {
            items.splice(*start, *delete, fresh.take(*insert));
        }
        Op::Reverse => items.reverse(),
        Op::Sort => items.sort_by(|a, b| a.to_number().total_cmp(&b.to_number())),
        Op::Set { index } => items.set(*index, fresh.next()).unwrap(),
        Op::SetLen(len) => items.set_len(*len).unwrap(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_index_map_tracks_prior_positions(
        initial in 0usize..8,
        ops in prop::collection::vec(op_strategy(), 0..24),
    ) {
        let lifecycle = Lifecycle::new();
        let locator = ObserverLocator::new(lifecycle, DirtyChecker::new());
        let original: Vec<Value> = (0..initial as i32).map(Value::from).collect();
        let items = ArrayRef::from(original.clone());
        let observer = locator.get_array_observer(&items);

        let mut fresh = Fresh(1000);
        for op in &ops {
            apply(&items, op, &mut fresh);
        }

        let map = observer.index_map();
        let current = items.to_vec();
        prop_assert_eq!(map.len(), current.len());

        let mut seen = vec![0u32; initial];
        for (position, &entry) in map.entries().iter().enumerate() {
            if entry >= 0 {
                let prior = entry as usize;
                prop_assert!(prior < initial);
                prop_assert_eq!(&current[position], &original[prior]);
                seen[prior] += 1;
            } else {
                prop_assert_eq!(entry, trellis_core::index_map::NEW);
            }
        }
        for &deleted in map.deleted() {
            prop_assert!(deleted >= 0 && (deleted as usize) < initial);
            seen[deleted as usize] += 1;
        }
        prop_assert!(seen.iter().all(|&count| count == 1), "coverage: {:?}", seen);
    }
}
