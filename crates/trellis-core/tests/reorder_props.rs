//! Property tests for the longest-increasing-subsequence planner.

use proptest::prelude::*;
use trellis_core::index_map::{IndexMap, NEW};
use trellis_core::lifecycle::ReorderPlanner;

/// Quadratic reference: length of the longest strictly increasing
/// subsequence over the non-negative entries.
fn reference_length(values: &[i32]) -> usize {
    let mut best = vec![0usize; values.len()];
    let mut overall = 0;
    for i in 0..values.len() {
        if values[i] < 0 {
            continue;
        }
        best[i] = 1;
        for j in 0..i {
            if values[j] >= 0 && values[j] < values[i] {
                best[i] = best[i].max(best[j] + 1);
            }
        }
        overall = overall.max(best[i]);
    }
    overall
}

fn entry_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![1 => Just(NEW), 4 => 0i32..40]
}

proptest! {
    #[test]
    fn test_lis_is_longest_and_increasing(values in prop::collection::vec(entry_strategy(), 0..40)) {
        let mut planner = ReorderPlanner::new();
        let positions = planner.longest_increasing_subsequence(&values);

        prop_assert_eq!(positions.len(), reference_length(&values));
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(positions.windows(2).all(|w| values[w[0]] < values[w[1]]));
        prop_assert!(positions.iter().all(|&p| values[p] >= 0));
    }

    #[test]
    fn test_plan_partitions_positions(values in prop::collection::vec(entry_strategy(), 0..40)) {
        let mut planner = ReorderPlanner::new();
        // Reuse across calls must not leak state between plans.
        planner.plan(&IndexMap::identity(50));
        let plan = planner.plan(&IndexMap::from_entries(values.clone(), vec![]));

        let mut all: Vec<usize> = plan.stable.iter().chain(plan.moved.iter()).copied().collect();
        all.sort_unstable();
        prop_assert_eq!(all, (0..values.len()).collect::<Vec<_>>());
        prop_assert!(plan.moved.iter().all(|&p| values[p] >= 0 || !plan.stable.contains(&p)));
    }
}
