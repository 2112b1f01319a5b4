//! The in-memory stripe scheduler.
//!
//! Dispatches input stripes across rayon workers. Each input point sweeps
//! its own stripe first, then walks alternately downward and upward through
//! neighbouring stripes, abandoning a direction as soon as the squared
//! vertical gap to the next stripe reaches the current k-th distance. When
//! the window of stripes is narrower than the worker pool, the loop over
//! points within a stripe is parallelised instead of the loop over stripes.

use rayon::prelude::*;

use std::num::NonZeroUsize;
use std::time::Instant;

use crate::heap::NeighbourHeap;
use crate::point::Point;
use crate::result::{HeapStats, NeighbourList, RunStats};
use crate::stripes::{StripeOptions, StripeSet};
use crate::sweep::sweep_stripe;

/// Searches all stripes for the neighbours of one input point belonging to
/// stripe `own`.
fn search_point(point: &Point, stripes: &StripeSet, own: usize, k: NonZeroUsize) -> NeighbourList {
    let mut heap = NeighbourHeap::new(k);
    sweep_stripe(point, stripes.training(own), 0.0, &mut heap);

    let stripe_count = stripes.len();
    let mut below = own;
    let mut above = own + 1;
    let mut low_done = below == 0;
    let mut high_done = above >= stripe_count;

    while !low_done || !high_done {
        if !low_done {
            let gap = point.y - stripes.bounds(below - 1).max_y;
            let gap_squared = gap * gap;
            if gap_squared < heap.top_distance_squared() {
                sweep_stripe(point, stripes.training(below - 1), gap_squared, &mut heap);
                below -= 1;
                low_done = below == 0;
            } else {
                low_done = true;
            }
        }

        if !high_done {
            let gap = stripes.bounds(above).min_y - point.y;
            let gap_squared = gap * gap;
            if gap_squared < heap.top_distance_squared() {
                sweep_stripe(point, stripes.training(above), gap_squared, &mut heap);
                above += 1;
                high_done = above >= stripe_count;
            } else {
                high_done = true;
            }
        }
    }

    heap.into_sorted_list()
}

/// Runs the full internal algorithm over in-memory datasets.
///
/// Returns the per-point lists in input order together with the run
/// statistics (stripe count, sort time, heap counters).
#[must_use]
pub(crate) fn run_internal(
    input: &[Point],
    training: &[Point],
    k: NonZeroUsize,
    options: &StripeOptions,
) -> (Vec<NeighbourList>, RunStats) {
    let started = Instant::now();
    let stripes = StripeSet::build(input, training, k, options);
    let sort_seconds = started.elapsed().as_secs_f64();

    let stripe_count = stripes.len();
    let workers = rayon::current_num_threads();

    let per_stripe: Vec<Vec<(u64, NeighbourList)>> = if stripe_count >= workers {
        (0..stripe_count)
            .into_par_iter()
            .map(|i| {
                stripes
                    .input(i)
                    .iter()
                    .map(|point| (point.id, search_point(point, &stripes, i, k)))
                    .collect()
            })
            .collect()
    } else {
        (0..stripe_count)
            .map(|i| {
                stripes
                    .input(i)
                    .par_iter()
                    .map(|point| (point.id, search_point(point, &stripes, i, k)))
                    .collect()
            })
            .collect()
    };

    let mut lists = vec![NeighbourList::default(); input.len()];
    for (id, list) in per_stripe.into_iter().flatten() {
        lists[id as usize - 1] = list;
    }

    let stats = RunStats {
        total_seconds: started.elapsed().as_secs_f64(),
        sort_seconds,
        heap: HeapStats::from_lists(&lists),
        num_stripes: stripe_count,
        ..RunStats::default()
    };
    (lists, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brute::brute_force;
    use proptest::prelude::*;
    use rstest::rstest;

    fn k(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("k must be non-zero")
    }

    // `aknn_test_support::uniform_points` cannot be used here: this module
    // is compiled as part of `aknn-core`'s own unit-test binary, which is a
    // distinct compilation of the crate from the one `aknn-test-support`
    // (a dev-dependency) links against, so their `Point` types do not
    // unify. A local generator with the same determinism properties
    // (unique sequential ids, reproducible per seed) sidesteps that without
    // needing the crate boundary.
    fn uniform_points(count: usize, seed: u64) -> Vec<Point> {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        let mut next_unit = || {
            // xorshift64*
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
        };
        (0..count)
            .map(|i| Point {
                id: i as u64 + 1,
                x: next_unit(),
                y: next_unit(),
            })
            .collect()
    }

    fn distances(lists: &[NeighbourList]) -> Vec<Vec<f64>> {
        lists
            .iter()
            .map(|list| list.neighbours.iter().map(|n| n.distance_squared).collect())
            .collect()
    }

    #[test]
    fn single_point_scenario() {
        let input = vec![Point { id: 1, x: 0.5, y: 0.5 }];
        let training = vec![
            Point { id: 1, x: 0.0, y: 0.0 },
            Point { id: 2, x: 1.0, y: 1.0 },
            Point { id: 3, x: 0.25, y: 0.75 },
        ];
        let (lists, stats) =
            run_internal(&input, &training, k(2), &StripeOptions::default());
        let neighbours = &lists[0].neighbours;
        assert_eq!(neighbours[0].point_id, 3);
        assert!((neighbours[0].distance_squared - 0.125).abs() < 1e-15);
        // Training points 1 and 2 tie at d² = 0.5; the sweep's visitation
        // order decides which is kept.
        assert!(neighbours[1].point_id == 1 || neighbours[1].point_id == 2);
        assert!((neighbours[1].distance_squared - 0.5).abs() < 1e-15);
        assert!(stats.num_stripes >= 1);
        assert_eq!(stats.heap.total_additions, lists[0].additions);
    }

    #[test]
    fn collinear_scenario() {
        let input = vec![
            Point { id: 1, x: 0.0, y: 0.0 },
            Point { id: 2, x: 1.0, y: 0.0 },
        ];
        let training = vec![
            Point { id: 1, x: 0.25, y: 0.0 },
            Point { id: 2, x: 0.5, y: 0.0 },
            Point { id: 3, x: 0.75, y: 0.0 },
        ];
        let (lists, _) = run_internal(&input, &training, k(2), &StripeOptions::default());
        assert_eq!(lists[0].neighbours[0].point_id, 1);
        assert_eq!(lists[0].neighbours[0].distance_squared, 0.0625);
        assert_eq!(lists[0].neighbours[1].point_id, 2);
        assert_eq!(lists[0].neighbours[1].distance_squared, 0.25);
        assert_eq!(lists[1].neighbours[0].point_id, 3);
        assert_eq!(lists[1].neighbours[0].distance_squared, 0.0625);
        assert_eq!(lists[1].neighbours[1].point_id, 2);
        assert_eq!(lists[1].neighbours[1].distance_squared, 0.25);
    }

    #[test]
    fn self_matching_scenario_with_shared_datasets() {
        let points = vec![
            Point { id: 1, x: 0.1, y: 0.5 },
            Point { id: 2, x: 0.9, y: 0.5 },
            Point { id: 3, x: 0.5, y: 0.5 },
        ];
        let (lists, _) = run_internal(&points, &points, k(2), &StripeOptions::default());
        for (index, list) in lists.iter().enumerate() {
            assert_eq!(list.neighbours[0].point_id, index as u64 + 1);
            assert_eq!(list.neighbours[0].distance_squared, 0.0);
        }
        assert_eq!(lists[0].neighbours[1].point_id, 3);
        assert_eq!(lists[1].neighbours[1].point_id, 3);
        // Point 3 is (near-)equidistant from 1 and 2; either may win, the
        // distance is fixed.
        let second = lists[2].neighbours[1];
        assert!(second.point_id == 1 || second.point_id == 2);
        assert!((second.distance_squared - 0.16).abs() < 1e-15);
    }

    #[rstest]
    #[case::auto_stripes(0, false, false, false)]
    #[case::fixed_stripes(7, false, false, false)]
    #[case::parallel_split(7, false, true, false)]
    #[case::parallel_sort(7, true, false, false)]
    #[case::split_by_training(7, false, false, true)]
    #[case::everything(5, true, true, true)]
    fn matches_brute_force_on_uniform_data(
        #[case] stripes: usize,
        #[case] parallel_sort: bool,
        #[case] parallel_split: bool,
        #[case] split_by_training: bool,
    ) {
        let input = uniform_points(300, 0xA11C_E5);
        let training = uniform_points(500, 0xB0B5_7EAD);
        let options = StripeOptions {
            stripes,
            parallel_sort,
            parallel_split,
            split_by_training,
        };
        let (lists, stats) = run_internal(&input, &training, k(4), &options);
        let reference = brute_force(&input, &training, k(4), false);
        assert_eq!(distances(&lists), distances(&reference));
        if stripes > 0 {
            assert!(stats.num_stripes >= stripes);
        }
    }

    #[test]
    fn heap_accounting_sums_per_point_additions() {
        let input = uniform_points(50, 7);
        let training = uniform_points(80, 11);
        let (lists, stats) = run_internal(&input, &training, k(3), &StripeOptions::default());
        let total: u64 = lists.iter().map(|l| l.additions).sum();
        assert_eq!(stats.heap.total_additions, total);
        assert!(lists.iter().all(|l| l.additions >= 1));
        assert!(stats.heap.min_additions >= 1);
        assert!(stats.heap.max_additions <= total);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn equals_brute_force_on_random_sets(
            seed in 0_u64..1_000,
            input_len in 1_usize..120,
            training_len in 1_usize..160,
            neighbours in 1_usize..6,
            stripes in 0_usize..12,
        ) {
            let input = uniform_points(input_len, seed);
            let training = uniform_points(training_len, seed.wrapping_add(1));
            let options = StripeOptions { stripes, ..StripeOptions::default() };
            let (lists, _) = run_internal(&input, &training, k(neighbours), &options);
            let reference = brute_force(&input, &training, k(neighbours), false);
            prop_assert_eq!(distances(&lists), distances(&reference));
        }
    }
}
