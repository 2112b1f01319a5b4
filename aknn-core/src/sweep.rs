//! The per-input-point plane-sweep kernel over one training stripe.
//!
//! Binary-searches the training slice for the first x at or beyond the query
//! point, then walks alternately left and right, feeding candidates to the
//! heap's fused check-then-add until both directions report that the
//! one-dimensional gap already exceeds the k-th distance.

use crate::heap::{NeighbourHeap, SweepControl};
use crate::point::Point;

/// Sweeps `training` (sorted by x) for neighbours of `point`.
///
/// `min_dy_squared` is the squared vertical gap between `point` and the
/// nearest y edge of the stripe the slice came from; pass 0 when the stripe
/// contains the point. A direction is abandoned as soon as
/// `dx² + min_dy_squared` reaches the current k-th distance, because no
/// further point in that direction can then improve the heap.
pub fn sweep_stripe(
    point: &Point,
    training: &[Point],
    min_dy_squared: f64,
    heap: &mut NeighbourHeap,
) {
    if training.is_empty() {
        return;
    }

    // `low` walks downward through index low-1; `high` walks upward from its
    // own index. Both start at the first training x >= point.x.
    let split = training.partition_point(|q| q.x < point.x);
    let mut low = split;
    let mut high = split;
    let mut low_stop = low == 0;
    let mut high_stop = high == training.len();

    while !low_stop || !high_stop {
        if !low_stop {
            let candidate = &training[low - 1];
            let dx = point.x - candidate.x;
            let dy = point.y - candidate.y;
            let distance_squared = dx * dx + dy * dy;
            match heap.check_add(candidate, distance_squared, dx, min_dy_squared) {
                SweepControl::Continue => {
                    low -= 1;
                    low_stop = low == 0;
                }
                SweepControl::Stop => low_stop = true,
            }
        }

        if !high_stop {
            let candidate = &training[high];
            let dx = candidate.x - point.x;
            let dy = candidate.y - point.y;
            let distance_squared = dx * dx + dy * dy;
            match heap.check_add(candidate, distance_squared, dx, min_dy_squared) {
                SweepControl::Continue => {
                    high += 1;
                    high_stop = high == training.len();
                }
                SweepControl::Stop => high_stop = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Neighbour;
    use proptest::prelude::*;
    use std::num::NonZeroUsize;

    fn heap_of(k: usize) -> NeighbourHeap {
        NeighbourHeap::new(NonZeroUsize::new(k).expect("k must be non-zero"))
    }

    fn stripe(points: &[(u64, f64, f64)]) -> Vec<Point> {
        let mut stripe: Vec<Point> = points
            .iter()
            .map(|&(id, x, y)| Point { id, x, y })
            .collect();
        stripe.sort_by(|a, b| a.x.total_cmp(&b.x));
        stripe
    }

    #[test]
    fn finds_collinear_neighbours_on_both_sides() {
        let training = stripe(&[(1, 0.25, 0.0), (2, 0.5, 0.0), (3, 0.75, 0.0)]);
        let query = Point { id: 1, x: 0.0, y: 0.0 };
        let mut heap = heap_of(2);
        sweep_stripe(&query, &training, 0.0, &mut heap);
        let list = heap.into_sorted_list();
        assert_eq!(list.neighbours[0], Neighbour { point_id: 1, distance_squared: 0.0625 });
        assert_eq!(list.neighbours[1], Neighbour { point_id: 2, distance_squared: 0.25 });
    }

    #[test]
    fn empty_stripe_leaves_the_heap_untouched() {
        let query = Point { id: 1, x: 0.5, y: 0.5 };
        let mut heap = heap_of(2);
        sweep_stripe(&query, &[], 0.25, &mut heap);
        assert_eq!(heap.additions(), 0);
    }

    #[test]
    fn vertical_gap_prunes_a_distant_stripe_outright() {
        // All candidates sit far above; with a large min_dy² the very first
        // probes must stop both directions without any insertion beyond the
        // initial sentinel replacements.
        let training = stripe(&[(1, 0.49, 0.9), (2, 0.51, 0.9)]);
        let query = Point { id: 1, x: 0.5, y: 0.1 };
        let mut heap = heap_of(1);
        heap.add(9, 0.01);
        sweep_stripe(&query, &training, 0.64, &mut heap);
        assert_eq!(heap.additions(), 1);
        assert_eq!(heap.top_distance_squared(), 0.01);
    }

    proptest! {
        // Pruning safety: the sweep must agree with an exhaustive scan of the
        // same stripe, whatever the vertical gap passed in.
        #[test]
        fn sweep_matches_exhaustive_stripe_scan(
            xs in proptest::collection::vec((0.0_f64..1.0, 0.0_f64..1.0), 1..40),
            qx in 0.0_f64..1.0,
            qy in 0.0_f64..1.0,
            k in 1_usize..5,
        ) {
            let training: Vec<Point> = {
                let mut t: Vec<Point> = xs
                    .iter()
                    .enumerate()
                    .map(|(i, &(x, y))| Point { id: i as u64 + 1, x, y })
                    .collect();
                t.sort_by(|a, b| a.x.total_cmp(&b.x));
                t
            };
            let query = Point { id: 1, x: qx, y: qy };

            let mut swept = heap_of(k);
            sweep_stripe(&query, &training, 0.0, &mut swept);
            let swept = swept.into_sorted_list();

            let mut exhaustive = heap_of(k);
            for candidate in &training {
                exhaustive.add(candidate.id, query.distance_squared_to(candidate));
            }
            let exhaustive = exhaustive.into_sorted_list();

            let swept_d: Vec<f64> = swept.neighbours.iter().map(|n| n.distance_squared).collect();
            let exhaustive_d: Vec<f64> =
                exhaustive.neighbours.iter().map(|n| n.distance_squared).collect();
            prop_assert_eq!(swept_d, exhaustive_d);
        }
    }
}
