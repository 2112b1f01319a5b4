//! Stripe construction: partitioning both datasets into horizontal bands.
//!
//! Both datasets are sorted by y, one of them (the splitting set) is cut
//! into stripes of roughly equal count, stripe edges are widened so a run of
//! equal y values never straddles a boundary, and each stripe's points are
//! finally sorted by x for the sweep. The paired set is sliced to the same
//! y ranges, either with a running cursor (serial path) or with independent
//! binary searches so stripes can be built in parallel.

use rayon::prelude::*;

use std::num::NonZeroUsize;

use crate::point::{MAX_Y_SENTINEL, Point, StripeBounds};

/// Configuration of the stripe-based algorithms.
#[derive(Clone, Copy, Debug, Default)]
pub struct StripeOptions {
    /// Desired stripe count; 0 selects the automatic heuristic.
    pub stripes: usize,
    /// Sort with rayon's parallel stable sort instead of the serial one.
    pub parallel_sort: bool,
    /// Build stripes in parallel (order-independent paired-set slicing).
    pub parallel_split: bool,
    /// Split by the training dataset instead of the input dataset.
    pub split_by_training: bool,
}

/// The stripe count heuristic: `round(√|T| / √k)`, at least 1.
///
/// Balances per-stripe sweep work against the cost of vertical pruning
/// across stripes.
#[must_use]
pub fn optimal_stripe_count(training_len: usize, k: NonZeroUsize) -> usize {
    let per_dim = (training_len as f64).sqrt();
    let neighbours_per_dim = (k.get() as f64).sqrt();
    let stripes = (per_dim / neighbours_per_dim).round();
    if stripes < 1.0 { 1 } else { stripes as usize }
}

/// Both datasets partitioned into stripes, plus the per-stripe bounds.
///
/// Stripe `i` holds the input and training points whose y falls in
/// `[bounds[i].min_y, bounds[i].max_y)`, each sorted by x. Stripes whose
/// splitting range collapsed to nothing are still present (empty, with
/// degenerate bounds) so index arithmetic stays uniform.
#[derive(Clone, Debug)]
pub struct StripeSet {
    input: Vec<Vec<Point>>,
    training: Vec<Vec<Point>>,
    bounds: Vec<StripeBounds>,
}

impl StripeSet {
    /// Splits `input` and `training` into stripes.
    #[must_use]
    pub fn build(
        input: &[Point],
        training: &[Point],
        k: NonZeroUsize,
        options: &StripeOptions,
    ) -> Self {
        let mut input_by_y = input.to_vec();
        let mut training_by_y = training.to_vec();
        sort_by_y(&mut input_by_y, options.parallel_sort);
        sort_by_y(&mut training_by_y, options.parallel_sort);

        let requested = if options.stripes > 0 {
            options.stripes
        } else {
            optimal_stripe_count(training.len(), k)
        };

        let (split_set, paired_set) = if options.split_by_training {
            (&training_by_y, &input_by_y)
        } else {
            (&input_by_y, &training_by_y)
        };

        let plan = SplitPlan::for_set(split_set.len(), requested);
        let (split_stripes, paired_stripes, bounds) = if options.parallel_split {
            split_parallel(split_set, paired_set, &plan, options.parallel_sort)
        } else {
            split_serial(split_set, paired_set, &plan, options.parallel_sort)
        };

        if options.split_by_training {
            Self {
                input: paired_stripes,
                training: split_stripes,
                bounds,
            }
        } else {
            Self {
                input: split_stripes,
                training: paired_stripes,
                bounds,
            }
        }
    }

    /// Number of stripes (including empty ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Returns true when no stripes were produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Input points of stripe `index`, sorted by x.
    #[must_use]
    pub fn input(&self, index: usize) -> &[Point] {
        &self.input[index]
    }

    /// Training points of stripe `index`, sorted by x.
    #[must_use]
    pub fn training(&self, index: usize) -> &[Point] {
        &self.training[index]
    }

    /// Vertical bounds of stripe `index`.
    #[must_use]
    pub fn bounds(&self, index: usize) -> StripeBounds {
        self.bounds[index]
    }
}

fn sort_by_y(points: &mut [Point], parallel: bool) {
    if parallel {
        points.par_sort_by(|a, b| a.y.total_cmp(&b.y));
    } else {
        points.sort_by(|a, b| a.y.total_cmp(&b.y));
    }
}

fn sort_by_x(points: &mut [Point], parallel: bool) {
    if parallel {
        points.par_sort_by(|a, b| a.x.total_cmp(&b.x));
    } else {
        points.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
}

/// Stripe count and size derived from the splitting set.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SplitPlan {
    pub(crate) stripes: usize,
    pub(crate) stripe_size: usize,
}

impl SplitPlan {
    pub(crate) fn for_set(len: usize, requested: usize) -> Self {
        let requested = requested.max(1);
        if len <= requested {
            // One point per stripe at most; a larger request degenerates.
            return Self {
                stripes: len.max(1),
                stripe_size: 1,
            };
        }
        let stripe_size = len / requested;
        let remainder = len % requested;
        let stripes = if remainder == 0 {
            requested
        } else {
            // Widen the plan so the remainder never overflows a stripe.
            requested + remainder / stripe_size + 1
        };
        Self {
            stripes,
            stripe_size,
        }
    }
}

/// The splitting-set index range of stripe `i`, widened so no equal-y run is
/// cut. Returns `(start, end)`; an empty range marks a degenerate stripe.
fn stripe_range(split_set: &[Point], plan: &SplitPlan, i: usize) -> (usize, usize) {
    let len = split_set.len();
    let base = i * plan.stripe_size;
    if base >= len {
        return (len, len);
    }

    let end = if len - base <= plan.stripe_size {
        len
    } else {
        // Walk past any equal-y run so the boundary never splits one; a run
        // longer than a stripe simply produces empty stripes after it.
        let mut end = base + plan.stripe_size;
        while end < len && split_set[end - 1].y == split_set[end].y {
            end += 1;
        }
        end
    };

    let mut start = base;
    if i > 0 {
        while start < end && split_set[start - 1].y == split_set[start].y {
            start += 1;
        }
    }
    (start, end)
}

/// Bounds of a populated stripe with range `(start, end)`.
fn stripe_bounds(split_set: &[Point], plan: &SplitPlan, i: usize, start: usize, end: usize) -> StripeBounds {
    let min_y = if i > 0 { split_set[start].y } else { 0.0 };
    let max_y = if i < plan.stripes - 1 && end < split_set.len() {
        split_set[end].y
    } else {
        MAX_Y_SENTINEL
    };
    StripeBounds { min_y, max_y }
}

/// Bounds of a degenerate stripe whose range collapsed at `start`.
fn empty_stripe_bounds(split_set: &[Point], start: usize) -> StripeBounds {
    if start >= split_set.len() {
        StripeBounds {
            min_y: MAX_Y_SENTINEL,
            max_y: MAX_Y_SENTINEL,
        }
    } else {
        StripeBounds {
            min_y: split_set[start].y,
            max_y: split_set[start].y,
        }
    }
}

fn split_serial(
    split_set: &[Point],
    paired_set: &[Point],
    plan: &SplitPlan,
    parallel_sort: bool,
) -> (Vec<Vec<Point>>, Vec<Vec<Point>>, Vec<StripeBounds>) {
    let mut split_stripes = Vec::with_capacity(plan.stripes);
    let mut paired_stripes = Vec::with_capacity(plan.stripes);
    let mut bounds = Vec::with_capacity(plan.stripes);
    let mut paired_cursor = 0_usize;

    for i in 0..plan.stripes {
        let (start, end) = stripe_range(split_set, plan, i);
        if start >= end {
            split_stripes.push(Vec::new());
            paired_stripes.push(Vec::new());
            bounds.push(empty_stripe_bounds(split_set, start));
            continue;
        }

        let band = stripe_bounds(split_set, plan, i, start, end);

        let mut split_points = split_set[start..end].to_vec();
        sort_by_x(&mut split_points, parallel_sort);

        let paired_end =
            paired_cursor + paired_set[paired_cursor..].partition_point(|p| p.y < band.max_y);
        let mut paired_points = paired_set[paired_cursor..paired_end].to_vec();
        paired_cursor = paired_end;
        sort_by_x(&mut paired_points, parallel_sort);

        split_stripes.push(split_points);
        paired_stripes.push(paired_points);
        bounds.push(band);
    }

    (split_stripes, paired_stripes, bounds)
}

fn split_parallel(
    split_set: &[Point],
    paired_set: &[Point],
    plan: &SplitPlan,
    parallel_sort: bool,
) -> (Vec<Vec<Point>>, Vec<Vec<Point>>, Vec<StripeBounds>) {
    let stripes: Vec<(Vec<Point>, Vec<Point>, StripeBounds)> = (0..plan.stripes)
        .into_par_iter()
        .map(|i| {
            let (start, end) = stripe_range(split_set, plan, i);
            if start >= end {
                return (Vec::new(), Vec::new(), empty_stripe_bounds(split_set, start));
            }

            let band = stripe_bounds(split_set, plan, i, start, end);

            let mut split_points = split_set[start..end].to_vec();
            sort_by_x(&mut split_points, parallel_sort);

            // Stripes are built out of order here, so the paired range is
            // located by binary search instead of a running cursor.
            let paired_start = paired_set.partition_point(|p| p.y < band.min_y);
            let paired_end = paired_set.partition_point(|p| p.y < band.max_y);
            let mut paired_points = paired_set[paired_start..paired_end].to_vec();
            sort_by_x(&mut paired_points, parallel_sort);

            (split_points, paired_points, band)
        })
        .collect();

    let mut split_stripes = Vec::with_capacity(plan.stripes);
    let mut paired_stripes = Vec::with_capacity(plan.stripes);
    let mut bounds = Vec::with_capacity(plan.stripes);
    for (split_points, paired_points, stripe_bounds) in stripes {
        split_stripes.push(split_points);
        paired_stripes.push(paired_points);
        bounds.push(stripe_bounds);
    }
    (split_stripes, paired_stripes, bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn k(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("k must be non-zero")
    }

    fn grid(count: usize) -> Vec<Point> {
        (0..count)
            .map(|i| Point {
                id: i as u64 + 1,
                x: (i as f64 * 0.733).fract(),
                y: (i as f64 * 0.377).fract(),
            })
            .collect()
    }

    fn total_points(stripes: &StripeSet, training: bool) -> usize {
        (0..stripes.len())
            .map(|i| {
                if training {
                    stripes.training(i).len()
                } else {
                    stripes.input(i).len()
                }
            })
            .sum()
    }

    #[rstest]
    #[case::serial(false)]
    #[case::parallel(true)]
    fn every_point_lands_in_exactly_one_stripe(#[case] parallel_split: bool) {
        let input = grid(101);
        let training = grid(157);
        let options = StripeOptions {
            stripes: 7,
            parallel_split,
            ..StripeOptions::default()
        };
        let stripes = StripeSet::build(&input, &training, k(3), &options);
        assert_eq!(total_points(&stripes, false), 101);
        assert_eq!(total_points(&stripes, true), 157);
    }

    #[rstest]
    #[case::serial(false)]
    #[case::parallel(true)]
    fn stripes_are_sorted_by_x_with_monotone_bounds(#[case] parallel_split: bool) {
        let input = grid(64);
        let training = grid(64);
        let options = StripeOptions {
            stripes: 4,
            parallel_split,
            ..StripeOptions::default()
        };
        let stripes = StripeSet::build(&input, &training, k(2), &options);
        for i in 0..stripes.len() {
            for pair in stripes.input(i).windows(2) {
                assert!(pair[0].x <= pair[1].x);
            }
            for pair in stripes.training(i).windows(2) {
                assert!(pair[0].x <= pair[1].x);
            }
            let bounds = stripes.bounds(i);
            assert!(bounds.min_y <= bounds.max_y);
            if i + 1 < stripes.len() {
                assert!(bounds.max_y <= stripes.bounds(i + 1).min_y + 1e-12);
            }
        }
        assert_eq!(
            stripes.bounds(stripes.len() - 1).max_y,
            MAX_Y_SENTINEL
        );
    }

    #[test]
    fn serial_and_parallel_splits_agree() {
        let input = grid(200);
        let training = grid(321);
        let base = StripeOptions {
            stripes: 9,
            ..StripeOptions::default()
        };
        let serial = StripeSet::build(&input, &training, k(4), &base);
        let parallel = StripeSet::build(
            &input,
            &training,
            k(4),
            &StripeOptions {
                parallel_split: true,
                ..base
            },
        );
        assert_eq!(serial.len(), parallel.len());
        for i in 0..serial.len() {
            assert_eq!(serial.input(i), parallel.input(i));
            assert_eq!(serial.training(i), parallel.training(i));
            assert_eq!(serial.bounds(i), parallel.bounds(i));
        }
    }

    #[test]
    fn equal_y_runs_never_straddle_a_boundary() {
        // Ten points all at y = 0.5 plus a few above and below.
        let mut input: Vec<Point> = (0..10)
            .map(|i| Point {
                id: i + 1,
                x: i as f64 / 10.0,
                y: 0.5,
            })
            .collect();
        input.push(Point { id: 11, x: 0.1, y: 0.1 });
        input.push(Point { id: 12, x: 0.2, y: 0.9 });
        let training = input.clone();
        let options = StripeOptions {
            stripes: 4,
            ..StripeOptions::default()
        };
        let stripes = StripeSet::build(&input, &training, k(2), &options);
        // The equal-y run must sit whole inside a single stripe.
        let containing: Vec<usize> = (0..stripes.len())
            .filter(|&i| stripes.input(i).iter().any(|p| p.y == 0.5))
            .collect();
        assert_eq!(containing.len(), 1);
        let run = containing[0];
        assert_eq!(
            stripes.input(run).iter().filter(|p| p.y == 0.5).count(),
            10
        );
    }

    #[test]
    fn splitting_by_training_balances_training_counts() {
        let input = grid(40);
        let training = grid(160);
        let options = StripeOptions {
            stripes: 8,
            split_by_training: true,
            ..StripeOptions::default()
        };
        let stripes = StripeSet::build(&input, &training, k(2), &options);
        assert_eq!(total_points(&stripes, true), 160);
        assert_eq!(total_points(&stripes, false), 40);
        for i in 0..stripes.len() {
            assert!(stripes.training(i).len() >= 160 / 8);
        }
    }

    #[rstest]
    #[case(10_000, 5, 45)]
    #[case(100, 1, 10)]
    #[case(1, 5, 1)]
    fn heuristic_matches_the_square_root_rule(
        #[case] training_len: usize,
        #[case] neighbours: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(optimal_stripe_count(training_len, k(neighbours)), expected);
    }

    #[test]
    fn more_stripes_than_points_degenerates_to_one_point_stripes() {
        let input = grid(3);
        let training = grid(50);
        let options = StripeOptions {
            stripes: 10,
            ..StripeOptions::default()
        };
        let stripes = StripeSet::build(&input, &training, k(1), &options);
        assert_eq!(stripes.len(), 3);
        assert_eq!(total_points(&stripes, false), 3);
        assert_eq!(total_points(&stripes, true), 50);
    }
}
