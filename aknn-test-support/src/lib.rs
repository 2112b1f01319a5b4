//! Shared test utilities used across aknn crates: deterministic dataset
//! generation and an independent exhaustive oracle for verifying neighbour
//! distances.

use aknn_core::Point;
use rand::{Rng, SeedableRng, rngs::SmallRng};

/// Generates `count` points uniformly distributed over the unit square, with
/// ids `1..=count`, deterministically from `seed`.
///
/// # Examples
/// ```
/// let points = aknn_test_support::uniform_points(10, 42);
/// assert_eq!(points.len(), 10);
/// assert!(points.iter().all(|p| (0.0..1.0).contains(&p.x)));
/// assert_eq!(points, aknn_test_support::uniform_points(10, 42));
/// ```
#[must_use]
pub fn uniform_points(count: usize, seed: u64) -> Vec<Point> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|i| Point {
            id: i as u64 + 1,
            x: rng.gen_range(0.0..1.0),
            y: rng.gen_range(0.0..1.0),
        })
        .collect()
}

/// Exhaustively computes the ascending squared distances of the `k` nearest
/// training points for every input point, independently of the crate's own
/// heap machinery. Missing neighbours (when `|T| < k`) appear as `f64::INFINITY`.
#[must_use]
pub fn reference_distances(input: &[Point], training: &[Point], k: usize) -> Vec<Vec<f64>> {
    input
        .iter()
        .map(|point| {
            let mut distances: Vec<f64> = training
                .iter()
                .map(|candidate| point.distance_squared_to(candidate))
                .collect();
            distances.sort_by(f64::total_cmp);
            distances.resize(k, f64::INFINITY);
            distances
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic_per_seed() {
        assert_eq!(uniform_points(32, 1), uniform_points(32, 1));
        assert_ne!(uniform_points(32, 1), uniform_points(32, 2));
    }

    #[test]
    fn oracle_pads_with_infinity() {
        let input = vec![Point { id: 1, x: 0.0, y: 0.0 }];
        let training = vec![Point { id: 1, x: 0.5, y: 0.0 }];
        let distances = reference_distances(&input, &training, 3);
        assert_eq!(distances[0][0], 0.25);
        assert!(distances[0][1].is_infinite());
        assert!(distances[0][2].is_infinite());
    }
}
