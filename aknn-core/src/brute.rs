//! Brute-force baselines.
//!
//! Exhaustive O(|I|·|T|) scans, serial and rayon-parallel. These exist for
//! benchmarking and as the reference the stripe algorithms are verified
//! against; there is no pruning, only the bounded heap.

use rayon::prelude::*;

use std::num::NonZeroUsize;

use crate::heap::NeighbourHeap;
use crate::point::Point;
use crate::result::NeighbourList;

fn scan_point(point: &Point, training: &[Point], k: NonZeroUsize) -> NeighbourList {
    let mut heap = NeighbourHeap::new(k);
    for candidate in training {
        heap.add(candidate.id, point.distance_squared_to(candidate));
    }
    heap.into_sorted_list()
}

/// Computes every input point's k nearest training points exhaustively.
///
/// Lists are returned in input order (slot `id - 1`).
#[must_use]
pub fn brute_force(
    input: &[Point],
    training: &[Point],
    k: NonZeroUsize,
    parallel: bool,
) -> Vec<NeighbourList> {
    let mut lists = vec![NeighbourList::default(); input.len()];
    if parallel {
        let computed: Vec<(u64, NeighbourList)> = input
            .par_iter()
            .map(|point| (point.id, scan_point(point, training, k)))
            .collect();
        for (id, list) in computed {
            lists[id as usize - 1] = list;
        }
    } else {
        for point in input {
            lists[point.id as usize - 1] = scan_point(point, training, k);
        }
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn k(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("k must be non-zero")
    }

    #[rstest]
    #[case::serial(false)]
    #[case::parallel(true)]
    fn single_point_scenario(#[case] parallel: bool) {
        let input = vec![Point { id: 1, x: 0.5, y: 0.5 }];
        let training = vec![
            Point { id: 1, x: 0.0, y: 0.0 },
            Point { id: 2, x: 1.0, y: 1.0 },
            Point { id: 3, x: 0.25, y: 0.75 },
        ];
        let lists = brute_force(&input, &training, k(2), parallel);
        assert_eq!(lists.len(), 1);
        let neighbours = &lists[0].neighbours;
        assert_eq!(neighbours[0].point_id, 3);
        assert!((neighbours[0].distance_squared - 0.125).abs() < 1e-15);
        assert_eq!(neighbours[1].point_id, 1);
        assert!((neighbours[1].distance_squared - 0.5).abs() < 1e-15);
    }

    #[test]
    fn fewer_training_points_than_k_leaves_sentinels() {
        let input = vec![Point { id: 1, x: 0.5, y: 0.5 }];
        let training = vec![Point { id: 1, x: 0.5, y: 0.25 }];
        let lists = brute_force(&input, &training, k(3), false);
        let neighbours = &lists[0].neighbours;
        assert_eq!(neighbours[0].point_id, 1);
        assert!(neighbours[1].is_sentinel());
        assert!(neighbours[2].is_sentinel());
        assert_eq!(lists[0].additions, 1);
    }
}
