//! All-k-nearest-neighbours over the unit square, accelerated by the
//! plane-sweep stripes family of algorithms.
//!
//! The crate computes, for every point of an input set, the k nearest points
//! of a training set under squared Euclidean distance. The plane is cut into
//! horizontal stripes sorted by y; each stripe is swept along x with a
//! two-pointer walk pruned by the current k-th distance in both axes. Work
//! is parallelised over stripes (or over the points within one) with rayon,
//! and a windowed out-of-core variant processes training sets larger than
//! memory through a two-pass traversal that carries unfinished searches
//! between windows.

mod algorithm;
mod brute;
mod dataset;
mod error;
mod external;
mod heap;
mod internal;
mod point;
mod problem;
mod result;
mod stripes;
mod sweep;

pub use crate::{
    algorithm::{BruteForce, KnnAlgorithm, PlaneSweepStripes, PlaneSweepStripesExternal},
    brute::brute_force,
    dataset::{is_binary_dataset, load_points, parse_record, write_points, POINT_RECORD_BYTES},
    error::{
        DatasetError, DatasetErrorCode, DatasetKind, KnnError, KnnErrorCode, Result,
    },
    heap::{NeighbourHeap, SweepControl},
    point::{MAX_Y_SENTINEL, Neighbour, NeighbourExt, Point, StripeBounds},
    problem::{ExternalData, KnnProblem},
    result::{HeapStats, KnnResult, NeighbourList, RunStats},
    stripes::{StripeOptions, StripeSet, optimal_stripe_count},
    sweep::sweep_stripe,
};
