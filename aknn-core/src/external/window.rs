//! A resident window of stripes and the memory estimates that size it.
//!
//! First-pass windows hold input points, training points, and one neighbour
//! heap per input point; second-pass windows hold training points only,
//! because every unfinished input point already lives in the pending map.

use std::mem;
use std::num::NonZeroUsize;

use crate::error::Result;
use crate::external::split::StripedData;
use crate::heap::NeighbourHeap;
use crate::point::{Neighbour, Point, StripeBounds};

/// Fixed headroom reserved before any stripe is admitted to a window. Covers
/// allocator slack and the window's own bookkeeping.
pub(crate) const WINDOW_HEADROOM_BYTES: u64 = 64 * 1024;

/// Estimated hash-map slot overhead per pending point.
pub(crate) const PENDING_ENTRY_OVERHEAD_BYTES: u64 = 48;

/// In-memory footprint of one point.
pub(crate) fn point_cost_bytes() -> u64 {
    mem::size_of::<Point>() as u64
}

/// In-memory footprint of one neighbour heap of size `k`.
pub(crate) fn heap_cost_bytes(k: NonZeroUsize) -> u64 {
    (mem::size_of::<NeighbourHeap>() + k.get() * mem::size_of::<Neighbour>()) as u64
}

/// A contiguous range of stripes resident in memory.
#[derive(Debug)]
pub(crate) struct StripesWindow {
    /// First stripe of the window (absolute index).
    pub(crate) start: usize,
    /// Last stripe of the window, inclusive.
    pub(crate) end: usize,
    /// True for the descending training-only pass.
    pub(crate) second_pass: bool,
    /// Input points per window stripe, x-sorted; empty in the second pass.
    pub(crate) input: Vec<Vec<Point>>,
    /// Training points per window stripe, x-sorted.
    pub(crate) training: Vec<Vec<Point>>,
    /// Bounds per window stripe.
    pub(crate) bounds: Vec<StripeBounds>,
    /// One heap per input point, parallel to `input`; empty in the second
    /// pass.
    pub(crate) heaps: Vec<Vec<NeighbourHeap>>,
}

impl StripesWindow {
    /// Loads stripes `[start, end]` from the striped files.
    pub(crate) fn load(
        striped: &StripedData,
        start: usize,
        end: usize,
        second_pass: bool,
        k: NonZeroUsize,
    ) -> Result<Self> {
        let stripe_count = end - start + 1;
        let mut input = Vec::with_capacity(if second_pass { 0 } else { stripe_count });
        let mut training = Vec::with_capacity(stripe_count);
        let mut bounds = Vec::with_capacity(stripe_count);
        let mut heaps = Vec::with_capacity(if second_pass { 0 } else { stripe_count });

        for stripe in start..=end {
            training.push(striped.training.read_range(
                striped.training_offsets[stripe],
                usize::try_from(striped.training_counts[stripe]).unwrap_or(0),
            )?);
            bounds.push(striped.bounds[stripe]);
            if !second_pass {
                let points = striped.input.read_range(
                    striped.input_offsets[stripe],
                    usize::try_from(striped.input_counts[stripe]).unwrap_or(0),
                )?;
                heaps.push(vec![NeighbourHeap::new(k); points.len()]);
                input.push(points);
            }
        }

        Ok(Self {
            start,
            end,
            second_pass,
            input,
            training,
            bounds,
            heaps,
        })
    }

    /// Number of stripes resident in the window.
    pub(crate) fn stripe_count(&self) -> usize {
        self.end - self.start + 1
    }
}
