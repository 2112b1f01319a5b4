//! Out-of-core stripe construction.
//!
//! Externally sorts both datasets by y under the memory budget, then walks
//! the splitting set serially, stripe by stripe, writing each stripe's
//! x-sorted points to striped record files and keeping only the offset,
//! count, and bounds tables in memory. The paired set is consumed through a
//! running sequential cursor, so nothing is ever held in memory beyond the
//! stripe being built.

use rayon::prelude::*;

use std::num::NonZeroUsize;

use crate::error::Result;
use crate::external::store::{
    ChunkedReader, RecordFile, RecordWriter, ScratchDir, SortKeyF64, external_sort_by_key,
};
use crate::point::{MAX_Y_SENTINEL, Point, StripeBounds};
use crate::problem::ExternalData;
use crate::stripes::{SplitPlan, optimal_stripe_count};

/// Both datasets partitioned into stripes on disk, with the in-memory
/// offset/count/bounds tables the window loader navigates by.
#[derive(Debug)]
pub(crate) struct StripedData {
    pub(crate) input: RecordFile<Point>,
    pub(crate) training: RecordFile<Point>,
    pub(crate) input_offsets: Vec<u64>,
    pub(crate) input_counts: Vec<u64>,
    pub(crate) training_offsets: Vec<u64>,
    pub(crate) training_counts: Vec<u64>,
    pub(crate) bounds: Vec<StripeBounds>,
}

impl StripedData {
    pub(crate) fn stripe_count(&self) -> usize {
        self.bounds.len()
    }
}

/// Accumulates one side (input or training) of the striped output.
struct StripedSide {
    writer: RecordWriter<Point>,
    offsets: Vec<u64>,
    counts: Vec<u64>,
}

impl StripedSide {
    fn create(scratch: &ScratchDir, name: &str) -> Result<Self> {
        Ok(Self {
            writer: RecordWriter::create(scratch.file(name))?,
            offsets: Vec::new(),
            counts: Vec::new(),
        })
    }

    fn push_stripe(&mut self, points: &[Point]) -> Result<()> {
        self.offsets.push(self.writer.count());
        self.counts.push(points.len() as u64);
        self.writer.push_all(points)
    }
}

const SEGMENT_CHUNK_RECORDS: usize = 4096;

/// Splits the external datasets into stripes.
pub(crate) fn split_striped(
    data: &ExternalData,
    k: NonZeroUsize,
    requested_stripes: usize,
    parallel_sort: bool,
    split_by_training: bool,
) -> Result<StripedData> {
    let scratch = data.scratch();
    let budget = data.memory_budget_bytes();

    let input_sorted = external_sort_by_key(&data.input, scratch, "input-by-y", budget, |p| {
        SortKeyF64(p.y)
    })?;
    let training_sorted =
        external_sort_by_key(&data.training, scratch, "training-by-y", budget, |p| {
            SortKeyF64(p.y)
        })?;

    let requested = if requested_stripes > 0 {
        requested_stripes
    } else {
        optimal_stripe_count(
            usize::try_from(training_sorted.count()).unwrap_or(usize::MAX),
            k,
        )
    };

    let (split_file, paired_file) = if split_by_training {
        (&training_sorted, &input_sorted)
    } else {
        (&input_sorted, &training_sorted)
    };

    let split_len = split_file.count();
    let plan = SplitPlan::for_set(usize::try_from(split_len).unwrap_or(usize::MAX), requested);

    let mut split_side = StripedSide::create(
        scratch,
        if split_by_training {
            "striped-training"
        } else {
            "striped-input"
        },
    )?;
    let mut paired_side = StripedSide::create(
        scratch,
        if split_by_training {
            "striped-input"
        } else {
            "striped-training"
        },
    )?;
    let mut bounds = Vec::with_capacity(plan.stripes);
    let mut paired_cursor = ChunkedReader::new(paired_file, SEGMENT_CHUNK_RECORDS);

    for i in 0..plan.stripes {
        let base = i as u64 * plan.stripe_size as u64;
        if base >= split_len {
            split_side.push_stripe(&[])?;
            paired_side.push_stripe(&[])?;
            bounds.push(StripeBounds {
                min_y: MAX_Y_SENTINEL,
                max_y: MAX_Y_SENTINEL,
            });
            continue;
        }

        let segment = read_stripe_segment(split_file, base, plan.stripe_size)?;
        let (start, end) = segment.widened_range(i);
        if start >= end {
            split_side.push_stripe(&[])?;
            paired_side.push_stripe(&[])?;
            bounds.push(StripeBounds {
                min_y: segment.boundary_y.unwrap_or(MAX_Y_SENTINEL),
                max_y: segment.boundary_y.unwrap_or(MAX_Y_SENTINEL),
            });
            continue;
        }

        let min_y = if i > 0 { segment.points[start].y } else { 0.0 };
        let max_y = if i < plan.stripes - 1 {
            segment.boundary_y.unwrap_or(MAX_Y_SENTINEL)
        } else {
            MAX_Y_SENTINEL
        };
        let band = StripeBounds { min_y, max_y };

        let mut split_points = segment.points[start..end].to_vec();
        sort_by_x(&mut split_points, parallel_sort);
        split_side.push_stripe(&split_points)?;

        let mut paired_points = Vec::new();
        while let Some(candidate) = paired_cursor.peek()? {
            if candidate.y < band.max_y {
                paired_points.push(*candidate);
                paired_cursor.next_record()?;
            } else {
                break;
            }
        }
        sort_by_x(&mut paired_points, parallel_sort);
        paired_side.push_stripe(&paired_points)?;

        bounds.push(band);
    }

    let StripedSide {
        writer: split_writer,
        offsets: split_offsets,
        counts: split_counts,
    } = split_side;
    let StripedSide {
        writer: paired_writer,
        offsets: paired_offsets,
        counts: paired_counts,
    } = paired_side;
    let split_records = split_writer.finish()?;
    let paired_records = paired_writer.finish()?;

    drop(paired_cursor);
    input_sorted.remove()?;
    training_sorted.remove()?;

    Ok(if split_by_training {
        StripedData {
            input: paired_records,
            training: split_records,
            input_offsets: paired_offsets,
            input_counts: paired_counts,
            training_offsets: split_offsets,
            training_counts: split_counts,
            bounds,
        }
    } else {
        StripedData {
            input: split_records,
            training: paired_records,
            input_offsets: split_offsets,
            input_counts: split_counts,
            training_offsets: paired_offsets,
            training_counts: paired_counts,
            bounds,
        }
    })
}

fn sort_by_x(points: &mut [Point], parallel: bool) {
    if parallel {
        points.par_sort_by(|a, b| a.x.total_cmp(&b.x));
    } else {
        points.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
}

/// One stripe's worth of the splitting set, read from disk together with the
/// record just before it (for start widening) and the first y just after it
/// (for the upper bound).
struct StripeSegment {
    /// Records covering the stripe range, equal-y extension included.
    points: Vec<Point>,
    /// y of the record preceding the stripe, when any.
    previous_y: Option<f64>,
    /// y of the first record after the (extended) stripe, when any.
    boundary_y: Option<f64>,
}

impl StripeSegment {
    /// Applies the equal-y widening rules, returning the index range of the
    /// stripe within `points`.
    fn widened_range(&self, stripe_index: usize) -> (usize, usize) {
        let end = self.points.len();
        let mut start = 0;
        if stripe_index > 0 {
            // All members of an equal-y run share the predecessor's y, so one
            // comparison against it is the chained walk of the in-memory
            // builder.
            if let Some(previous) = self.previous_y {
                while start < end && self.points[start].y == previous {
                    start += 1;
                }
            }
        }
        (start, end)
    }
}

fn read_stripe_segment(
    split_file: &RecordFile<Point>,
    base: u64,
    stripe_size: usize,
) -> Result<StripeSegment> {
    let previous_y = if base > 0 {
        split_file.read_range(base - 1, 1)?.first().map(|p| p.y)
    } else {
        None
    };

    let mut points = split_file.read_range(base, stripe_size)?;
    let mut next = base + points.len() as u64;
    let mut boundary_y = None;

    // Extend past the nominal end while the y run continues, one chunk at a
    // time, and remember the first y beyond the stripe.
    'extend: while next < split_file.count() {
        let chunk = split_file.read_range(next, SEGMENT_CHUNK_RECORDS)?;
        if chunk.is_empty() {
            break;
        }
        for candidate in &chunk {
            if points.last().map(|p| p.y) == Some(candidate.y) {
                points.push(*candidate);
                next += 1;
            } else {
                boundary_y = Some(candidate.y);
                break 'extend;
            }
        }
    }

    Ok(StripeSegment {
        points,
        previous_y,
        boundary_y,
    })
}
