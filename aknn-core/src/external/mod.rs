//! The windowed out-of-core scheduler.
//!
//! Stripes live on disk; a window of them is loaded at a time, sized so the
//! estimated footprint of its points, heaps, and the pending set stays under
//! 90% of the configured memory budget. The ascending first pass runs the
//! stripe scheduler bounded to the window and records, per heap, how far the
//! search got; points whose search leaves the window are carried in the
//! pending map. A descending second pass closes the downward tails, and the
//! external neighbour stream is finally merge-sorted by `(input id, rank)`.

pub(crate) mod split;
pub(crate) mod store;
pub(crate) mod window;

use rayon::prelude::*;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;

use crate::error::Result;
use crate::external::split::{StripedData, split_striped};
use crate::external::store::{RecordWriter, external_sort_by_key};
use crate::external::window::{
    PENDING_ENTRY_OVERHEAD_BYTES, StripesWindow, WINDOW_HEADROOM_BYTES, heap_cost_bytes,
    point_cost_bytes,
};
use crate::heap::NeighbourHeap;
use crate::point::{NeighbourExt, Point, StripeBounds};
use crate::problem::ExternalData;
use crate::result::{HeapStatsAccumulator, KnnResult, RunStats};
use crate::sweep::sweep_stripe;

/// Configuration of the external algorithm.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ExternalOptions {
    /// Desired stripe count; 0 selects the automatic heuristic.
    pub(crate) stripes: usize,
    /// Sort stripe points with rayon's parallel sort.
    pub(crate) parallel_sort: bool,
    /// Split by the training dataset instead of the input dataset.
    pub(crate) split_by_training: bool,
}

/// An input point whose search spans more than one window, together with its
/// partially filled heap.
#[derive(Debug)]
struct PendingPoint {
    point: Point,
    heap: NeighbourHeap,
}

/// Runs the complete external algorithm over on-disk datasets.
pub(crate) fn run_external(
    data: &ExternalData,
    k: NonZeroUsize,
    options: &ExternalOptions,
) -> Result<KnnResult> {
    let started = Instant::now();
    let striped = split_striped(
        data,
        k,
        options.stripes,
        options.parallel_sort,
        options.split_by_training,
    )?;
    let sort_seconds = started.elapsed().as_secs_f64();
    let input_len = usize::try_from(data.input.count()).unwrap_or(0);

    // The scratch directory is shared between runs over the same problem, so
    // the neighbour stream carries a per-run tag: an earlier result may still
    // be reading its own stream.
    static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let run_tag = format!("neighbours-{}", RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed));

    let mut engine = Engine {
        k,
        data,
        striped,
        pending: HashMap::new(),
        writer: Some(RecordWriter::create(
            data.scratch().file(&format!("{run_tag}-raw")),
        )?),
        additions: HeapStatsAccumulator::default(),
        first_pass_windows: 0,
        second_pass_windows: 0,
        peak_pending: 0,
        commit_seconds: 0.0,
        has_allocation_error: false,
    };

    let stripe_count = engine.striped.stripe_count();
    let mut last_window_start = 0;

    // First pass: ascending stripes.
    let mut next_stripe = 0;
    loop {
        let Some(mut resident) = engine.load_window(next_stripe, false)? else {
            break;
        };
        debug!(start = resident.start, end = resident.end, "got window");
        last_window_start = resident.start;
        let window_end = resident.end;
        let carried = engine.process_window(&mut resident);
        engine.commit_window(resident, carried)?;
        if window_end + 1 >= stripe_count {
            break;
        }
        next_stripe = window_end + 1;
    }

    // Second pass: descending, training stripes only.
    if !engine.has_allocation_error && last_window_start > 0 {
        let mut boundary = last_window_start;
        while boundary > 0 {
            let Some(mut resident) = engine.load_window(boundary - 1, true)? else {
                break;
            };
            debug!(start = resident.start, end = resident.end, "got window");
            boundary = resident.start;
            let carried = engine.process_window(&mut resident);
            engine.commit_window(resident, carried)?;
        }
    }

    let stream = engine
        .writer
        .take()
        .map(RecordWriter::finish)
        .transpose()?;

    let mut stats = RunStats {
        sort_seconds,
        commit_seconds: engine.commit_seconds,
        heap: engine.additions.finish(),
        num_stripes: stripe_count,
        has_allocation_error: engine.has_allocation_error,
        pending_points: engine.peak_pending,
        first_pass_windows: engine.first_pass_windows,
        second_pass_windows: engine.second_pass_windows,
        ..RunStats::default()
    };

    if engine.has_allocation_error {
        if let Some(stream) = stream {
            stream.remove()?;
        }
        stats.total_seconds = started.elapsed().as_secs_f64();
        return Ok(KnnResult::unavailable(k, input_len, stats));
    }

    let Some(stream) = stream else {
        stats.total_seconds = started.elapsed().as_secs_f64();
        return Ok(KnnResult::unavailable(k, input_len, stats));
    };

    debug!(records = stream.count(), "final neighbour sort");
    let final_sort_started = Instant::now();
    let sorted = external_sort_by_key(
        &stream,
        data.scratch(),
        &run_tag,
        data.memory_budget_bytes(),
        |entry| (entry.input_id, entry.rank),
    )?;
    stream.remove()?;
    stats.final_sort_seconds = final_sort_started.elapsed().as_secs_f64();
    stats.total_seconds = started.elapsed().as_secs_f64();

    Ok(KnnResult::from_external(
        k,
        input_len,
        sorted,
        data.scratch().clone(),
        stats,
    ))
}

struct Engine<'a> {
    k: NonZeroUsize,
    data: &'a ExternalData,
    striped: StripedData,
    pending: HashMap<u64, PendingPoint>,
    writer: Option<RecordWriter<NeighbourExt>>,
    additions: HeapStatsAccumulator,
    first_pass_windows: usize,
    second_pass_windows: usize,
    peak_pending: usize,
    commit_seconds: f64,
    has_allocation_error: bool,
}

impl Engine<'_> {
    /// Estimated footprint that exists regardless of which stripes are
    /// resident: the pending set, the stripe tables, and fixed headroom.
    fn fixed_cost(&self) -> u64 {
        let heap = heap_cost_bytes(self.k);
        let pending = self.pending.len() as u64
            * (point_cost_bytes() + heap + PENDING_ENTRY_OVERHEAD_BYTES);
        let tables = self.striped.stripe_count() as u64
            * (4 * std::mem::size_of::<u64>() as u64
                + std::mem::size_of::<StripeBounds>() as u64);
        pending + tables + WINDOW_HEADROOM_BYTES
    }

    fn stripe_cost(&self, stripe: usize, second_pass: bool) -> u64 {
        let training = self.striped.training_counts[stripe] * point_cost_bytes();
        if second_pass {
            return training;
        }
        let inputs = self.striped.input_counts[stripe];
        training + inputs * (point_cost_bytes() + heap_cost_bytes(self.k))
    }

    /// Sizes and loads the next window. Returns `None` — flagging the
    /// allocation error — when not even one stripe fits the budget.
    fn load_window(&mut self, from: usize, second_pass: bool) -> Result<Option<StripesWindow>> {
        let safe_budget = self.data.memory_budget_bytes() / 10 * 9;
        let mut used = self.fixed_cost();

        let (start, end) = if second_pass {
            let end = from;
            let mut start = from + 1;
            while start > 0 {
                let cost = self.stripe_cost(start - 1, true);
                if used + cost <= safe_budget {
                    used += cost;
                    start -= 1;
                } else {
                    break;
                }
            }
            if start > end {
                debug!(from, second_pass, "window allocation failed");
                self.has_allocation_error = true;
                return Ok(None);
            }
            (start, end)
        } else {
            let stripe_count = self.striped.stripe_count();
            let mut past_end = from;
            while past_end < stripe_count {
                let cost = self.stripe_cost(past_end, false);
                if used + cost <= safe_budget {
                    used += cost;
                    past_end += 1;
                } else {
                    break;
                }
            }
            if past_end == from {
                debug!(from, second_pass, "window allocation failed");
                self.has_allocation_error = true;
                return Ok(None);
            }
            (from, past_end - 1)
        };

        let resident = StripesWindow::load(&self.striped, start, end, second_pass, self.k)?;
        if second_pass {
            self.second_pass_windows += 1;
        } else {
            self.first_pass_windows += 1;
        }
        Ok(Some(resident))
    }

    /// Walks carried points and fresh window points. Returns the carried
    /// points (removed from the pending map) for the commit step.
    fn process_window(&mut self, resident: &mut StripesWindow) -> Vec<(u64, PendingPoint)> {
        let stripe_count = self.striped.stripe_count();
        let mut carried = self.take_pending_for_window(resident);

        {
            let window: &StripesWindow = resident;
            carried.par_iter_mut().for_each(|(_, pending)| {
                continue_search(&pending.point, &mut pending.heap, window, stripe_count);
            });
        }

        if !resident.second_pass {
            process_fresh_points(resident, stripe_count);
        }
        carried
    }

    /// Removes from the pending map every point this window can advance.
    fn take_pending_for_window(&mut self, resident: &StripesWindow) -> Vec<(u64, PendingPoint)> {
        let ids: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, pending)| {
                if resident.second_pass {
                    pending.heap.low_stripe() > resident.start
                } else {
                    pending.heap.high_stripe() < resident.end
                }
            })
            .map(|(&id, _)| id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|pending| (id, pending)))
            .collect()
    }

    fn search_is_complete(&self, heap: &NeighbourHeap) -> bool {
        heap.low_stripe() == 0 && heap.high_stripe() + 1 >= self.striped.stripe_count()
    }

    /// Single-threaded commit: completed points stream out, unfinished fresh
    /// points join the pending map.
    fn commit_window(
        &mut self,
        resident: StripesWindow,
        carried: Vec<(u64, PendingPoint)>,
    ) -> Result<()> {
        let commit_started = Instant::now();
        debug!(start = resident.start, end = resident.end, "commit window");

        for (id, pending) in carried {
            if self.search_is_complete(&pending.heap) {
                self.emit(id, pending.heap)?;
            } else {
                self.pending.insert(id, pending);
            }
        }

        if !resident.second_pass {
            let StripesWindow { input, heaps, .. } = resident;
            for (points, stripe_heaps) in input.into_iter().zip(heaps) {
                for (point, heap) in points.into_iter().zip(stripe_heaps) {
                    if self.search_is_complete(&heap) {
                        self.emit(point.id, heap)?;
                    } else {
                        self.pending.insert(point.id, PendingPoint { point, heap });
                    }
                }
            }
        }

        self.peak_pending = self.peak_pending.max(self.pending.len());
        self.commit_seconds += commit_started.elapsed().as_secs_f64();
        Ok(())
    }

    /// Appends a completed point's neighbours to the external stream.
    fn emit(&mut self, input_id: u64, mut heap: NeighbourHeap) -> Result<()> {
        self.additions.record(heap.additions());
        if let Some(writer) = self.writer.as_mut() {
            for (rank, neighbour) in heap.drain_sorted().into_iter().enumerate() {
                writer.push(&NeighbourExt {
                    input_id,
                    rank: rank as u32,
                    point_id: neighbour.point_id,
                    distance_squared: neighbour.distance_squared,
                })?;
            }
        }
        Ok(())
    }
}

/// Resumes one carried point through the resident window, in the pass's
/// direction, until pruning closes the search or the window edge is reached.
fn continue_search(
    point: &Point,
    heap: &mut NeighbourHeap,
    resident: &StripesWindow,
    stripe_count: usize,
) {
    let descending = resident.second_pass;
    let mut current = if descending {
        heap.low_stripe() - 1
    } else {
        heap.high_stripe() + 1
    };

    loop {
        let relative = current - resident.start;
        let gap = if descending {
            point.y - resident.bounds[relative].max_y
        } else {
            resident.bounds[relative].min_y - point.y
        };
        let gap_squared = gap * gap;

        if gap_squared < heap.top_distance_squared() {
            sweep_stripe(point, &resident.training[relative], gap_squared, heap);
            let at_edge = if descending {
                current == resident.start
            } else {
                current == resident.end
            };
            if at_edge {
                if descending {
                    heap.set_low_stripe(current);
                } else {
                    heap.set_high_stripe(current);
                }
                break;
            }
            if descending {
                current -= 1;
            } else {
                current += 1;
            }
        } else {
            // Pruned: the search is finished on this side for good.
            if descending {
                heap.set_low_stripe(0);
            } else {
                heap.set_high_stripe(stripe_count - 1);
            }
            break;
        }
    }
}

/// The window-bounded stripe scheduler for points seen for the first time.
fn process_fresh_points(resident: &mut StripesWindow, stripe_count: usize) {
    let workers = rayon::current_num_threads();
    let window_start = resident.start;
    let window_end = resident.end;
    let bounds = &resident.bounds;
    let training = &resident.training;
    let input = &resident.input;

    let search = |stripe_offset: usize, point: &Point, heap: &mut NeighbourHeap| {
        search_fresh_point(
            point,
            heap,
            stripe_offset,
            window_start,
            window_end,
            stripe_count,
            bounds,
            training,
        );
    };

    if resident.stripe_count() >= workers {
        resident
            .heaps
            .par_iter_mut()
            .enumerate()
            .for_each(|(stripe_offset, stripe_heaps)| {
                for (point, heap) in input[stripe_offset].iter().zip(stripe_heaps.iter_mut()) {
                    search(stripe_offset, point, heap);
                }
            });
    } else {
        for (stripe_offset, stripe_heaps) in resident.heaps.iter_mut().enumerate() {
            input[stripe_offset]
                .par_iter()
                .zip(stripe_heaps.par_iter_mut())
                .for_each(|(point, heap)| search(stripe_offset, point, heap));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn search_fresh_point(
    point: &Point,
    heap: &mut NeighbourHeap,
    stripe_offset: usize,
    window_start: usize,
    window_end: usize,
    stripe_count: usize,
    bounds: &[StripeBounds],
    training: &[Vec<Point>],
) {
    let own = window_start + stripe_offset;
    sweep_stripe(point, &training[stripe_offset], 0.0, heap);

    let mut low_done = own == window_start;
    let mut high_done = own == window_end;
    // Record the search extent up front so the commit step can always tell
    // whether the window edge or the prune ended each direction.
    if low_done {
        heap.set_low_stripe(own);
    }
    if high_done {
        heap.set_high_stripe(own);
    }

    let mut below = own;
    let mut above = own;

    while !low_done || !high_done {
        if !low_done {
            let candidate = below - 1;
            let relative = candidate - window_start;
            let gap = point.y - bounds[relative].max_y;
            let gap_squared = gap * gap;
            if gap_squared < heap.top_distance_squared() {
                sweep_stripe(point, &training[relative], gap_squared, heap);
                if candidate == window_start {
                    low_done = true;
                    heap.set_low_stripe(window_start);
                } else {
                    below = candidate;
                }
            } else {
                low_done = true;
                heap.set_low_stripe(0);
            }
        }

        if !high_done {
            let candidate = above + 1;
            let relative = candidate - window_start;
            let gap = bounds[relative].min_y - point.y;
            let gap_squared = gap * gap;
            if gap_squared < heap.top_distance_squared() {
                sweep_stripe(point, &training[relative], gap_squared, heap);
                if candidate == window_end {
                    high_done = true;
                    heap.set_high_stripe(window_end);
                } else {
                    above = candidate;
                }
            } else {
                high_done = true;
                heap.set_high_stripe(stripe_count - 1);
            }
        }
    }
}
