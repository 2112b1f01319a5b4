//! Result model: per-point neighbour lists, run statistics, the results-file
//! writer, and result comparison.
//!
//! Internal algorithms keep every list in memory; the external algorithm
//! leaves the sorted neighbour stream on disk and streams it back out. Both
//! shapes are read through the same cursor so saving and comparing never
//! care where the neighbours live.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use crate::error::{KnnError, Result};
use crate::external::store::{ChunkedReader, RecordFile, ScratchDir};
use crate::point::{Neighbour, NeighbourExt};

/// The finished ascending-distance neighbour list of one input point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighbourList {
    /// Neighbours in ascending distance order; sentinels last.
    pub neighbours: Vec<Neighbour>,
    /// Heap insertions performed while searching for this point.
    pub additions: u64,
}

/// Aggregate heap-addition counters across all input points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeapStats {
    /// Sum of insertions over all points.
    pub total_additions: u64,
    /// Smallest per-point insertion count.
    pub min_additions: u64,
    /// Largest per-point insertion count.
    pub max_additions: u64,
    /// Mean per-point insertion count.
    pub avg_additions: f64,
}

impl HeapStats {
    /// Computes the aggregate over finished lists.
    #[must_use]
    pub fn from_lists(lists: &[NeighbourList]) -> Self {
        let mut accumulator = HeapStatsAccumulator::default();
        for list in lists {
            accumulator.record(list.additions);
        }
        accumulator.finish()
    }
}

/// Incremental [`HeapStats`] builder used by the external commit phase, which
/// never holds all lists at once.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HeapStatsAccumulator {
    total: u64,
    min: u64,
    max: u64,
    count: u64,
}

impl Default for HeapStatsAccumulator {
    fn default() -> Self {
        Self {
            total: 0,
            min: u64::MAX,
            max: 0,
            count: 0,
        }
    }
}

impl HeapStatsAccumulator {
    pub(crate) fn record(&mut self, additions: u64) {
        self.total += additions;
        self.min = self.min.min(additions);
        self.max = self.max.max(additions);
        self.count += 1;
    }

    pub(crate) fn finish(self) -> HeapStats {
        if self.count == 0 {
            return HeapStats::default();
        }
        HeapStats {
            total_additions: self.total,
            min_additions: self.min,
            max_additions: self.max,
            avg_additions: self.total as f64 / self.count as f64,
        }
    }
}

/// Timings and counters describing one algorithm run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunStats {
    /// Wall-clock seconds for the whole run.
    pub total_seconds: f64,
    /// Seconds spent sorting and splitting into stripes.
    pub sort_seconds: f64,
    /// Seconds spent in the single-threaded window commit phase.
    pub commit_seconds: f64,
    /// Seconds spent in the final external sort of the neighbour stream.
    pub final_sort_seconds: f64,
    /// Aggregate heap counters.
    pub heap: HeapStats,
    /// Stripes actually used (0 for the brute-force baselines).
    pub num_stripes: usize,
    /// The windowed scheduler could not fit a single stripe in the budget;
    /// the result carries no valid neighbour output.
    pub has_allocation_error: bool,
    /// Peak size of the pending map across window commits.
    pub pending_points: usize,
    /// Windows processed during the ascending first pass.
    pub first_pass_windows: usize,
    /// Windows processed during the descending second pass.
    pub second_pass_windows: usize,
}

#[derive(Debug)]
enum ResultStore {
    Memory(Vec<NeighbourList>),
    External {
        file: RecordFile<NeighbourExt>,
        _scratch: Arc<ScratchDir>,
    },
    Unavailable,
}

/// The outcome of one algorithm run over a problem.
#[derive(Debug)]
pub struct KnnResult {
    k: NonZeroUsize,
    input_len: usize,
    store: ResultStore,
    stats: RunStats,
}

impl KnnResult {
    /// Wraps in-memory neighbour lists (internal algorithms).
    #[must_use]
    pub fn from_lists(k: NonZeroUsize, lists: Vec<NeighbourList>, stats: RunStats) -> Self {
        let input_len = lists.len();
        Self {
            k,
            input_len,
            store: ResultStore::Memory(lists),
            stats,
        }
    }

    pub(crate) fn from_external(
        k: NonZeroUsize,
        input_len: usize,
        file: RecordFile<NeighbourExt>,
        scratch: Arc<ScratchDir>,
        stats: RunStats,
    ) -> Self {
        Self {
            k,
            input_len,
            store: ResultStore::External {
                file,
                _scratch: scratch,
            },
            stats,
        }
    }

    pub(crate) fn unavailable(k: NonZeroUsize, input_len: usize, stats: RunStats) -> Self {
        Self {
            k,
            input_len,
            store: ResultStore::Unavailable,
            stats,
        }
    }

    /// Statistics of the run.
    #[must_use]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Number of neighbours per input point.
    #[must_use]
    pub fn k(&self) -> NonZeroUsize {
        self.k
    }

    /// Number of input points covered.
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// True when the run aborted with an allocation error and holds no
    /// neighbour output.
    #[must_use]
    pub fn has_allocation_error(&self) -> bool {
        self.stats.has_allocation_error
    }

    /// The in-memory lists, when this result holds them.
    #[must_use]
    pub fn lists(&self) -> Option<&[NeighbourList]> {
        match &self.store {
            ResultStore::Memory(lists) => Some(lists),
            _ => None,
        }
    }

    fn cursor(&self) -> Result<ListCursor<'_>> {
        match &self.store {
            ResultStore::Memory(lists) => Ok(ListCursor::Memory { lists, next: 0 }),
            ResultStore::External { file, .. } => Ok(ListCursor::External {
                reader: ChunkedReader::new(file, 8192),
                k: self.k.get(),
            }),
            ResultStore::Unavailable => Err(KnnError::ResultUnavailable),
        }
    }

    /// Writes the results text file: one line per input point,
    /// `id\t(nbrId d²)…` in ascending distance, `NULL` for sentinel ids.
    ///
    /// # Errors
    /// Returns [`KnnError::ResultUnavailable`] when the run aborted with an
    /// allocation error, and I/O errors as [`KnnError::ResultFile`].
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut cursor = self.cursor()?;
        let file = File::create(path).map_err(|source| KnnError::ResultFile {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        let mut write = |id: u64, neighbours: &[Neighbour]| -> std::io::Result<()> {
            write!(writer, "{id}")?;
            for neighbour in neighbours {
                if neighbour.is_sentinel() {
                    write!(writer, "\t(NULL {})", neighbour.distance_squared)?;
                } else {
                    write!(
                        writer,
                        "\t({} {})",
                        neighbour.point_id, neighbour.distance_squared
                    )?;
                }
            }
            writeln!(writer)
        };
        while let Some((id, neighbours)) = cursor.next_list()? {
            write(id, &neighbours).map_err(|source| KnnError::ResultFile {
                path: path.to_path_buf(),
                source,
            })?;
        }
        writer.flush().map_err(|source| KnnError::ResultFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compares neighbour distances against a reference result.
    ///
    /// Returns the ids of input points whose distance sequences differ by
    /// more than `accuracy` at any rank. Neighbour identifiers are not
    /// compared: equal distances may legitimately resolve to different
    /// training points depending on stripe visitation order.
    ///
    /// # Errors
    /// Returns [`KnnError::ResultUnavailable`] when either result aborted
    /// with an allocation error.
    pub fn find_differences(&self, reference: &Self, accuracy: f64) -> Result<Vec<u64>> {
        let mut mine = self.cursor()?;
        let mut theirs = reference.cursor()?;
        let mut differences = Vec::new();
        loop {
            match (mine.next_list()?, theirs.next_list()?) {
                (None, None) => break,
                (Some((id, lhs)), Some((other_id, rhs))) => {
                    if id != other_id || !lists_agree(&lhs, &rhs, accuracy) {
                        differences.push(id);
                    }
                }
                (Some((id, _)), None) => differences.push(id),
                (None, Some((id, _))) => differences.push(id),
            }
        }
        Ok(differences)
    }
}

fn lists_agree(lhs: &[Neighbour], rhs: &[Neighbour], accuracy: f64) -> bool {
    lhs.len() == rhs.len()
        && lhs.iter().zip(rhs).all(|(a, b)| {
            let diff = a.distance_squared - b.distance_squared;
            diff.abs() <= accuracy || (a.is_sentinel() && b.is_sentinel())
        })
}

enum ListCursor<'a> {
    Memory {
        lists: &'a [NeighbourList],
        next: usize,
    },
    External {
        reader: ChunkedReader<'a, NeighbourExt>,
        k: usize,
    },
}

impl ListCursor<'_> {
    fn next_list(&mut self) -> Result<Option<(u64, Vec<Neighbour>)>> {
        match self {
            Self::Memory { lists, next } => {
                let Some(list) = lists.get(*next) else {
                    return Ok(None);
                };
                *next += 1;
                Ok(Some((*next as u64, list.neighbours.clone())))
            }
            Self::External { reader, k } => {
                let Some(first) = reader.next_record()? else {
                    return Ok(None);
                };
                let mut neighbours = Vec::with_capacity(*k);
                neighbours.push(Neighbour {
                    point_id: first.point_id,
                    distance_squared: first.distance_squared,
                });
                for _ in 1..*k {
                    let Some(entry) = reader.next_record()? else {
                        break;
                    };
                    debug_assert_eq!(entry.input_id, first.input_id);
                    neighbours.push(Neighbour {
                        point_id: entry.point_id,
                        distance_squared: entry.distance_squared,
                    });
                }
                Ok(Some((first.input_id, neighbours)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn k(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("k must be non-zero")
    }

    fn list(pairs: &[(u64, f64)]) -> NeighbourList {
        NeighbourList {
            neighbours: pairs
                .iter()
                .map(|&(point_id, distance_squared)| Neighbour {
                    point_id,
                    distance_squared,
                })
                .collect(),
            additions: pairs.len() as u64,
        }
    }

    #[test]
    fn heap_stats_aggregate_over_lists() {
        let lists = vec![list(&[(1, 0.1)]), list(&[(2, 0.2), (3, 0.3)])];
        let stats = HeapStats::from_lists(&lists);
        assert_eq!(stats.total_additions, 3);
        assert_eq!(stats.min_additions, 1);
        assert_eq!(stats.max_additions, 2);
        assert!((stats.avg_additions - 1.5).abs() < 1e-12);
    }

    #[test]
    fn save_writes_one_tab_separated_line_per_point() {
        let lists = vec![
            list(&[(3, 0.125), (1, 0.5)]),
            NeighbourList {
                neighbours: vec![
                    Neighbour { point_id: 2, distance_squared: 0.25 },
                    Neighbour::SENTINEL,
                ],
                additions: 1,
            },
        ];
        let result = KnnResult::from_lists(k(2), lists, RunStats::default());
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out.txt");
        result.save_to_file(&path).expect("save");
        let written = std::fs::read_to_string(&path).expect("read");
        assert_eq!(written, "1\t(3 0.125)\t(1 0.5)\n2\t(2 0.25)\t(NULL inf)\n");
    }

    #[test]
    fn find_differences_flags_only_mismatched_points() {
        let lhs = KnnResult::from_lists(
            k(2),
            vec![list(&[(1, 0.1), (2, 0.2)]), list(&[(1, 0.3), (2, 0.4)])],
            RunStats::default(),
        );
        let rhs = KnnResult::from_lists(
            k(2),
            vec![list(&[(9, 0.1), (8, 0.2)]), list(&[(1, 0.3), (2, 0.9)])],
            RunStats::default(),
        );
        let differences = lhs.find_differences(&rhs, 1e-12).expect("compare");
        assert_eq!(differences, vec![2]);
    }

    #[test]
    fn unavailable_results_refuse_to_save() {
        let stats = RunStats {
            has_allocation_error: true,
            ..RunStats::default()
        };
        let result = KnnResult::unavailable(k(2), 10, stats);
        let dir = TempDir::new().expect("tempdir");
        let err = result
            .save_to_file(&dir.path().join("out.txt"))
            .expect_err("must refuse");
        assert!(matches!(err, KnnError::ResultUnavailable));
    }
}
