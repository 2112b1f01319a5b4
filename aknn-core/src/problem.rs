//! Problem definition: the two datasets, the neighbour count, and — for the
//! out-of-core variant — the memory budget and scratch storage.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use crate::dataset::{for_each_point, load_points};
use crate::error::{DatasetKind, KnnError, Result};
use crate::external::store::{RecordFile, RecordWriter, ScratchDir};
use crate::point::Point;

/// Storage backing an external problem: both datasets as on-disk record
/// files plus the configured memory budget.
#[derive(Debug)]
pub struct ExternalData {
    pub(crate) input: RecordFile<Point>,
    pub(crate) training: RecordFile<Point>,
    memory_budget_bytes: u64,
    scratch: Arc<ScratchDir>,
}

impl ExternalData {
    /// Configured memory budget in bytes.
    #[must_use]
    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_bytes
    }

    pub(crate) fn scratch(&self) -> &Arc<ScratchDir> {
        &self.scratch
    }
}

#[derive(Debug)]
enum ProblemData {
    Memory {
        input: Vec<Point>,
        training: Vec<Point>,
    },
    External(ExternalData),
}

/// An all-k-nearest-neighbours problem instance.
///
/// Holds the input (query) and training (reference) datasets together with
/// the neighbour count `k`. The datasets live either in memory or — for the
/// windowed external algorithm — in on-disk record files under a scratch
/// directory.
///
/// # Examples
/// ```
/// use std::num::NonZeroUsize;
/// use aknn_core::{KnnProblem, Point};
///
/// let input = vec![Point { id: 1, x: 0.5, y: 0.5 }];
/// let training = vec![Point { id: 1, x: 0.0, y: 0.0 }];
/// let problem = KnnProblem::from_points(input, training, NonZeroUsize::new(1).unwrap())?;
/// assert_eq!(problem.input_len(), 1);
/// # Ok::<(), aknn_core::KnnError>(())
/// ```
#[derive(Debug)]
pub struct KnnProblem {
    k: NonZeroUsize,
    data: ProblemData,
}

impl KnnProblem {
    /// Builds an in-memory problem from already-loaded datasets.
    ///
    /// # Errors
    /// Returns [`KnnError::EmptyDataset`] when either dataset is empty and
    /// [`KnnError::InvalidPointId`] when an identifier falls outside the
    /// valid range (input ids must be `1..=|I|`, training ids at least 1).
    pub fn from_points(
        input: Vec<Point>,
        training: Vec<Point>,
        k: NonZeroUsize,
    ) -> Result<Self> {
        validate_points(&input, DatasetKind::Input, true)?;
        validate_points(&training, DatasetKind::Training, false)?;
        Ok(Self {
            k,
            data: ProblemData::Memory { input, training },
        })
    }

    /// Loads an in-memory problem from dataset files.
    ///
    /// # Errors
    /// Returns a [`DatasetError`](crate::DatasetError) wrapped in
    /// [`KnnError::Dataset`] when a file fails to load, plus the validation
    /// errors of [`KnnProblem::from_points`].
    pub fn load(input_path: &Path, training_path: &Path, k: NonZeroUsize) -> Result<Self> {
        let input = load_points(input_path)?;
        let training = load_points(training_path)?;
        Self::from_points(input, training, k)
    }

    /// Loads an external problem: both datasets are transcoded into record
    /// files under a fresh scratch directory beneath `scratch_parent`.
    ///
    /// # Errors
    /// As [`KnnProblem::load`], plus [`KnnError::Scratch`] when scratch
    /// storage cannot be created.
    pub fn load_external(
        input_path: &Path,
        training_path: &Path,
        k: NonZeroUsize,
        memory_budget_mb: usize,
        scratch_parent: &Path,
    ) -> Result<Self> {
        let scratch = Arc::new(ScratchDir::create(scratch_parent)?);
        let input = transcode(input_path, &scratch, "input", DatasetKind::Input, true)?;
        let training = transcode(
            training_path,
            &scratch,
            "training",
            DatasetKind::Training,
            false,
        )?;
        Ok(Self {
            k,
            data: ProblemData::External(ExternalData {
                input,
                training,
                memory_budget_bytes: memory_budget_mb as u64 * 1024 * 1024,
                scratch,
            }),
        })
    }

    /// Number of neighbours requested per input point.
    #[must_use]
    pub fn k(&self) -> NonZeroUsize {
        self.k
    }

    /// Number of input points.
    #[must_use]
    pub fn input_len(&self) -> usize {
        match &self.data {
            ProblemData::Memory { input, .. } => input.len(),
            ProblemData::External(data) => usize::try_from(data.input.count()).unwrap_or(0),
        }
    }

    /// Number of training points.
    #[must_use]
    pub fn training_len(&self) -> usize {
        match &self.data {
            ProblemData::Memory { training, .. } => training.len(),
            ProblemData::External(data) => {
                usize::try_from(data.training.count()).unwrap_or(0)
            }
        }
    }

    /// The in-memory datasets, when this problem holds them.
    #[must_use]
    pub fn in_memory(&self) -> Option<(&[Point], &[Point])> {
        match &self.data {
            ProblemData::Memory { input, training } => Some((input, training)),
            ProblemData::External(_) => None,
        }
    }

    /// The external storage, when this problem holds it.
    #[must_use]
    pub fn external(&self) -> Option<&ExternalData> {
        match &self.data {
            ProblemData::Memory { .. } => None,
            ProblemData::External(data) => Some(data),
        }
    }
}

fn validate_points(points: &[Point], which: DatasetKind, bounded: bool) -> Result<()> {
    if points.is_empty() {
        return Err(KnnError::EmptyDataset { which });
    }
    for point in points {
        let out_of_range = point.id == 0 || (bounded && point.id > points.len() as u64);
        if out_of_range {
            return Err(KnnError::InvalidPointId {
                which,
                id: point.id,
                count: points.len(),
            });
        }
    }
    Ok(())
}

/// Streams a dataset file into a scratch record file, validating identifiers
/// on the way through. The memory high-water mark stays at one buffered
/// record, whatever the dataset size; identifier bounds are checked against
/// the final count once it is known.
fn transcode(
    path: &Path,
    scratch: &ScratchDir,
    tag: &str,
    which: DatasetKind,
    bounded: bool,
) -> Result<RecordFile<Point>> {
    let mut writer = RecordWriter::create(scratch.file(tag))?;
    let mut min_id = u64::MAX;
    let mut max_id = 0_u64;
    let count = for_each_point(path, |point| {
        min_id = min_id.min(point.id);
        max_id = max_id.max(point.id);
        writer.push(&point)
    })?;

    if count == 0 {
        return Err(KnnError::EmptyDataset { which });
    }
    let count_usize = usize::try_from(count).unwrap_or(usize::MAX);
    if min_id == 0 || (bounded && max_id > count) {
        return Err(KnnError::InvalidPointId {
            which,
            id: if min_id == 0 { 0 } else { max_id },
            count: count_usize,
        });
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KnnErrorCode;

    fn k(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("k must be non-zero")
    }

    #[test]
    fn rejects_empty_datasets() {
        let err = KnnProblem::from_points(Vec::new(), vec![Point { id: 1, x: 0.0, y: 0.0 }], k(1))
            .expect_err("empty input");
        assert_eq!(err.code(), KnnErrorCode::EmptyDataset);
    }

    #[test]
    fn rejects_out_of_range_input_ids() {
        let input = vec![Point { id: 2, x: 0.0, y: 0.0 }];
        let training = vec![Point { id: 1, x: 0.0, y: 0.0 }];
        let err = KnnProblem::from_points(input, training, k(1)).expect_err("bad id");
        assert_eq!(err.code(), KnnErrorCode::InvalidPointId);
    }

    #[test]
    fn training_ids_only_need_to_be_positive() {
        let input = vec![Point { id: 1, x: 0.0, y: 0.0 }];
        let training = vec![Point { id: 900, x: 0.0, y: 0.0 }];
        let problem = KnnProblem::from_points(input, training, k(1)).expect("valid");
        assert_eq!(problem.training_len(), 1);
        assert!(problem.external().is_none());
    }
}
