//! Error types for the aknn core library.
//!
//! Defines the error enums exposed by the public API, their stable
//! machine-readable codes, and a convenient result alias. Allocation failure
//! in the windowed scheduler is deliberately *not* an error: it is an
//! observable property of the run (see `RunStats::has_allocation_error`).

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Which of the two datasets an error refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DatasetKind {
    /// The query dataset I.
    Input,
    /// The reference dataset T.
    Training,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Training => f.write_str("training"),
        }
    }
}

/// Stable codes describing [`DatasetError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DatasetErrorCode {
    /// The dataset file could not be opened or read.
    Io,
    /// A record in a text dataset failed to parse.
    Parse,
    /// A binary dataset ended before its declared record count.
    Truncated,
}

impl DatasetErrorCode {
    /// Return the stable machine-readable representation of this error code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "DATASET_IO",
            Self::Parse => "DATASET_PARSE",
            Self::Truncated => "DATASET_TRUNCATED",
        }
    }
}

impl fmt::Display for DatasetErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised while loading or writing a point dataset file.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The dataset file could not be opened, read, or written.
    #[error("cannot access dataset `{path}`: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// A record in a text dataset failed to parse.
    #[error("malformed record at {path}:{line}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// One-based line number of the malformed record.
        line: usize,
    },
    /// A binary dataset ended before its declared record count.
    #[error("binary dataset `{path}` declares {expected} points but holds {actual}")]
    Truncated {
        /// Path of the offending file.
        path: PathBuf,
        /// Record count declared in the header.
        expected: u64,
        /// Records actually present.
        actual: u64,
    },
}

impl DatasetError {
    /// Retrieve the stable [`DatasetErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> DatasetErrorCode {
        match self {
            Self::Io { .. } => DatasetErrorCode::Io,
            Self::Parse { .. } => DatasetErrorCode::Parse,
            Self::Truncated { .. } => DatasetErrorCode::Truncated,
        }
    }
}

/// Stable codes describing [`KnnError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum KnnErrorCode {
    /// A dataset failed to load.
    Dataset,
    /// One of the datasets contained no points.
    EmptyDataset,
    /// A point carried an identifier outside the valid range.
    InvalidPointId,
    /// The algorithm was handed the wrong kind of problem storage.
    ProblemKind,
    /// A scratch file of the external scheduler failed.
    Scratch,
    /// A results file could not be written.
    ResultFile,
    /// The dedicated worker pool could not be built.
    ThreadPool,
    /// The result carries no valid neighbour output.
    ResultUnavailable,
}

impl KnnErrorCode {
    /// Return the stable machine-readable representation of this error code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dataset => "KNN_DATASET",
            Self::EmptyDataset => "KNN_EMPTY_DATASET",
            Self::InvalidPointId => "KNN_INVALID_POINT_ID",
            Self::ProblemKind => "KNN_PROBLEM_KIND",
            Self::Scratch => "KNN_SCRATCH",
            Self::ResultFile => "KNN_RESULT_FILE",
            Self::ThreadPool => "KNN_THREAD_POOL",
            Self::ResultUnavailable => "KNN_RESULT_UNAVAILABLE",
        }
    }
}

impl fmt::Display for KnnErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type produced when constructing or running a k-NN problem.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum KnnError {
    /// A dataset failed to load.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// One of the datasets contained no points.
    #[error("{which} dataset contains no points")]
    EmptyDataset {
        /// Which dataset was empty.
        which: DatasetKind,
    },
    /// A point carried an identifier outside the valid range.
    #[error("{which} dataset holds point id {id}, outside 1..={count}")]
    InvalidPointId {
        /// Which dataset the point belongs to.
        which: DatasetKind,
        /// The offending identifier.
        id: u64,
        /// Number of points in that dataset.
        count: usize,
    },
    /// The algorithm was handed the wrong kind of problem storage.
    #[error(
        "algorithm `{algorithm}` was given the wrong problem storage (requires external: {requires_external})"
    )]
    ProblemKind {
        /// Name of the refusing algorithm.
        algorithm: String,
        /// Whether it needs the external (on-disk) problem representation.
        requires_external: bool,
    },
    /// A scratch file of the external scheduler failed.
    #[error("scratch file `{path}` failed: {source}")]
    Scratch {
        /// Path of the scratch file.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// A results file could not be written.
    #[error("cannot write results file `{path}`: {source}")]
    ResultFile {
        /// Path of the results file.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// The dedicated worker pool could not be built.
    #[error("cannot build worker pool: {source}")]
    ThreadPool {
        /// Error raised by rayon.
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
    /// The result carries no valid neighbour output (the run ended with an
    /// allocation error).
    #[error("result holds no valid neighbour output")]
    ResultUnavailable,
}

impl KnnError {
    /// Retrieve the stable [`KnnErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> KnnErrorCode {
        match self {
            Self::Dataset(_) => KnnErrorCode::Dataset,
            Self::EmptyDataset { .. } => KnnErrorCode::EmptyDataset,
            Self::InvalidPointId { .. } => KnnErrorCode::InvalidPointId,
            Self::ProblemKind { .. } => KnnErrorCode::ProblemKind,
            Self::Scratch { .. } => KnnErrorCode::Scratch,
            Self::ResultFile { .. } => KnnErrorCode::ResultFile,
            Self::ThreadPool { .. } => KnnErrorCode::ThreadPool,
            Self::ResultUnavailable => KnnErrorCode::ResultUnavailable,
        }
    }

    /// Retrieve the inner [`DatasetErrorCode`] when the error originated in a
    /// dataset file.
    #[must_use]
    pub const fn dataset_code(&self) -> Option<DatasetErrorCode> {
        match self {
            Self::Dataset(error) => Some(error.code()),
            _ => None,
        }
    }
}

/// Convenient alias for results returned by the core API.
pub type Result<T> = core::result::Result<T, KnnError>;
