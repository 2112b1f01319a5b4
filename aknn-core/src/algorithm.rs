//! The algorithm surface: one trait, one `run` method, and plain
//! record-constructed variant values that differ only in configuration.

use std::num::NonZeroUsize;
use std::time::Instant;

use tracing::info;

use crate::brute::brute_force;
use crate::error::{KnnError, Result};
use crate::external::{ExternalOptions, run_external};
use crate::internal::run_internal;
use crate::problem::KnnProblem;
use crate::result::{HeapStats, KnnResult, RunStats};
use crate::stripes::StripeOptions;

/// An all-k-nearest-neighbours algorithm.
///
/// Implementations are cheap configuration records; all state lives in the
/// problem and the result.
pub trait KnnAlgorithm {
    /// Stable name used for logging, result files, and the statistics CSV.
    fn name(&self) -> String;

    /// True when the variant works on the external problem representation.
    fn uses_external_memory(&self) -> bool {
        false
    }

    /// Runs the algorithm over `problem`.
    ///
    /// # Errors
    /// Returns [`KnnError::ProblemKind`] when the problem storage does not
    /// match the variant, plus any dataset or scratch failure.
    fn run(&self, problem: &KnnProblem) -> Result<KnnResult>;
}

/// Runs `body` inside a dedicated pool of `threads` workers, or on the
/// ambient pool when `threads` is 0.
fn with_worker_pool<T: Send>(threads: usize, body: impl FnOnce() -> T + Send) -> Result<T> {
    if threads == 0 {
        return Ok(body());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|source| KnnError::ThreadPool { source })?;
    Ok(pool.install(body))
}

fn require_memory<'p>(
    problem: &'p KnnProblem,
    algorithm: &dyn KnnAlgorithm,
) -> Result<(&'p [crate::Point], &'p [crate::Point])> {
    problem.in_memory().ok_or_else(|| KnnError::ProblemKind {
        algorithm: algorithm.name(),
        requires_external: false,
    })
}

/// Exhaustive baseline scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct BruteForce {
    /// Worker threads; 0 uses the ambient pool. Ignored when `parallel` is
    /// false.
    pub threads: usize,
    /// Scan input points in parallel.
    pub parallel: bool,
}

impl KnnAlgorithm for BruteForce {
    fn name(&self) -> String {
        if self.parallel {
            "brute_force_parallel".to_owned()
        } else {
            "brute_force".to_owned()
        }
    }

    fn run(&self, problem: &KnnProblem) -> Result<KnnResult> {
        let (input, training) = require_memory(problem, self)?;
        let k = problem.k();
        let started = Instant::now();
        let lists = with_worker_pool(if self.parallel { self.threads } else { 0 }, || {
            brute_force(input, training, k, self.parallel)
        })?;
        let stats = RunStats {
            total_seconds: started.elapsed().as_secs_f64(),
            heap: HeapStats::from_lists(&lists),
            ..RunStats::default()
        };
        info!(algorithm = %self.name(), seconds = stats.total_seconds, "run finished");
        Ok(KnnResult::from_lists(k, lists, stats))
    }
}

/// The in-memory plane-sweep stripes algorithm.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaneSweepStripes {
    /// Worker threads; 0 uses the ambient pool.
    pub threads: usize,
    /// Stripe configuration.
    pub options: StripeOptions,
}

impl KnnAlgorithm for PlaneSweepStripes {
    fn name(&self) -> String {
        format!(
            "planesweep_stripes_parallel_psort_{}_psplit_{}_splitByT_{}",
            u8::from(self.options.parallel_sort),
            u8::from(self.options.parallel_split),
            u8::from(self.options.split_by_training),
        )
    }

    fn run(&self, problem: &KnnProblem) -> Result<KnnResult> {
        let (input, training) = require_memory(problem, self)?;
        let k = problem.k();
        let options = self.options;
        let (lists, stats) =
            with_worker_pool(self.threads, move || run_internal(input, training, k, &options))?;
        info!(
            algorithm = %self.name(),
            seconds = stats.total_seconds,
            stripes = stats.num_stripes,
            "run finished"
        );
        Ok(KnnResult::from_lists(k, lists, stats))
    }
}

/// The windowed out-of-core plane-sweep stripes algorithm.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaneSweepStripesExternal {
    /// Worker threads; 0 uses the ambient pool.
    pub threads: usize,
    /// Desired stripe count; 0 selects the automatic heuristic.
    pub stripes: usize,
    /// Sort stripe points with rayon's parallel sort.
    pub parallel_sort: bool,
    /// Split by the training dataset instead of the input dataset.
    pub split_by_training: bool,
}

impl KnnAlgorithm for PlaneSweepStripesExternal {
    fn name(&self) -> String {
        format!(
            "planesweep_stripes_parallel_external_psort_{}_splitByT_{}",
            u8::from(self.parallel_sort),
            u8::from(self.split_by_training),
        )
    }

    fn uses_external_memory(&self) -> bool {
        true
    }

    fn run(&self, problem: &KnnProblem) -> Result<KnnResult> {
        let data = problem.external().ok_or_else(|| KnnError::ProblemKind {
            algorithm: self.name(),
            requires_external: true,
        })?;
        let k = problem.k();
        let options = ExternalOptions {
            stripes: self.stripes,
            parallel_sort: self.parallel_sort,
            split_by_training: self.split_by_training,
        };
        let result = with_worker_pool(self.threads, move || run_external(data, k, &options))??;
        info!(
            algorithm = %self.name(),
            seconds = result.stats().total_seconds,
            stripes = result.stats().num_stripes,
            allocation_error = result.has_allocation_error(),
            "run finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KnnErrorCode;
    use crate::point::Point;

    fn problem() -> KnnProblem {
        KnnProblem::from_points(
            vec![Point { id: 1, x: 0.5, y: 0.5 }],
            vec![Point { id: 1, x: 0.25, y: 0.25 }],
            NonZeroUsize::new(1).expect("k"),
        )
        .expect("valid problem")
    }

    #[test]
    fn names_encode_the_configuration() {
        let algorithm = PlaneSweepStripes {
            threads: 0,
            options: StripeOptions {
                parallel_sort: true,
                split_by_training: true,
                ..StripeOptions::default()
            },
        };
        assert_eq!(
            algorithm.name(),
            "planesweep_stripes_parallel_psort_1_psplit_0_splitByT_1"
        );
        assert!(!algorithm.uses_external_memory());
        assert!(
            PlaneSweepStripesExternal::default().uses_external_memory()
        );
    }

    #[test]
    fn external_variant_refuses_an_in_memory_problem() {
        let err = PlaneSweepStripesExternal::default()
            .run(&problem())
            .expect_err("must refuse");
        assert_eq!(err.code(), KnnErrorCode::ProblemKind);
    }

    #[test]
    fn brute_force_runs_via_the_trait() {
        let result = BruteForce::default().run(&problem()).expect("run");
        let lists = result.lists().expect("in memory");
        assert_eq!(lists[0].neighbours[0].point_id, 1);
        assert!((lists[0].neighbours[0].distance_squared - 0.125).abs() < 1e-15);
    }
}
