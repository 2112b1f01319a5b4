//! Command-line interface of the aknn benchmark driver.
//!
//! The driver takes the classic positional argument list, builds the enabled
//! algorithm variants from the bitmask, loads the problem once per storage
//! kind, then runs every variant in order: each result is saved, compared
//! against the first result, and logged as a row of the statistics CSV.
//!
//! Variant order in the bitmask:
//!
//! | bit | variant |
//! |-----|---------|
//! | 0 | brute force |
//! | 1 | brute force, parallel |
//! | 2–5 | stripes parallel, {psort, psplit} ∈ {00, 01, 10, 11} |
//! | 6–9 | stripes parallel split-by-training, {psort, psplit} as above |
//! | 10 | stripes external, psort |
//! | 11 | stripes external, psort, split-by-training |

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use aknn_core::{
    BruteForce, KnnAlgorithm, KnnError, KnnProblem, KnnResult, PlaneSweepStripes,
    PlaneSweepStripesExternal, RunStats, StripeOptions,
};
use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use crate::report::StatsReport;

/// Number of selectable algorithm variants.
pub const ALGORITHM_COUNT: usize = 12;

/// Command-line options of the benchmark driver.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "aknn",
    about = "Compute all k nearest neighbours with the plane-sweep stripes algorithms."
)]
pub struct Cli {
    /// Number of nearest neighbours per input point.
    pub neighbours: usize,

    /// Input (query) dataset file; `.bin` selects the binary codec.
    pub input: PathBuf,

    /// Training (reference) dataset file; `.bin` selects the binary codec.
    pub training: PathBuf,

    /// Worker threads; 0 lets the pool match the core count.
    #[arg(default_value_t = 0)]
    pub threads: usize,

    /// Accuracy used when comparing results against the reference.
    #[arg(default_value_t = 1.0e-15)]
    pub accuracy: f64,

    /// Stripe count; 0 selects the automatic heuristic.
    #[arg(default_value_t = 0)]
    pub stripes: usize,

    /// Save each algorithm's neighbour lists to a text file (0/1).
    #[arg(default_value = "1", value_parser = parse_flag_digit, action = clap::ArgAction::Set)]
    pub save_results: bool,

    /// Compare each result against the first algorithm's result (0/1).
    #[arg(default_value = "1", value_parser = parse_flag_digit, action = clap::ArgAction::Set)]
    pub compare_results: bool,

    /// Bitmask of `0`/`1` selecting the algorithm variants to run; shorter
    /// masks disable the remaining variants.
    #[arg(default_value = "111111111111")]
    pub algorithm_mask: String,

    /// Memory budget in megabytes for the external variants.
    #[arg(default_value_t = 1024)]
    pub memory_budget_mb: usize,
}

fn parse_flag_digit(raw: &str) -> Result<bool, String> {
    match raw {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("expected 0 or 1, got `{other}`")),
    }
}

/// Errors surfaced while executing the driver.
#[derive(Debug, Error)]
pub enum CliError {
    /// The neighbour count must be at least 1.
    #[error("the number of neighbours must be at least 1")]
    InvalidNeighbours,
    /// The algorithm mask held something other than `0` and `1`.
    #[error("algorithm mask may only contain 0 and 1, got `{mask}`")]
    InvalidMask {
        /// The offending mask.
        mask: String,
    },
    /// Core processing failed outside an algorithm run.
    #[error(transparent)]
    Core(#[from] KnnError),
    /// An output file could not be written.
    #[error("failed to write `{path}`: {source}")]
    Output {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
}

/// What happened to one enabled variant.
#[derive(Debug)]
pub enum AlgorithmOutcome {
    /// The run finished; statistics and optional difference count.
    Completed {
        /// Statistics reported by the run.
        stats: RunStats,
        /// Number of differing points against the reference, when compared.
        differences: Option<usize>,
    },
    /// The run failed; the driver carried on with the next variant.
    Failed {
        /// Rendered error message.
        error: String,
    },
}

/// Summary of a whole driver invocation.
#[derive(Debug)]
pub struct ExecutionSummary {
    /// Outcome per enabled variant, in execution order.
    pub outcomes: Vec<(String, AlgorithmOutcome)>,
    /// Path of the statistics CSV, when any variant was enabled.
    pub stats_path: Option<PathBuf>,
}

/// Builds the enabled algorithm variants from the bitmask.
///
/// # Errors
/// Returns [`CliError::InvalidMask`] when the mask holds other characters.
pub fn algorithm_roster(cli: &Cli) -> Result<Vec<Box<dyn KnnAlgorithm>>, CliError> {
    if !cli.algorithm_mask.chars().all(|c| c == '0' || c == '1') {
        return Err(CliError::InvalidMask {
            mask: cli.algorithm_mask.clone(),
        });
    }

    let enabled: Vec<bool> = cli
        .algorithm_mask
        .chars()
        .map(|c| c == '1')
        .chain(std::iter::repeat(false))
        .take(ALGORITHM_COUNT)
        .collect();

    let mut roster: Vec<Box<dyn KnnAlgorithm>> = Vec::new();
    let mut push = |index: usize, algorithm: Box<dyn KnnAlgorithm>| {
        if enabled[index] {
            roster.push(algorithm);
        }
    };

    push(0, Box::new(BruteForce {
        threads: cli.threads,
        parallel: false,
    }));
    push(1, Box::new(BruteForce {
        threads: cli.threads,
        parallel: true,
    }));

    for (offset, split_by_training) in [(2_usize, false), (6, true)] {
        for (bit, (parallel_sort, parallel_split)) in
            [(false, false), (false, true), (true, false), (true, true)]
                .into_iter()
                .enumerate()
        {
            push(
                offset + bit,
                Box::new(PlaneSweepStripes {
                    threads: cli.threads,
                    options: StripeOptions {
                        stripes: cli.stripes,
                        parallel_sort,
                        parallel_split,
                        split_by_training,
                    },
                }),
            );
        }
    }

    for (index, split_by_training) in [(10_usize, false), (11, true)] {
        push(
            index,
            Box::new(PlaneSweepStripesExternal {
                threads: cli.threads,
                stripes: cli.stripes,
                parallel_sort: true,
                split_by_training,
            }),
        );
    }

    Ok(roster)
}

/// Executes the driver with output files rooted at the current directory.
///
/// # Errors
/// Returns [`CliError`] for argument, loading, or output failures; failures
/// inside a single algorithm run are recorded in the summary instead.
pub fn run_cli(cli: Cli) -> Result<ExecutionSummary, CliError> {
    let current = std::env::current_dir().map_err(|source| CliError::Output {
        path: PathBuf::from("."),
        source,
    })?;
    run_cli_in(cli, &current)
}

/// Executes the driver, writing result files and the statistics CSV under
/// `output_dir`.
///
/// # Errors
/// As [`run_cli`].
pub fn run_cli_in(cli: Cli, output_dir: &Path) -> Result<ExecutionSummary, CliError> {
    let k = NonZeroUsize::new(cli.neighbours).ok_or(CliError::InvalidNeighbours)?;
    let algorithms = algorithm_roster(&cli)?;
    if algorithms.is_empty() {
        return Ok(ExecutionSummary {
            outcomes: Vec::new(),
            stats_path: None,
        });
    }

    let need_memory = algorithms.iter().any(|a| !a.uses_external_memory());
    let need_external = algorithms.iter().any(|a| a.uses_external_memory());

    let loading = Instant::now();
    let memory_problem = if need_memory {
        Some(KnnProblem::load(&cli.input, &cli.training, k)?)
    } else {
        None
    };
    let external_problem = if need_external {
        Some(KnnProblem::load_external(
            &cli.input,
            &cli.training,
            k,
            cli.memory_budget_mb,
            &std::env::temp_dir(),
        )?)
    } else {
        None
    };
    if let Some(problem) = memory_problem.as_ref().or(external_problem.as_ref()) {
        info!(
            input_points = problem.input_len(),
            training_points = problem.training_len(),
            seconds = loading.elapsed().as_secs_f64(),
            "datasets loaded"
        );
    }

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let stats_path = output_dir.join(format!("results_{stamp}.csv"));
    let stats_file = File::create(&stats_path).map_err(|source| CliError::Output {
        path: stats_path.clone(),
        source,
    })?;
    let mut report = StatsReport::new(BufWriter::new(stats_file), false).map_err(|source| {
        CliError::Output {
            path: stats_path.clone(),
            source,
        }
    })?;

    let mut outcomes = Vec::with_capacity(algorithms.len());
    let mut reference: Option<KnnResult> = None;

    for algorithm in &algorithms {
        let name = algorithm.name();
        let problem = if algorithm.uses_external_memory() {
            external_problem.as_ref()
        } else {
            memory_problem.as_ref()
        };
        let Some(problem) = problem else { continue };

        match algorithm.run(problem) {
            Ok(result) => {
                let differences = match reference.as_ref() {
                    Some(reference)
                        if cli.compare_results && !result.has_allocation_error() =>
                    {
                        Some(result.find_differences(reference, cli.accuracy)?)
                    }
                    _ => None,
                };

                if cli.save_results && !result.has_allocation_error() {
                    let out_path = output_dir.join(format!("{name}_{stamp}.txt"));
                    result.save_to_file(&out_path)?;
                }

                report
                    .write_row(&name, result.stats(), differences.as_deref())
                    .map_err(|source| CliError::Output {
                        path: stats_path.clone(),
                        source,
                    })?;

                outcomes.push((
                    name,
                    AlgorithmOutcome::Completed {
                        stats: *result.stats(),
                        differences: differences.map(|d| d.len()),
                    },
                ));

                if cli.compare_results
                    && reference.is_none()
                    && !result.has_allocation_error()
                {
                    reference = Some(result);
                }
            }
            Err(run_error) => {
                error!(
                    algorithm = %name,
                    error = %run_error,
                    code = %run_error.code(),
                    dataset_code = ?run_error.dataset_code().map(|c| c.as_str()),
                    "algorithm run failed"
                );
                outcomes.push((
                    name,
                    AlgorithmOutcome::Failed {
                        error: run_error.to_string(),
                    },
                ));
            }
        }
    }

    report.finish().map_err(|source| CliError::Output {
        path: stats_path.clone(),
        source,
    })?;

    Ok(ExecutionSummary {
        outcomes,
        stats_path: Some(stats_path),
    })
}

/// Renders the human-readable run summary.
///
/// # Errors
/// Propagates I/O failures from the writer.
pub fn render_summary<W: Write>(summary: &ExecutionSummary, writer: &mut W) -> io::Result<()> {
    for (name, outcome) in &summary.outcomes {
        match outcome {
            AlgorithmOutcome::Completed { stats, differences } => {
                write!(
                    writer,
                    "{name}: {:.3}s (sort {:.3}s) adds {} stripes {}",
                    stats.total_seconds,
                    stats.sort_seconds,
                    stats.heap.total_additions,
                    stats.num_stripes,
                )?;
                if stats.has_allocation_error {
                    write!(writer, " ALLOCATION ERROR")?;
                }
                if let Some(differences) = differences {
                    write!(writer, " differences {differences}")?;
                }
                writeln!(writer)?;
            }
            AlgorithmOutcome::Failed { error } => {
                writeln!(writer, "{name}: FAILED ({error})")?;
            }
        }
    }
    if let Some(path) = &summary.stats_path {
        writeln!(writer, "statistics written to {}", path.display())?;
    }
    Ok(())
}
