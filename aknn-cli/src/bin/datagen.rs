//! Dataset generator: uniformly distributed points over the unit square.
//!
//! Writes text or binary depending on the output file extension.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{Rng, SeedableRng, rngs::SmallRng};

use aknn_core::{Point, write_points};

/// Generate a uniformly distributed point dataset.
#[derive(Debug, Parser)]
#[command(name = "aknn-datagen")]
struct Args {
    /// Number of points to create.
    count: usize,

    /// Output file; `.bin` selects the binary codec.
    output: PathBuf,

    /// Seed for the generator; omit for a nondeterministic dataset.
    #[arg(long)]
    seed: Option<u64>,
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };
    let points: Vec<Point> = (0..args.count)
        .map(|i| Point {
            id: i as u64 + 1,
            x: rng.gen_range(0.0..1.0),
            y: rng.gen_range(0.0..1.0),
        })
        .collect();
    write_points(&args.output, &points)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    tracing::info!(count = args.count, output = %args.output.display(), "dataset written");
    Ok(())
}

fn main() -> ExitCode {
    if let Err(err) = aknn_cli::logging::init_logging() {
        tracing::error!(error = %err, "logging unavailable");
    }
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "generation failed");
            ExitCode::FAILURE
        }
    }
}
