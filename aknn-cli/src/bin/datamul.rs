//! Dataset multiplier: grows a dataset by quadrant replication.
//!
//! Factor 4 maps every source point to four copies, one per quadrant of the
//! unit square, with the coordinates halved. Factor 2 does the same for
//! every second source point, doubling the count. Factor 1 transcodes the
//! dataset between the text and binary codecs unchanged.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use aknn_core::{Point, load_points, write_points};

/// Multiply a point dataset by quadrant replication.
#[derive(Debug, Parser)]
#[command(name = "aknn-datamul")]
struct Args {
    /// Source dataset file.
    source: PathBuf,

    /// Target dataset file; `.bin` selects the binary codec.
    target: PathBuf,

    /// Multiplication factor: 1, 2, or 4.
    factor: usize,
}

fn quadrant_copies(point: &Point, next_id: u64) -> [Point; 4] {
    let x = point.x / 2.0;
    let y = point.y / 2.0;
    [
        Point { id: next_id, x, y },
        Point { id: next_id + 1, x, y: 0.5 + y },
        Point { id: next_id + 2, x: 0.5 + x, y },
        Point { id: next_id + 3, x: 0.5 + x, y: 0.5 + y },
    ]
}

fn multiply(points: &[Point], factor: usize) -> Vec<Point> {
    match factor {
        1 => points.to_vec(),
        _ => {
            let mut out = Vec::with_capacity(points.len() * factor);
            for (index, point) in points.iter().enumerate() {
                // Factor 2 replicates every second point only.
                if factor == 4 || index % 2 == 1 {
                    out.extend_from_slice(&quadrant_copies(point, out.len() as u64 + 1));
                }
            }
            out
        }
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    if !matches!(args.factor, 1 | 2 | 4) {
        bail!("factor must be 1, 2, or 4");
    }
    let points = load_points(&args.source)
        .with_context(|| format!("failed to load {}", args.source.display()))?;
    let multiplied = multiply(&points, args.factor);
    write_points(&args.target, &multiplied)
        .with_context(|| format!("failed to write {}", args.target.display()))?;
    tracing::info!(
        source_points = points.len(),
        target_points = multiplied.len(),
        factor = args.factor,
        "dataset multiplied"
    );
    Ok(())
}

fn main() -> ExitCode {
    if let Err(err) = aknn_cli::logging::init_logging() {
        tracing::error!(error = %err, "logging unavailable");
    }
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "multiplication failed");
            ExitCode::FAILURE
        }
    }
}
