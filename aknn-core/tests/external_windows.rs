//! End-to-end coverage of the windowed out-of-core algorithm: window
//! boundaries, pending-point carry, the descending second pass, allocation
//! failure, and exact equivalence with the in-memory variant.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use aknn_core::{
    KnnAlgorithm, KnnProblem, PlaneSweepStripes, PlaneSweepStripesExternal, write_points,
};
use aknn_test_support::uniform_points;
use rstest::rstest;
use tempfile::TempDir;

const POINTS: usize = 20_000;
const K: usize = 3;

fn k() -> NonZeroUsize {
    NonZeroUsize::new(K).expect("k must be non-zero")
}

/// Writes both datasets under a tempdir and returns their paths.
fn dataset_files(dir: &TempDir, binary: bool) -> (PathBuf, PathBuf) {
    let extension = if binary { "bin" } else { "txt" };
    let input_path = dir.path().join(format!("input.{extension}"));
    let training_path = dir.path().join(format!("training.{extension}"));
    write_points(&input_path, &uniform_points(POINTS, 0x1234)).expect("write input");
    write_points(&training_path, &uniform_points(POINTS, 0x4321)).expect("write training");
    (input_path, training_path)
}

#[rstest]
#[case::split_by_input(false)]
#[case::split_by_training(true)]
fn windowed_run_matches_the_internal_variant_exactly(#[case] split_by_training: bool) {
    let dir = TempDir::new().expect("tempdir");
    let (input_path, training_path) = dataset_files(&dir, true);

    // One megabyte: enough for a fraction of the ~80 stripes at a time, so
    // several windows and a second pass are forced.
    let external_problem =
        KnnProblem::load_external(&input_path, &training_path, k(), 1, dir.path())
            .expect("external problem");
    let external = PlaneSweepStripesExternal {
        parallel_sort: true,
        split_by_training,
        ..PlaneSweepStripesExternal::default()
    }
    .run(&external_problem)
    .expect("external run");

    let stats = external.stats();
    assert!(!stats.has_allocation_error);
    assert!(
        stats.first_pass_windows >= 4,
        "expected several windows, got {}",
        stats.first_pass_windows
    );
    assert!(stats.second_pass_windows >= 1);
    assert!(stats.pending_points > 0, "pending carry never happened");

    let internal_problem =
        KnnProblem::load(&input_path, &training_path, k()).expect("internal problem");
    let internal = PlaneSweepStripes::default()
        .run(&internal_problem)
        .expect("internal run");

    // Identical arithmetic on both paths: the distances must match exactly.
    let differences = external.find_differences(&internal, 0.0).expect("compare");
    assert!(differences.is_empty(), "differing ids: {differences:?}");
    assert_eq!(external.input_len(), internal.input_len());
}

#[test]
fn single_window_runs_need_no_second_pass() {
    let dir = TempDir::new().expect("tempdir");
    let (input_path, training_path) = dataset_files(&dir, false);

    // A generous budget fits every stripe into one window.
    let problem = KnnProblem::load_external(&input_path, &training_path, k(), 64, dir.path())
        .expect("external problem");
    let result = PlaneSweepStripesExternal::default()
        .run(&problem)
        .expect("run");
    let stats = result.stats();
    assert_eq!(stats.first_pass_windows, 1);
    assert_eq!(stats.second_pass_windows, 0);
    assert_eq!(stats.pending_points, 0);
}

#[test]
fn an_unfittable_stripe_reports_an_allocation_error() {
    let dir = TempDir::new().expect("tempdir");
    let (input_path, training_path) = dataset_files(&dir, true);

    let problem = KnnProblem::load_external(&input_path, &training_path, k(), 1, dir.path())
        .expect("external problem");
    // A single stripe holds the whole dataset and cannot fit the budget.
    let result = PlaneSweepStripesExternal {
        stripes: 1,
        ..PlaneSweepStripesExternal::default()
    }
    .run(&problem)
    .expect("run completes with the error recorded");

    assert!(result.has_allocation_error());
    assert!(result.save_to_file(&dir.path().join("out.txt")).is_err());
}

#[test]
fn external_results_save_in_input_order() {
    let dir = TempDir::new().expect("tempdir");
    let input_path = dir.path().join("input.txt");
    let training_path = dir.path().join("training.txt");
    write_points(&input_path, &uniform_points(500, 7)).expect("write input");
    write_points(&training_path, &uniform_points(500, 8)).expect("write training");

    let problem = KnnProblem::load_external(&input_path, &training_path, k(), 16, dir.path())
        .expect("external problem");
    let result = PlaneSweepStripesExternal::default()
        .run(&problem)
        .expect("run");

    let out = dir.path().join("neighbours.txt");
    result.save_to_file(&out).expect("save");
    let text = std::fs::read_to_string(&out).expect("read");
    let ids: Vec<u64> = text
        .lines()
        .map(|line| {
            line.split('\t')
                .next()
                .and_then(|id| id.parse().ok())
                .expect("leading id")
        })
        .collect();
    assert_eq!(ids.len(), 500);
    assert!(ids.windows(2).all(|pair| pair[0] + 1 == pair[1]));
    assert_eq!(
        text.lines().next().map(|l| l.matches('\t').count()),
        Some(K)
    );
}
