//! CLI entry point of the aknn benchmark driver.
//!
//! Parses the positional arguments with clap, runs the enabled algorithm
//! variants, renders the summary to stdout, and maps errors to exit codes.
//! Logging is initialised eagerly so all subsequent operations can emit
//! structured diagnostics via `tracing`.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use aknn_cli::{
    cli::{Cli, CliError, render_summary, run_cli},
    logging::{self, LoggingError},
};
use tracing::error;

/// Parse the arguments, execute the driver, render the summary, and flush
/// the output stream.
fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let summary = run_cli(cli).context("failed to execute the benchmark driver")?;
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    render_summary(&summary, &mut writer).context("failed to render summary")?;
    writer.flush().context("failed to flush output")?;
    Ok(())
}

fn main() -> ExitCode {
    if let Err(err) = logging::init_logging() {
        report_logging_init_error(&err);
        return ExitCode::FAILURE;
    }

    if let Err(err) = try_main() {
        let (code, dataset_code) = err
            .chain()
            .find_map(|cause| {
                // Downcast each cause so context layers do not obscure
                // `CliError` instances that carry structured codes.
                let cause: &(dyn std::error::Error + 'static) = cause;
                cause
                    .downcast_ref::<CliError>()
                    .and_then(|cli_error| match cli_error {
                        CliError::Core(core) => Some((Some(core.code()), core.dataset_code())),
                        _ => None,
                    })
            })
            .unwrap_or((None, None));

        error!(
            error = %err,
            code = ?code.map(|c| c.as_str()),
            dataset_code = ?dataset_code.map(|c| c.as_str()),
            "driver failed"
        );
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Emit a fallback diagnostic to stderr when tracing initialisation fails.
#[expect(
    clippy::print_stderr,
    reason = "one-off diagnostic before tracing is initialised"
)]
fn report_logging_init_error(err: &LoggingError) {
    eprintln!("failed to initialise logging: {err}");
}
