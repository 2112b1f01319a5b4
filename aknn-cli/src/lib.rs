//! Support library for the aknn CLI binaries.
//!
//! Re-exports the driver modules so integration tests can exercise the
//! command pipeline without forking a subprocess.

pub mod cli;
pub mod logging;
pub mod report;
