//! Command-line interface for rnaseq-runner.
//!
//! Provides commands for running a batch, auditing its results and uploading
//! local reads.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
