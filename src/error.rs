//! Error types for rnaseq-runner operations.
//!
//! Defines the error types shared across subsystems:
//! - Remote gateway calls (workspace listing, task submission and polling)
//! - Sample source resolution
//! - Phase task launching
//!
//! Configuration and pipeline-level errors live next to the code that raises
//! them (`pipeline::config::ConfigError`, `pipeline::orchestrator::PipelineError`).

use thiserror::Error;

/// Errors that can occur while talking to the remote compute service.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Remote call {method} failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Failed to parse response from {method}: {message}")]
    ParseError { method: String, message: String },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Missing authentication token: set RNASEQ_AUTH_TOKEN or create ~/.patric_token")]
    MissingToken,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Returns whether the error means the requested path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Errors that can occur while resolving the input samples.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Invalid read-file pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Read-file pattern '{0}' must have two capture groups (sample name, read side)")]
    MissingCaptureGroups(String),

    #[error("Sample '{sample}' has more than one {side} read file: '{first}' and '{second}'")]
    DuplicateReadFile {
        sample: String,
        side: String,
        first: String,
        second: String,
    },

    #[error("Failed to read manifest '{path}': {source}")]
    Manifest {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Errors that can occur while starting the task for a job's current phase.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Job '{0}' has no read source")]
    MissingSource(String),

    #[error("Expected two trimmed read files for job '{job}' in {path}, found {found}")]
    TrimmedReads {
        job: String,
        path: String,
        found: usize,
    },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl LaunchError {
    /// Returns whether the error concerns only this job and the batch can go on.
    ///
    /// Transport errors are not job-specific: they abort the run so that a
    /// restart can re-derive state from the remote side.
    pub fn is_job_specific(&self) -> bool {
        !matches!(self, LaunchError::Gateway(_))
    }
}
