//! Pipeline configuration for the orchestrator.
//!
//! This module provides configuration options for an RNA-seq run, including
//! the input and output locations, source resolution, loop pacing, admission
//! control and retry budget.

use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::sources::paired::{DEFAULT_LEFT_ID, DEFAULT_READ_PATTERN};
use crate::sources::{SourceKind, SourceSettings};

/// Smallest accepted task-query limit; smaller values miss running tasks.
const MIN_TASK_QUERY_LIMIT: usize = 100;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Locations
    /// Input location: a workspace directory or a local manifest file.
    pub input: String,
    /// Workspace directory receiving all phase outputs.
    pub output_dir: String,
    /// Workspace owner, e.g. `user@patricbrc.org`.
    pub workspace: String,

    // Source resolution
    /// Kind of input location.
    pub source_kind: SourceKind,
    /// Filename pattern for paired read files.
    pub read_pattern: String,
    /// Read-side value that marks a left read.
    pub left_id: String,
    /// Whether the accession manifest starts with a header line.
    pub manifest_has_header: bool,

    // Alignment
    /// Reference genome for the alignment phase.
    pub reference_genome_id: String,

    // Loop control
    /// Maximum number of loop iterations; `None` runs until every job is done.
    pub max_iterations: Option<u32>,
    /// Pause between loop iterations.
    pub wait_interval: Duration,
    /// Maximum number of remote tasks in flight at once.
    pub max_concurrent_tasks: usize,
    /// Maximum failed attempts retried per job.
    pub max_retries: u32,
    /// How many recent tasks to inspect when looking for running tasks.
    pub task_query_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: String::new(),
            output_dir: String::new(),
            workspace: String::new(),

            source_kind: SourceKind::WorkspaceDir,
            read_pattern: DEFAULT_READ_PATTERN.to_string(),
            left_id: DEFAULT_LEFT_ID.to_string(),
            manifest_has_header: true,

            reference_genome_id: String::new(),

            max_iterations: Some(100),
            wait_interval: Duration::from_secs(7 * 60),
            max_concurrent_tasks: 10,
            max_retries: 3,
            task_query_limit: 1000,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RNASEQ_INPUT`: input directory or manifest file
    /// - `RNASEQ_OUTPUT_DIR`: output directory in the workspace
    /// - `RNASEQ_WORKSPACE`: workspace owner
    /// - `RNASEQ_SOURCE`: `workspace-dir` or `accession-file` (default: workspace-dir)
    /// - `RNASEQ_READ_PATTERN`: read filename pattern (default: `(.+)_(R[12])_001\.fastq`)
    /// - `RNASEQ_LEFT_ID`: left-read identifier (default: R1)
    /// - `RNASEQ_MANIFEST_HEADER`: manifest has a header line (default: true)
    /// - `RNASEQ_GENOME_ID`: reference genome id
    /// - `RNASEQ_MAX_ITER`: maximum loop iterations, negative to loop forever (default: 100)
    /// - `RNASEQ_WAIT_MINUTES`: minutes between iterations (default: 7)
    /// - `RNASEQ_MAX_TASKS`: maximum concurrent remote tasks (default: 10)
    /// - `RNASEQ_MAX_RETRIES`: maximum retries per job (default: 3)
    /// - `RNASEQ_TASK_LIMIT`: tasks inspected when listing running tasks (default: 1000)
    ///
    /// Validation is left to [`PipelineConfig::validate`], since callers
    /// usually layer command-line values on top first.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Locations
        if let Ok(val) = std::env::var("RNASEQ_INPUT") {
            config.input = val;
        }

        if let Ok(val) = std::env::var("RNASEQ_OUTPUT_DIR") {
            config.output_dir = val;
        }

        if let Ok(val) = std::env::var("RNASEQ_WORKSPACE") {
            config.workspace = val;
        }

        // Source resolution
        if let Ok(val) = std::env::var("RNASEQ_SOURCE") {
            config.source_kind = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "RNASEQ_SOURCE".to_string(),
                message,
            })?;
        }

        if let Ok(val) = std::env::var("RNASEQ_READ_PATTERN") {
            config.read_pattern = val;
        }

        if let Ok(val) = std::env::var("RNASEQ_LEFT_ID") {
            config.left_id = val;
        }

        if let Ok(val) = std::env::var("RNASEQ_MANIFEST_HEADER") {
            config.manifest_has_header = parse_env_bool(&val, "RNASEQ_MANIFEST_HEADER")?;
        }

        if let Ok(val) = std::env::var("RNASEQ_GENOME_ID") {
            config.reference_genome_id = val;
        }

        // Loop control
        if let Ok(val) = std::env::var("RNASEQ_MAX_ITER") {
            let iterations: i64 = parse_env_value(&val, "RNASEQ_MAX_ITER")?;
            config.max_iterations = iteration_budget(iterations);
        }

        if let Ok(val) = std::env::var("RNASEQ_WAIT_MINUTES") {
            let minutes: u64 = parse_env_value(&val, "RNASEQ_WAIT_MINUTES")?;
            config.wait_interval = Duration::from_secs(minutes * 60);
        }

        if let Ok(val) = std::env::var("RNASEQ_MAX_TASKS") {
            config.max_concurrent_tasks = parse_env_value(&val, "RNASEQ_MAX_TASKS")?;
        }

        if let Ok(val) = std::env::var("RNASEQ_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "RNASEQ_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("RNASEQ_TASK_LIMIT") {
            config.task_query_limit = parse_env_value(&val, "RNASEQ_TASK_LIMIT")?;
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Location validation
        if self.input.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "input location cannot be empty".to_string(),
            ));
        }

        if self.output_dir.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output directory cannot be empty".to_string(),
            ));
        }

        if self.workspace.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "workspace cannot be empty".to_string(),
            ));
        }

        if self.reference_genome_id.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "reference_genome_id cannot be empty".to_string(),
            ));
        }

        // Source validation
        if self.source_kind == SourceKind::WorkspaceDir {
            let regex = Regex::new(&self.read_pattern).map_err(|e| {
                ConfigError::ValidationFailed(format!(
                    "read_pattern '{}' is not a valid regex: {}",
                    self.read_pattern, e
                ))
            })?;
            if regex.captures_len() < 3 {
                return Err(ConfigError::ValidationFailed(format!(
                    "read_pattern '{}' needs two capture groups (sample name, read side)",
                    self.read_pattern
                )));
            }

            if self.left_id.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "left_id cannot be empty".to_string(),
                ));
            }
        }

        // Loop validation
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }

        if self.task_query_limit < MIN_TASK_QUERY_LIMIT {
            return Err(ConfigError::ValidationFailed(format!(
                "task_query_limit must be at least {} to find all running tasks",
                MIN_TASK_QUERY_LIMIT
            )));
        }

        Ok(())
    }

    /// Settings handed to the sample source resolver.
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            out_dir: self.output_dir.clone(),
            genome_id: self.reference_genome_id.clone(),
            read_pattern: self.read_pattern.clone(),
            left_id: self.left_id.clone(),
            manifest_has_header: self.manifest_has_header,
        }
    }

    /// Builder method to set the input location.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to set the workspace owner.
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Builder method to set the source kind.
    pub fn with_source_kind(mut self, kind: SourceKind) -> Self {
        self.source_kind = kind;
        self
    }

    /// Builder method to set the read filename pattern.
    pub fn with_read_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.read_pattern = pattern.into();
        self
    }

    /// Builder method to set the left-read identifier.
    pub fn with_left_id(mut self, left_id: impl Into<String>) -> Self {
        self.left_id = left_id.into();
        self
    }

    /// Builder method to say whether the manifest has a header line.
    pub fn with_manifest_header(mut self, has_header: bool) -> Self {
        self.manifest_has_header = has_header;
        self
    }

    /// Builder method to set the reference genome.
    pub fn with_reference_genome_id(mut self, genome_id: impl Into<String>) -> Self {
        self.reference_genome_id = genome_id.into();
        self
    }

    /// Builder method to set the iteration budget (`None` loops forever).
    pub fn with_max_iterations(mut self, max: Option<u32>) -> Self {
        self.max_iterations = max;
        self
    }

    /// Builder method to set the pause between iterations.
    pub fn with_wait_interval(mut self, wait: Duration) -> Self {
        self.wait_interval = wait;
        self
    }

    /// Builder method to set max concurrent tasks.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Builder method to set max retries per job.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Builder method to set the task-query limit.
    pub fn with_task_query_limit(mut self, limit: usize) -> Self {
        self.task_query_limit = limit;
        self
    }
}

/// Converts a signed iteration count into a budget; negative means unlimited.
pub fn iteration_budget(iterations: i64) -> Option<u32> {
    if iterations < 0 {
        None
    } else {
        Some(u32::try_from(iterations).unwrap_or(u32::MAX))
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
