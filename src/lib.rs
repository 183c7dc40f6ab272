//! rnaseq_runner: batch driver for remote RNA-seq processing.
//!
//! Samples are resolved from a workspace directory of paired reads or from a
//! manifest of run accessions, then pushed through trimming, alignment and
//! result collection on a remote compute service with bounded concurrency,
//! per-job retries and restart-safe resumption.

// Core modules
pub mod audit;
pub mod cli;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod pipeline;
pub mod sources;
pub mod upload;

// Re-export commonly used types
pub use error::{GatewayError, LaunchError, SourceError};
pub use gateway::{InMemoryGateway, RpcGateway, TaskGateway};
pub use jobs::{Phase, RnaJob, RnaSource};
pub use pipeline::{PipelineConfig, PipelineError, RnaSeqOrchestrator, RunSummary};
