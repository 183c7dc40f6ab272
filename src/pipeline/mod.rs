//! Pipeline orchestration for RNA-seq runs.
//!
//! # Architecture
//!
//! - **Config**: run settings from defaults, environment and command line
//! - **Reconcile**: rebuilds job state from results already in the workspace
//! - **Orchestrator**: the polling loop that starts, retries and advances jobs
//! - **Progress**: per-cycle reports and the final run summary
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rnaseq_runner::gateway::{RpcGateway, RpcGatewayConfig};
//! use rnaseq_runner::pipeline::{PipelineConfig, RnaSeqOrchestrator};
//!
//! let config = PipelineConfig::from_env()?
//!     .with_input("/me@patricbrc.org/home/reads")
//!     .with_output_dir("/me@patricbrc.org/home/RNASeq")
//!     .with_workspace("me@patricbrc.org")
//!     .with_reference_genome_id("511145.183");
//!
//! let gateway = RpcGateway::new(RpcGatewayConfig::from_env(&config.workspace)?)?;
//! let mut orchestrator = RnaSeqOrchestrator::new(config, Arc::new(gateway))?;
//! orchestrator.prepare().await?;
//! let summary = orchestrator.run().await?;
//! println!("{}", summary);
//! ```

pub mod config;
pub mod orchestrator;
pub mod progress;
pub mod reconcile;

pub use config::{ConfigError, PipelineConfig};
pub use orchestrator::{PipelineError, RnaSeqOrchestrator};
pub use progress::{CycleReport, RunSummary};
pub use reconcile::ReconcileReport;
