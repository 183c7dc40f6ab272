//! CLI command definitions for rnaseq-runner.
//!
//! - `run`: drive samples through trim, align and copy
//! - `audit`: classify the alignment results of an output directory
//! - `upload`: copy local read files into the workspace, resumably

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::audit::{audit_directory, DEFAULT_AUDIT_CONCURRENCY};
use crate::gateway::{RpcGateway, RpcGatewayConfig};
use crate::pipeline::config::iteration_budget;
use crate::pipeline::{PipelineConfig, RnaSeqOrchestrator, RunSummary};
use crate::sources::SourceKind;
use crate::upload::{upload_reads, UploadOptions, DEFAULT_PROGRESS_FILE, DEFAULT_UPLOAD_PATTERN};

/// RNA-seq batch runner for the BV-BRC compute service.
#[derive(Parser)]
#[command(name = "rnaseq-runner")]
#[command(about = "Drive RNA-seq samples through remote trimming, alignment and result collection")]
#[command(version)]
#[command(
    long_about = "rnaseq-runner submits trimming and alignment tasks for a batch of RNA-seq samples,\nwatches them to completion with bounded concurrency and retries, and copies the\nexpression results into an FPKM folder. Reruns resume from what is already in the\nworkspace.\n\nExample usage:\n  rnaseq-runner run 511145.183 /me@patricbrc.org/home/reads /me@patricbrc.org/home/RNASeq me@patricbrc.org"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Process a batch of samples until every job is done or the iteration budget runs out.
    Run(RunArgs),

    /// Count successful, unpaired and failed alignment results in a directory.
    Audit(AuditArgs),

    /// Upload local read files into a workspace folder.
    Upload(UploadArgs),
}

/// Arguments for `rnaseq-runner run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Reference genome for the alignment phase.
    pub genome_id: String,

    /// Input workspace directory of read files, or a local accession manifest.
    pub input: String,

    /// Workspace directory receiving all results.
    pub output: String,

    /// Workspace owner (user@patricbrc.org).
    pub workspace: String,

    /// Kind of input location.
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Read file name pattern; group 1 is the sample name, group 2 the read side.
    #[arg(long)]
    pub pattern: Option<String>,

    /// Value of the read-side group that marks a left read.
    #[arg(long)]
    pub left_id: Option<String>,

    /// Maximum loop iterations; a negative value loops until all jobs are done.
    #[arg(long, allow_hyphen_values = true)]
    pub max_iter: Option<i64>,

    /// Minutes to wait between loop iterations.
    #[arg(long)]
    pub wait: Option<u64>,

    /// Maximum number of remote tasks running at once.
    #[arg(long)]
    pub max_tasks: Option<usize>,

    /// Maximum number of retries per job.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Number of recent tasks inspected when looking for running tasks.
    #[arg(long)]
    pub task_limit: Option<usize>,

    /// The accession manifest has no header line.
    #[arg(long)]
    pub no_header: bool,

    /// Write the run summary as YAML to this file.
    #[arg(long)]
    pub summary_file: Option<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `rnaseq-runner audit`.
#[derive(Parser, Debug)]
pub struct AuditArgs {
    /// Workspace directory holding the results.
    pub dir: String,

    /// Workspace owner (user@patricbrc.org).
    pub workspace: String,

    /// Number of folder listings in flight at once.
    #[arg(long, default_value_t = DEFAULT_AUDIT_CONCURRENCY)]
    pub concurrency: usize,

    /// Output JSON report with job names.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `rnaseq-runner upload`.
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Local directory of read files.
    pub local_dir: PathBuf,

    /// Workspace folder receiving the files.
    pub remote_dir: String,

    /// Workspace owner (user@patricbrc.org).
    pub workspace: String,

    /// Pattern a file name must match to be uploaded.
    #[arg(long, default_value = DEFAULT_UPLOAD_PATTERN)]
    pub pattern: String,

    /// Progress file name inside the local directory.
    #[arg(long, default_value = DEFAULT_PROGRESS_FILE)]
    pub progress: String,

    /// Show what would be uploaded without copying anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Output JSON report.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments without running any command.
///
/// Useful for initializing logging before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Audit(args) => run_audit_command(args).await,
        Commands::Upload(args) => run_upload_command(args).await,
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

/// Layers the command-line values over defaults and `RNASEQ_*` variables.
fn build_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?
        .with_reference_genome_id(args.genome_id.as_str())
        .with_input(args.input.as_str())
        .with_output_dir(args.output.as_str())
        .with_workspace(args.workspace.as_str());

    if let Some(kind) = args.source {
        config = config.with_source_kind(kind);
    }
    if let Some(pattern) = &args.pattern {
        config = config.with_read_pattern(pattern.as_str());
    }
    if let Some(left_id) = &args.left_id {
        config = config.with_left_id(left_id.as_str());
    }
    if let Some(max_iter) = args.max_iter {
        config = config.with_max_iterations(iteration_budget(max_iter));
    }
    if let Some(minutes) = args.wait {
        config = config.with_wait_interval(std::time::Duration::from_secs(minutes * 60));
    }
    if let Some(max_tasks) = args.max_tasks {
        config = config.with_max_concurrent_tasks(max_tasks);
    }
    if let Some(max_retries) = args.max_retries {
        config = config.with_max_retries(max_retries);
    }
    if let Some(limit) = args.task_limit {
        config = config.with_task_query_limit(limit);
    }
    if args.no_header {
        config = config.with_manifest_header(false);
    }

    config.validate()?;
    Ok(config)
}

fn connect(workspace: &str, task_query_limit: Option<usize>) -> anyhow::Result<RpcGateway> {
    let mut gateway_config = RpcGatewayConfig::from_env(workspace)?;
    if let Some(limit) = task_query_limit {
        gateway_config = gateway_config.with_task_query_limit(limit);
    }
    Ok(RpcGateway::new(gateway_config)?)
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let gateway = connect(&config.workspace, Some(config.task_query_limit))?;

    info!(
        input = %config.input,
        output = %config.output_dir,
        source = %config.source_kind,
        genome = %config.reference_genome_id,
        "Starting RNA-seq run"
    );

    let mut orchestrator = RnaSeqOrchestrator::new(config, Arc::new(gateway))?;
    orchestrator.prepare().await?;
    let summary = orchestrator.run().await?;

    if let Some(path) = &args.summary_file {
        write_summary(path, &summary)?;
        info!(path = %path.display(), "Run summary written");
    }

    if args.json {
        let json = serde_json::to_string_pretty(&summary)?;
        println!("{json}");
    } else {
        println!("{}", summary);
    }
    Ok(())
}

fn write_summary(path: &std::path::Path, summary: &RunSummary) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(summary)
        .map_err(|e| anyhow::anyhow!("Failed to serialize run summary: {}", e))?;
    std::fs::write(path, yaml)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
    Ok(())
}

// ============================================================================
// Audit and Upload Command Implementation
// ============================================================================

async fn run_audit_command(args: AuditArgs) -> anyhow::Result<()> {
    if args.concurrency == 0 {
        anyhow::bail!("--concurrency must be greater than 0");
    }
    let gateway = connect(&args.workspace, None)?;
    let report = audit_directory(&gateway, &args.dir, args.concurrency).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&report)?;
        println!("{json}");
    } else {
        println!("{}", report);
    }
    Ok(())
}

async fn run_upload_command(args: UploadArgs) -> anyhow::Result<()> {
    let gateway = connect(&args.workspace, None)?;
    let options = UploadOptions::new(args.local_dir.clone(), args.remote_dir.as_str())
        .with_pattern(args.pattern.as_str())
        .with_progress_file(args.progress.as_str())
        .with_dry_run(args.dry_run);
    let report = upload_reads(&gateway, &options).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&report)?;
        println!("{json}");
    } else {
        println!("Uploaded:     {}", report.uploaded.len());
        println!("Already done: {}", report.already_done);
        println!("Not reads:    {}", report.not_reads);
    }
    Ok(())
}
