//! Phase task launchers.
//!
//! Translates a job in a given phase into the action that advances it:
//!
//! - **TRIM**: submit a `FastqUtils` trimming task for the raw reads
//! - **ALIGN**: submit an `RNASeq` alignment task for the trimmed reads
//! - **COPY**: synchronously copy the expression results into the shared
//!   `FPKM` folder (no remote task)
//!
//! Dispatch is a plain `match` on [`Phase`]; each arm knows where its
//! inputs live and how its outputs are named.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::job::RnaJob;
use super::phase::Phase;
use crate::error::LaunchError;
use crate::gateway::{hidden_result_path, join_path, EntryType, TaskGateway, TaskId};

/// Service that trims raw reads.
pub const TRIM_SERVICE: &str = "FastqUtils";

/// Service that aligns trimmed reads and computes expression values.
pub const ALIGN_SERVICE: &str = "RNASeq";

/// Folder in the output directory that receives the copied results.
pub const FPKM_DIR: &str = "FPKM";

/// Expression tracking file written by the alignment service.
pub const FPKM_TRACKING_FILE: &str = "Tuxedo_0_replicate1_genes.fpkm_tracking";

/// Suffix of the alignment quality report written by the alignment service.
pub const SAMSTAT_SUFFIX: &str = ".bam.samstat.html";

/// Marker file left in a result folder when the task failed.
pub const JOB_FAILED_MARKER: &str = "JobFailed.txt";

const TRIM_RECIPE: [&str; 2] = ["Trim", "FastQC"];
const ALIGN_RECIPE: &str = "RNA-Rocket";

/// A fully-formed service submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    /// Name of the remote service.
    pub service: &'static str,
    /// Parameter object for the service.
    pub params: Value,
}

/// Paths of the two artifacts produced by the COPY phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTargets {
    /// Destination of the expression tracking file.
    pub fpkm: String,
    /// Destination of the alignment quality report.
    pub samstat: String,
}

impl CopyTargets {
    /// Destination paths for a job's copied results.
    pub fn for_job(out_dir: &str, job_name: &str) -> Self {
        let dir = join_path(out_dir, FPKM_DIR);
        Self {
            fpkm: join_path(&dir, &Phase::Copy.output_name(job_name)),
            samstat: join_path(&dir, &samstat_target_name(job_name)),
        }
    }
}

/// File name of a job's copied quality report inside the `FPKM` folder.
pub fn samstat_target_name(job_name: &str) -> String {
    format!("{}.samstat.html", job_name)
}

/// Result of the COPY phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Both artifacts were copied.
    Copied,
    /// The alignment output lacked one or both artifacts; nothing was copied.
    MissingArtifacts,
    /// A copy call failed.
    Failed(String),
}

/// What starting a job's current phase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// A remote task was submitted.
    Submitted(TaskId),
    /// The synchronous copy ran.
    Copy(CopyOutcome),
    /// The job is done; nothing to start.
    Nothing,
}

/// Starts the action for a job's current phase.
pub async fn launch(job: &RnaJob, gateway: &dyn TaskGateway) -> Result<Launch, LaunchError> {
    match job.phase() {
        Phase::Trim => {
            let request = trim_request(job)?;
            submit(job, gateway, request).await
        }
        Phase::Align => {
            let request = align_request(job, gateway).await?;
            submit(job, gateway, request).await
        }
        Phase::Copy => Ok(Launch::Copy(copy_results(job, gateway).await)),
        Phase::Done => Ok(Launch::Nothing),
    }
}

async fn submit(
    job: &RnaJob,
    gateway: &dyn TaskGateway,
    request: ServiceRequest,
) -> Result<Launch, LaunchError> {
    let task_id = gateway.submit(request.service, &request.params).await?;
    debug!(job = %job.name(), service = request.service, task_id = %task_id, "Submitted service request");
    Ok(Launch::Submitted(task_id))
}

/// Builds the trimming request for a job.
pub fn trim_request(job: &RnaJob) -> Result<ServiceRequest, LaunchError> {
    let source = job
        .source()
        .ok_or_else(|| LaunchError::MissingSource(job.name().to_string()))?;

    let mut params = Map::new();
    params.insert(
        "output_file".to_string(),
        json!(Phase::Trim.output_name(job.name())),
    );
    params.insert("output_path".to_string(), json!(job.out_dir()));
    params.insert("recipe".to_string(), json!(TRIM_RECIPE));
    source.store(&mut params);

    Ok(ServiceRequest {
        service: TRIM_SERVICE,
        params: Value::Object(params),
    })
}

/// Builds the alignment request for a job from its trimmed reads.
///
/// The trimming output folder must hold exactly two read files; they become
/// the left and right reads of the alignment library in name order.
pub async fn align_request(
    job: &RnaJob,
    gateway: &dyn TaskGateway,
) -> Result<ServiceRequest, LaunchError> {
    let trim_dir = hidden_result_path(job.out_dir(), &Phase::Trim.output_name(job.name()));
    let entries = match gateway.list_directory(&trim_dir).await {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let mut reads: Vec<String> = entries
        .into_iter()
        .filter(|entry| entry.entry_type == EntryType::Reads)
        .map(|entry| join_path(&trim_dir, &entry.name))
        .collect();
    if reads.len() != 2 {
        return Err(LaunchError::TrimmedReads {
            job: job.name().to_string(),
            path: trim_dir,
            found: reads.len(),
        });
    }
    reads.sort();

    Ok(ServiceRequest {
        service: ALIGN_SERVICE,
        params: json!({
            "paired_end_libs": [{ "read1": reads[0], "read2": reads[1] }],
            "single_end_libs": [],
            "output_file": Phase::Align.output_name(job.name()),
            "output_path": job.out_dir(),
            "reference_genome_id": job.genome_id(),
            "recipe": ALIGN_RECIPE,
            "strand_specific": "1",
        }),
    })
}

/// Copies the expression tracking file and quality report of a finished
/// alignment into the `FPKM` folder.
///
/// Never returns an error: a missing artifact or a failed copy is reported in
/// the outcome and the caller still moves the job to DONE.
pub async fn copy_results(job: &RnaJob, gateway: &dyn TaskGateway) -> CopyOutcome {
    let align_dir = hidden_result_path(job.out_dir(), &Phase::Align.output_name(job.name()));
    let entries = match gateway.list_directory(&align_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(job = %job.name(), error = %e, "Could not list alignment output");
            return CopyOutcome::Failed(e.to_string());
        }
    };

    let fpkm = entries.iter().find(|e| e.name == FPKM_TRACKING_FILE);
    let samstat = entries.iter().find(|e| e.name.ends_with(SAMSTAT_SUFFIX));
    let (Some(fpkm), Some(samstat)) = (fpkm, samstat) else {
        warn!(job = %job.name(), path = %align_dir, "Alignment did not complete: result files missing");
        return CopyOutcome::MissingArtifacts;
    };

    let targets = CopyTargets::for_job(job.out_dir(), job.name());
    let copies = [
        (join_path(&align_dir, &samstat.name), targets.samstat),
        (join_path(&align_dir, &fpkm.name), targets.fpkm),
    ];
    for (src, dst) in copies {
        info!(job = %job.name(), src = %src, dst = %dst, "Copying remote file");
        if let Err(e) = gateway.copy_remote_file(&src, &dst).await {
            warn!(job = %job.name(), src = %src, error = %e, "Copy failed");
            return CopyOutcome::Failed(e.to_string());
        }
    }
    CopyOutcome::Copied
}
