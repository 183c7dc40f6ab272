//! Audit of a finished output directory.
//!
//! Every alignment result in the directory is classified:
//! - **Successful**: the result folder has no failure marker
//! - **Unpaired**: it failed and the trimming output has fewer than two reads
//! - **Failed**: it failed for any other reason
//!
//! Folder listings run concurrently with a bounded number in flight.

use std::fmt;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::gateway::{hidden_result_path, DirEntry, EntryType, TaskGateway};
use crate::jobs::Phase;

/// Prefix of the marker files a failed task leaves behind.
const FAILURE_PREFIX: &str = "JobFailed";

/// Default number of concurrent folder listings.
pub const DEFAULT_AUDIT_CONCURRENCY: usize = 8;

/// Outcome of one alignment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Successful,
    Unpaired,
    Failed,
}

/// Classified jobs of an output directory, each list sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub successful: Vec<String>,
    pub unpaired: Vec<String>,
    pub failed: Vec<String>,
}

impl AuditReport {
    fn add(&mut self, name: String, status: AuditStatus) {
        match status {
            AuditStatus::Successful => self.successful.push(name),
            AuditStatus::Unpaired => self.unpaired.push(name),
            AuditStatus::Failed => self.failed.push(name),
        }
    }

    fn sort(&mut self) {
        self.successful.sort();
        self.unpaired.sort();
        self.failed.sort();
    }

    /// Number of alignment results inspected.
    pub fn total(&self) -> usize {
        self.successful.len() + self.unpaired.len() + self.failed.len()
    }
}

/// Tab-separated `Status`/`count` table.
impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status\tcount")?;
        writeln!(f, "Successful\t{}", self.successful.len())?;
        writeln!(f, "Unpaired\t{}", self.unpaired.len())?;
        write!(f, "Failed\t{}", self.failed.len())
    }
}

/// Audits the alignment results in `dir`.
///
/// # Errors
///
/// Returns the first gateway error hit while listing `dir` or a result
/// folder. Missing result folders are not errors.
pub async fn audit_directory(
    gateway: &dyn TaskGateway,
    dir: &str,
    concurrency: usize,
) -> Result<AuditReport, GatewayError> {
    let jobs: Vec<String> = gateway
        .list_directory(dir)
        .await?
        .into_iter()
        .filter(|e| e.entry_type == EntryType::JobResult)
        .filter_map(|e| Phase::Align.job_name_from_output(&e.name).map(str::to_string))
        .collect();
    info!(path = %dir, jobs = jobs.len(), "Auditing alignment results");

    let mut report = AuditReport::default();
    let mut results = stream::iter(jobs)
        .map(|name| async move {
            let status = classify(gateway, dir, &name).await?;
            Ok::<_, GatewayError>((name, status))
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((name, status)) = results.try_next().await? {
        debug!(job = %name, status = ?status, "Audited job");
        report.add(name, status);
    }
    report.sort();

    info!(
        successful = report.successful.len(),
        unpaired = report.unpaired.len(),
        failed = report.failed.len(),
        "Audit complete"
    );
    Ok(report)
}

async fn classify(
    gateway: &dyn TaskGateway,
    dir: &str,
    job: &str,
) -> Result<AuditStatus, GatewayError> {
    let rna_folder = hidden_result_path(dir, &Phase::Align.output_name(job));
    let failed = list_or_empty(gateway, &rna_folder)
        .await?
        .iter()
        .any(|e| e.name.starts_with(FAILURE_PREFIX));
    if !failed {
        return Ok(AuditStatus::Successful);
    }

    let fq_folder = hidden_result_path(dir, &Phase::Trim.output_name(job));
    let reads = list_or_empty(gateway, &fq_folder)
        .await?
        .iter()
        .filter(|e| e.entry_type == EntryType::Reads)
        .count();
    if reads < 2 {
        Ok(AuditStatus::Unpaired)
    } else {
        Ok(AuditStatus::Failed)
    }
}

async fn list_or_empty(
    gateway: &dyn TaskGateway,
    path: &str,
) -> Result<Vec<DirEntry>, GatewayError> {
    match gateway.list_directory(path).await {
        Ok(entries) => Ok(entries),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
