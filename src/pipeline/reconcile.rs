//! Startup reconciliation.
//!
//! Rebuilds job state from what the remote side already holds, so a restarted
//! run picks up where the previous one stopped:
//!
//! 1. Result folders in the output directory advance their job past the phase
//!    that produced them, unless the folder holds a failure marker, in which
//!    case the attempt is counted against the job's retry budget.
//! 2. Both copied artifacts in the `FPKM` folder advance the job to DONE.
//! 3. Tasks still running remotely are attached to their jobs.
//!
//! Every step only moves phases forward, so running it on each start is safe.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway::{hidden_result_path, join_path, EntryType, TaskGateway};
use crate::jobs::launcher::{samstat_target_name, FPKM_DIR, JOB_FAILED_MARKER};
use crate::jobs::{Phase, RnaJob};

/// Phases whose result folders are recognised, most advanced first.
const RESULT_PHASES: [Phase; 2] = [Phase::Align, Phase::Trim];

/// What reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Jobs whose phase moved forward.
    pub advanced: usize,
    /// Failed attempts found in result folders.
    pub failed_attempts: usize,
    /// Running tasks attached to jobs.
    pub attached: usize,
    /// Whether the `FPKM` folder had to be created.
    pub created_fpkm_dir: bool,
}

/// Runs all reconciliation steps against `jobs`.
pub async fn reconcile(
    jobs: &mut BTreeMap<String, RnaJob>,
    out_dir: &str,
    gateway: &dyn TaskGateway,
) -> Result<ReconcileReport, GatewayError> {
    let mut report = ReconcileReport::default();

    scan_results(jobs, out_dir, gateway, &mut report).await?;
    scan_copied(jobs, out_dir, gateway, &mut report).await?;
    report.attached = attach_running_tasks(jobs, gateway).await?;

    info!(
        advanced = report.advanced,
        failed_attempts = report.failed_attempts,
        attached = report.attached,
        "Reconciled job state with workspace"
    );
    Ok(report)
}

async fn scan_results(
    jobs: &mut BTreeMap<String, RnaJob>,
    out_dir: &str,
    gateway: &dyn TaskGateway,
    report: &mut ReconcileReport,
) -> Result<(), GatewayError> {
    let entries = match gateway.list_directory(out_dir).await {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => {
            debug!(path = %out_dir, "Output directory does not exist yet");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for entry in entries
        .iter()
        .filter(|e| e.entry_type == EntryType::JobResult)
    {
        let Some((phase, name)) = RESULT_PHASES.iter().find_map(|phase| {
            phase
                .job_name_from_output(&entry.name)
                .filter(|name| jobs.contains_key(*name))
                .map(|name| (*phase, name))
        }) else {
            continue;
        };
        let failed = has_failure_marker(gateway, out_dir, &entry.name).await?;
        let Some(job) = jobs.get_mut(name) else {
            continue;
        };

        if failed {
            let retries = job.record_failure();
            report.failed_attempts += 1;
            warn!(job = %job.name(), phase = %phase, retries, "Found failed result");
            continue;
        }

        let Some(next) = phase.next() else {
            continue;
        };
        if job.merge_state(next) {
            report.advanced += 1;
            info!(job = %job.name(), phase = %job.phase(), "Resumed from existing result");
        }
    }
    Ok(())
}

async fn has_failure_marker(
    gateway: &dyn TaskGateway,
    out_dir: &str,
    result_name: &str,
) -> Result<bool, GatewayError> {
    match gateway
        .list_directory(&hidden_result_path(out_dir, result_name))
        .await
    {
        Ok(entries) => Ok(entries.iter().any(|e| e.name == JOB_FAILED_MARKER)),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

async fn scan_copied(
    jobs: &mut BTreeMap<String, RnaJob>,
    out_dir: &str,
    gateway: &dyn TaskGateway,
    report: &mut ReconcileReport,
) -> Result<(), GatewayError> {
    let fpkm_dir = join_path(out_dir, FPKM_DIR);
    let names: HashSet<String> = match gateway.list_directory(&fpkm_dir).await {
        Ok(entries) => entries.into_iter().map(|e| e.name).collect(),
        Err(e) if e.is_not_found() => {
            gateway.create_folder(&fpkm_dir).await?;
            report.created_fpkm_dir = true;
            info!(path = %fpkm_dir, "Created results folder");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for job in jobs.values_mut() {
        let copied = names.contains(&Phase::Copy.output_name(job.name()))
            && names.contains(&samstat_target_name(job.name()));
        if copied && job.merge_state(Phase::Done) {
            report.advanced += 1;
            info!(job = %job.name(), "Results already copied");
        }
    }
    Ok(())
}

/// Attaches remote tasks that are still running to their incomplete jobs.
///
/// Returns the number of tasks attached.
pub async fn attach_running_tasks(
    jobs: &mut BTreeMap<String, RnaJob>,
    gateway: &dyn TaskGateway,
) -> Result<usize, GatewayError> {
    let running = gateway.list_running_tasks().await?;
    let mut attached = 0;
    for job in jobs.values_mut().filter(|j| j.needs_task()) {
        if let Some(task_id) = running.get(job.name()) {
            info!(job = %job.name(), task_id = %task_id, "Attached running task");
            job.set_task_id(task_id.clone());
            attached += 1;
        }
    }
    Ok(attached)
}
