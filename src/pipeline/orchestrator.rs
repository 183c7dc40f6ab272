//! Pipeline orchestrator driving RNA-seq jobs through their phases.
//!
//! `RnaSeqOrchestrator` owns the job set and runs the polling loop:
//! - One batched status query per cycle for every outstanding task
//! - Retry or fail on task failure, advance on completion
//! - Admission control against `max_concurrent_tasks`
//! - Launching idle jobs in name order

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{GatewayError, LaunchError, SourceError};
use crate::gateway::{TaskGateway, TaskId, TaskStatus};
use crate::jobs::RnaJob;
use crate::sources;

use super::config::PipelineConfig;
use super::progress::{CycleReport, RunSummary};
use super::reconcile::{self, ReconcileReport};

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Sample resolution error.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Remote service error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Task launch error that is not specific to one job.
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    /// The input produced no runnable jobs.
    #[error("No runnable jobs found in {0}")]
    NoJobs(String),
}

/// The orchestration loop and the job set it owns.
pub struct RnaSeqOrchestrator {
    config: PipelineConfig,
    gateway: Arc<dyn TaskGateway>,
    jobs: BTreeMap<String, RnaJob>,
    iterations: u32,
}

impl RnaSeqOrchestrator {
    /// Creates an orchestrator with no jobs.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<dyn TaskGateway>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            gateway,
            jobs: BTreeMap::new(),
            iterations: 0,
        })
    }

    /// Resolves the input into jobs and reconciles them with the workspace.
    ///
    /// Nothing is submitted here; after this call every job reflects the
    /// results and running tasks left by earlier runs.
    pub async fn prepare(&mut self) -> Result<ReconcileReport, PipelineError> {
        let resolved = sources::resolve_jobs(
            self.config.source_kind,
            &self.config.input,
            &self.config.source_settings(),
            self.gateway.as_ref(),
        )
        .await?;

        if self.load_jobs(resolved) == 0 {
            return Err(PipelineError::NoJobs(self.config.input.clone()));
        }
        self.reconcile().await
    }

    /// Adds resolved jobs, dropping those without a complete read source.
    ///
    /// Returns the number of jobs now tracked.
    pub fn load_jobs(&mut self, jobs: BTreeMap<String, RnaJob>) -> usize {
        for (name, job) in jobs {
            if !job.is_prepared() {
                warn!(job = %name, "Sample has no complete read source; skipping");
                continue;
            }
            self.jobs.entry(name).or_insert(job);
        }
        info!(jobs = self.jobs.len(), "Jobs loaded");
        self.jobs.len()
    }

    /// Adds a single job, replacing any job with the same name.
    pub fn insert_job(&mut self, job: RnaJob) {
        self.jobs.insert(job.name().to_string(), job);
    }

    /// Applies existing results and running tasks to the job set.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, PipelineError> {
        let report = reconcile::reconcile(
            &mut self.jobs,
            &self.config.output_dir,
            self.gateway.as_ref(),
        )
        .await?;
        Ok(report)
    }

    /// Runs cycles until every job is DONE or the iteration budget runs out.
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        info!(
            jobs = self.jobs.len(),
            max_tasks = self.config.max_concurrent_tasks,
            max_retries = self.config.max_retries,
            "Starting orchestration loop"
        );

        let mut executed = 0u32;
        while self.incomplete_count() > 0 {
            if self.budget_exhausted(executed) {
                warn!(
                    incomplete = self.incomplete_count(),
                    "Iteration budget exhausted; rerun to resume"
                );
                break;
            }

            let report = self.run_cycle().await?;
            report.log();
            executed += 1;

            if report.incomplete > 0 && !self.budget_exhausted(executed) {
                tokio::time::sleep(self.config.wait_interval).await;
            }
        }

        let summary = self.summary();
        info!(
            done = summary.done,
            failed = summary.failed.len(),
            incomplete = summary.incomplete.len(),
            "Orchestration loop finished"
        );
        Ok(summary)
    }

    fn budget_exhausted(&self, executed: u32) -> bool {
        self.config
            .max_iterations
            .is_some_and(|max| executed >= max)
    }

    /// Runs one iteration: poll, handle statuses, launch idle jobs.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PipelineError> {
        self.iterations += 1;
        let mut report = CycleReport {
            iteration: self.iterations,
            ..CycleReport::default()
        };

        self.handle_statuses(&mut report).await?;
        self.launch_idle(&mut report).await?;

        report.active = self.active_task_count();
        report.incomplete = self.incomplete_count();
        Ok(report)
    }

    async fn handle_statuses(&mut self, report: &mut CycleReport) -> Result<(), PipelineError> {
        let outstanding: Vec<TaskId> = self
            .jobs
            .values()
            .filter_map(|job| job.task_id().map(str::to_string))
            .collect();
        if outstanding.is_empty() {
            return Ok(());
        }

        let statuses = self.gateway.poll_status(&outstanding).await?;
        let gateway = self.gateway.as_ref();
        let max_retries = self.config.max_retries;

        for job in self.jobs.values_mut() {
            let Some(task_id) = job.task_id().map(str::to_string) else {
                continue;
            };
            // Ids missing from the response are still queued remotely.
            let status = statuses
                .get(&task_id)
                .copied()
                .unwrap_or(TaskStatus::Running);

            match status {
                TaskStatus::Running => {}
                TaskStatus::Completed => {
                    let finished = job.phase();
                    job.next_phase();
                    report.completed += 1;
                    info!(
                        job = %job.name(),
                        phase = %finished,
                        task_id = %task_id,
                        next = %job.phase(),
                        "Task completed"
                    );
                }
                TaskStatus::Failed if job.retry_count() < max_retries => {
                    let retries = job.record_failure();
                    warn!(
                        job = %job.name(),
                        phase = %job.phase(),
                        task_id = %task_id,
                        retries,
                        max_retries,
                        "Task failed; resubmitting"
                    );
                    if start_job(job, gateway).await? {
                        report.retried += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                TaskStatus::Failed => {
                    job.set_failed();
                    report.failed += 1;
                    error!(
                        job = %job.name(),
                        task_id = %task_id,
                        retries = job.retry_count(),
                        "Task failed; no retries left"
                    );
                }
            }
        }
        Ok(())
    }

    async fn launch_idle(&mut self, report: &mut CycleReport) -> Result<(), PipelineError> {
        let mut capacity = self
            .config
            .max_concurrent_tasks
            .saturating_sub(self.active_task_count());
        let gateway = self.gateway.as_ref();

        for job in self.jobs.values_mut().filter(|job| job.needs_task()) {
            // COPY runs locally and takes no task slot.
            if job.phase().is_remote() && capacity == 0 {
                continue;
            }

            let phase = job.phase();
            if !start_job(job, gateway).await? {
                report.failed += 1;
                continue;
            }
            report.started += 1;
            if let Some(task_id) = job.task_id() {
                capacity -= 1;
                info!(job = %job.name(), phase = %phase, task_id = %task_id, "Task started");
            }
        }
        Ok(())
    }

    /// Returns the tracked jobs, ordered by name.
    pub fn jobs(&self) -> &BTreeMap<String, RnaJob> {
        &self.jobs
    }

    /// Returns a job by name.
    pub fn job(&self, name: &str) -> Option<&RnaJob> {
        self.jobs.get(name)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of cycles run so far.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Number of jobs not yet DONE.
    pub fn incomplete_count(&self) -> usize {
        self.jobs.values().filter(|job| !job.is_done()).count()
    }

    /// Number of remote tasks currently in flight.
    pub fn active_task_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|job| job.task_id().is_some())
            .count()
    }

    /// Snapshot of the job set.
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_jobs(&self.jobs, self.iterations)
    }
}

/// Starts a job's current phase.
///
/// Returns `false` if the job could not be started and was marked failed.
/// Transport errors are returned to abort the run.
async fn start_job(job: &mut RnaJob, gateway: &dyn TaskGateway) -> Result<bool, PipelineError> {
    match job.start_task(gateway).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_job_specific() => {
            error!(job = %job.name(), phase = %job.phase(), error = %e, "Could not start task");
            job.set_failed();
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::gateway::InMemoryGateway;
    use crate::jobs::{Phase, RnaSource};

    const OUT: &str = "/me/home/out";

    fn config() -> PipelineConfig {
        PipelineConfig::new()
            .with_input("/me/home/reads")
            .with_output_dir(OUT)
            .with_workspace("me")
            .with_reference_genome_id("83333.1")
            .with_wait_interval(Duration::ZERO)
    }

    fn job(name: &str) -> RnaJob {
        let mut job = RnaJob::new(name, OUT, "83333.1");
        job.set_source(RnaSource::accession(format!("SRR_{}", name)));
        job
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::NoJobs("/me/home/reads".to_string());
        assert_eq!(err.to_string(), "No runnable jobs found in /me/home/reads");

        let err = PipelineError::from(GatewayError::NotFound("/x".to_string()));
        assert!(err.to_string().contains("Path not found"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let gateway = Arc::new(InMemoryGateway::new());
        let result = RnaSeqOrchestrator::new(config().with_max_concurrent_tasks(0), gateway);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_load_jobs_drops_unprepared() {
        let gateway = Arc::new(InMemoryGateway::new());
        let mut orchestrator = RnaSeqOrchestrator::new(config(), gateway).unwrap();

        let mut jobs = BTreeMap::new();
        jobs.insert("A".to_string(), job("A"));
        jobs.insert("B".to_string(), RnaJob::new("B", OUT, "83333.1"));

        assert_eq!(orchestrator.load_jobs(jobs), 1);
        assert!(orchestrator.job("A").is_some());
        assert!(orchestrator.job("B").is_none());
    }

    #[tokio::test]
    async fn test_cycle_respects_capacity() {
        let gateway = Arc::new(InMemoryGateway::with_task_duration(3));
        let mut orchestrator =
            RnaSeqOrchestrator::new(config().with_max_concurrent_tasks(2), gateway.clone())
                .unwrap();
        for name in ["A", "B", "C"] {
            orchestrator.insert_job(job(name));
        }

        let report = orchestrator.run_cycle().await.unwrap();

        assert_eq!(report.started, 2);
        assert_eq!(report.active, 2);
        assert!(orchestrator.job("A").unwrap().task_id().is_some());
        assert!(orchestrator.job("B").unwrap().task_id().is_some());
        assert!(orchestrator.job("C").unwrap().needs_task());
        assert_eq!(gateway.peak_running().await, 2);
    }

    #[tokio::test]
    async fn test_single_batched_poll_per_cycle() {
        let gateway = Arc::new(InMemoryGateway::with_task_duration(5));
        let mut orchestrator = RnaSeqOrchestrator::new(config(), gateway.clone()).unwrap();
        for name in ["A", "B", "C"] {
            orchestrator.insert_job(job(name));
        }

        orchestrator.run_cycle().await.unwrap();
        assert_eq!(gateway.poll_calls().await, 0);

        orchestrator.run_cycle().await.unwrap();
        orchestrator.run_cycle().await.unwrap();
        assert_eq!(gateway.poll_calls().await, 2);
    }

    #[tokio::test]
    async fn test_failed_task_is_resubmitted() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway
            .script_outcomes("A_fq", vec![TaskStatus::Failed])
            .await;
        let mut orchestrator = RnaSeqOrchestrator::new(config(), gateway.clone()).unwrap();
        orchestrator.insert_job(job("A"));

        orchestrator.run_cycle().await.unwrap();
        let first = orchestrator.job("A").unwrap().task_id().unwrap().to_string();

        let report = orchestrator.run_cycle().await.unwrap();
        let job = orchestrator.job("A").unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(job.retry_count(), 1);
        assert_eq!(job.phase(), Phase::Trim);
        assert_ne!(job.task_id().unwrap(), first);
        assert_eq!(gateway.submissions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_last_retry_fails_job() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway
            .script_outcomes("A_fq", vec![TaskStatus::Failed])
            .await;
        let mut orchestrator =
            RnaSeqOrchestrator::new(config().with_max_retries(1), gateway.clone()).unwrap();
        let mut a = job("A");
        a.record_failure();
        orchestrator.insert_job(a);

        orchestrator.run_cycle().await.unwrap();
        let report = orchestrator.run_cycle().await.unwrap();
        let job = orchestrator.job("A").unwrap();

        assert_eq!(report.failed, 1);
        assert!(job.is_failed());
        assert!(job.is_done());
        assert!(job.task_id().is_none());
    }

    #[tokio::test]
    async fn test_missing_source_fails_job_without_aborting() {
        let gateway = Arc::new(InMemoryGateway::new());
        let mut orchestrator = RnaSeqOrchestrator::new(config(), gateway.clone()).unwrap();
        orchestrator.insert_job(RnaJob::new("A", OUT, "83333.1"));
        orchestrator.insert_job(job("B"));

        let report = orchestrator.run_cycle().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.started, 1);
        assert!(orchestrator.job("A").unwrap().is_failed());
        assert!(orchestrator.job("B").unwrap().task_id().is_some());
    }

    #[tokio::test]
    async fn test_run_stops_at_iteration_budget() {
        let gateway = Arc::new(InMemoryGateway::with_task_duration(100));
        let mut orchestrator = RnaSeqOrchestrator::new(
            config().with_max_iterations(Some(3)),
            gateway.clone(),
        )
        .unwrap();
        orchestrator.insert_job(job("A"));

        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.incomplete, vec!["A".to_string()]);
        assert!(!summary.is_complete());
    }

    #[tokio::test]
    async fn test_run_with_no_jobs_returns_immediately() {
        let gateway = Arc::new(InMemoryGateway::new());
        let mut orchestrator = RnaSeqOrchestrator::new(config(), gateway).unwrap();

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.total, 0);
    }
}
