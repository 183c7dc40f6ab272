//! The per-sample job record and its state machine.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::launcher::{self, CopyOutcome, Launch};
use super::phase::Phase;
use super::source::RnaSource;
use crate::error::LaunchError;
use crate::gateway::{TaskGateway, TaskId};

/// An RNA-seq sample moving through the pipeline.
///
/// A job starts at TRIM and only ever moves forward. While a remote task is
/// in flight its id is held in `task_id`; a job with no task id and a phase
/// other than DONE is idle and may start its next task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RnaJob {
    name: String,
    phase: Phase,
    source: Option<RnaSource>,
    task_id: Option<TaskId>,
    out_dir: String,
    genome_id: String,
    retry_count: u32,
    failed: bool,
}

impl RnaJob {
    /// Creates a job at TRIM with no source.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique sample name
    /// * `out_dir` - Workspace directory receiving all phase outputs
    /// * `genome_id` - Reference genome for the alignment phase
    pub fn new(
        name: impl Into<String>,
        out_dir: impl Into<String>,
        genome_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phase: Phase::Trim,
            source: None,
            task_id: None,
            out_dir: out_dir.into(),
            genome_id: genome_id.into(),
            retry_count: 0,
            failed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn source(&self) -> Option<&RnaSource> {
        self.source.as_ref()
    }

    pub fn out_dir(&self) -> &str {
        &self.out_dir
    }

    pub fn genome_id(&self) -> &str {
        &self.genome_id
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns whether the job ended because its retries ran out.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Stores the read source.
    ///
    /// Once set, the source is not replaced.
    pub fn set_source(&mut self, source: RnaSource) {
        if self.source.is_none() {
            self.source = Some(source);
        }
    }

    /// Returns whether the job has a complete read source.
    pub fn is_prepared(&self) -> bool {
        self.source.is_some()
    }

    /// Attaches a task that is already running for this job.
    pub fn set_task_id(&mut self, task_id: impl Into<TaskId>) {
        self.task_id = Some(task_id.into());
    }

    /// Returns whether the job is idle and has work left.
    pub fn needs_task(&self) -> bool {
        self.task_id.is_none() && self.phase != Phase::Done
    }

    /// Counts one failed attempt and returns the new count.
    pub fn record_failure(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    /// Moves the job to `candidate` if it is strictly later than the current
    /// phase.
    ///
    /// Returns `true` if the phase changed. Applying the same evidence twice
    /// is a no-op.
    pub fn merge_state(&mut self, candidate: Phase) -> bool {
        if candidate > self.phase {
            self.phase = candidate;
            true
        } else {
            false
        }
    }

    /// Records completion of the in-flight task and advances one phase.
    ///
    /// Returns `true` if the job is now DONE.
    pub fn next_phase(&mut self) -> bool {
        self.task_id = None;
        if let Some(next) = self.phase.next() {
            self.phase = next;
        }
        self.phase == Phase::Done
    }

    /// Ends the job as failed.
    pub fn set_failed(&mut self) {
        self.task_id = None;
        self.phase = Phase::Done;
        self.failed = true;
    }

    /// Starts the work for the current phase.
    ///
    /// TRIM and ALIGN submit a remote task and store its id. COPY runs
    /// synchronously and always leaves the job DONE, whether or not the copy
    /// succeeded. DONE does nothing.
    pub async fn start_task(&mut self, gateway: &dyn TaskGateway) -> Result<(), LaunchError> {
        match launcher::launch(self, gateway).await? {
            Launch::Submitted(task_id) => {
                self.task_id = Some(task_id);
            }
            Launch::Copy(outcome) => {
                match outcome {
                    CopyOutcome::Copied => {
                        info!(job = %self.name, "Results copied");
                    }
                    CopyOutcome::MissingArtifacts | CopyOutcome::Failed(_) => {
                        warn!(job = %self.name, outcome = ?outcome, "Copy phase did not complete; job closed");
                    }
                }
                self.task_id = None;
                self.phase = Phase::Done;
            }
            Launch::Nothing => {}
        }
        Ok(())
    }
}

impl PartialEq for RnaJob {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for RnaJob {}

impl PartialOrd for RnaJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Jobs are ordered by name.
impl Ord for RnaJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}
