//! Progress reporting for orchestrator runs.
//!
//! A [`CycleReport`] is produced by every loop iteration and logged as one
//! line; a [`RunSummary`] is the snapshot of all jobs at the end of a run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::jobs::RnaJob;

/// Counters for a single loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Iteration number, starting at 1.
    pub iteration: u32,
    /// Tasks submitted or copies run for idle jobs.
    pub started: usize,
    /// Tasks observed complete.
    pub completed: usize,
    /// Failed tasks that were resubmitted.
    pub retried: usize,
    /// Jobs that ran out of retries or could not be launched.
    pub failed: usize,
    /// Remote tasks in flight after the cycle.
    pub active: usize,
    /// Jobs not yet DONE after the cycle.
    pub incomplete: usize,
}

impl CycleReport {
    /// Emits the report as a single structured log line.
    pub fn log(&self) {
        info!(
            iteration = self.iteration,
            started = self.started,
            completed = self.completed,
            retried = self.retried,
            failed = self.failed,
            active = self.active,
            incomplete = self.incomplete,
            "Cycle finished"
        );
    }
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Loop iterations executed.
    pub iterations: u32,
    /// Number of jobs tracked.
    pub total: usize,
    /// Jobs that reached DONE without failing.
    pub done: usize,
    /// Names of jobs that ran out of retries.
    pub failed: Vec<String>,
    /// Names of jobs left unfinished, to be resumed by another run.
    pub incomplete: Vec<String>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Builds a summary from the job set.
    pub fn from_jobs(jobs: &BTreeMap<String, RnaJob>, iterations: u32) -> Self {
        let mut summary = Self {
            iterations,
            total: jobs.len(),
            done: 0,
            failed: Vec::new(),
            incomplete: Vec::new(),
            finished_at: Utc::now(),
        };
        for job in jobs.values() {
            if job.is_failed() {
                summary.failed.push(job.name().to_string());
            } else if job.is_done() {
                summary.done += 1;
            } else {
                summary.incomplete.push(job.name().to_string());
            }
        }
        summary
    }

    /// Returns whether every job finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary ({} iterations)", self.iterations)?;
        writeln!(f, "  Jobs:       {}", self.total)?;
        writeln!(f, "  Done:       {}", self.done)?;
        writeln!(f, "  Failed:     {}", self.failed.len())?;
        for name in &self.failed {
            writeln!(f, "    - {}", name)?;
        }
        writeln!(f, "  Incomplete: {}", self.incomplete.len())?;
        for name in &self.incomplete {
            writeln!(f, "    - {}", name)?;
        }
        write!(f, "  Finished:   {}", self.finished_at.to_rfc3339())
    }
}
