//! In-memory simulation of the remote compute service.
//!
//! `InMemoryGateway` behaves like the workspace and app services closely
//! enough to drive the orchestrator end to end without a network:
//!
//! - Directories are a map from path to entries.
//! - Submitted tasks run for a configurable number of polls, then report
//!   a scripted outcome (default: completed).
//! - A completed `FastqUtils` or `RNASeq` task writes the result folder and
//!   the files the next phase looks for, the way the real services do.
//!
//! The gateway also records submissions, copies and the peak number of
//! simultaneously running tasks so tests can check admission control.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{
    hidden_result_path, join_path, DirEntry, EntryType, TaskGateway, TaskId, TaskStatus,
};
use crate::error::GatewayError;
use crate::jobs::launcher::{ALIGN_SERVICE, FPKM_TRACKING_FILE, SAMSTAT_SUFFIX, TRIM_SERVICE};
use crate::jobs::Phase;

/// A service call accepted by the simulated gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub task_id: TaskId,
    pub service: String,
    pub params: Value,
}

#[derive(Debug, Clone)]
struct SimTask {
    service: String,
    output_file: String,
    output_path: String,
    outcome: TaskStatus,
    polls_left: u32,
    reported: Option<TaskStatus>,
}

impl SimTask {
    fn is_running(&self) -> bool {
        self.reported.is_none()
    }
}

#[derive(Debug, Default)]
struct SimState {
    dirs: HashMap<String, BTreeMap<String, EntryType>>,
    tasks: HashMap<TaskId, SimTask>,
    task_order: Vec<TaskId>,
    outcomes: HashMap<String, VecDeque<TaskStatus>>,
    submissions: Vec<Submission>,
    copies: Vec<(String, String)>,
    uploads: Vec<(String, String)>,
    next_id: u64,
    polls_before_finish: u32,
    poll_calls: usize,
    peak_running: usize,
}

impl SimState {
    fn running_count(&self) -> usize {
        self.tasks.values().filter(|t| t.is_running()).count()
    }

    fn add_entry(&mut self, dir: &str, name: &str, entry_type: EntryType) {
        self.dirs
            .entry(normalize(dir))
            .or_default()
            .insert(name.to_string(), entry_type);
    }

    fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        if self.dirs.contains_key(&path) {
            return true;
        }
        let (dir, name) = split_path(&path);
        self.dirs
            .get(dir)
            .is_some_and(|entries| entries.contains_key(name))
    }

    fn materialize(&mut self, task: &SimTask) {
        let result_dir = hidden_result_path(&task.output_path, &task.output_file);
        self.add_entry(&task.output_path, &task.output_file, EntryType::JobResult);
        if task.service == TRIM_SERVICE {
            self.add_entry(
                &result_dir,
                &format!("{}_R1_ptrim.fq.gz", task.output_file),
                EntryType::Reads,
            );
            self.add_entry(
                &result_dir,
                &format!("{}_R2_ptrim.fq.gz", task.output_file),
                EntryType::Reads,
            );
            self.add_entry(&result_dir, "fastqc_report.html", EntryType::Other);
        } else if task.service == ALIGN_SERVICE {
            self.add_entry(&result_dir, FPKM_TRACKING_FILE, EntryType::Text);
            self.add_entry(
                &result_dir,
                &format!("Tuxedo_0_replicate1_{}{}", task.output_file, SAMSTAT_SUFFIX),
                EntryType::Other,
            );
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Simulated remote service.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<SimState>,
}

impl InMemoryGateway {
    /// Creates an empty service where every task completes on its first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service where tasks stay running for `polls` polls before
    /// reporting their outcome.
    pub fn with_task_duration(polls: u32) -> Self {
        let state = SimState {
            polls_before_finish: polls,
            ..SimState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Adds entries to a directory, creating it if needed.
    pub async fn add_entries(&self, dir: &str, entries: Vec<DirEntry>) {
        let mut state = self.state.lock().await;
        state.dirs.entry(normalize(dir)).or_default();
        for entry in entries {
            state.add_entry(dir, &entry.name, entry.entry_type);
        }
    }

    /// Creates an empty directory.
    pub async fn add_dir(&self, dir: &str) {
        self.state.lock().await.dirs.entry(normalize(dir)).or_default();
    }

    /// Queues the outcomes of successive tasks writing `output_file`.
    ///
    /// Once the queue is drained, further tasks complete.
    pub async fn script_outcomes(&self, output_file: &str, outcomes: Vec<TaskStatus>) {
        self.state
            .lock()
            .await
            .outcomes
            .entry(output_file.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Registers a task that was started before the orchestrator ran.
    pub async fn seed_running_task(
        &self,
        service: &str,
        output_path: &str,
        output_file: &str,
    ) -> TaskId {
        let mut state = self.state.lock().await;
        let task_id = Self::allocate_id(&mut state);
        let outcome = Self::next_outcome(&mut state, output_file);
        let polls_left = state.polls_before_finish;
        state.tasks.insert(
            task_id.clone(),
            SimTask {
                service: service.to_string(),
                output_file: output_file.to_string(),
                output_path: output_path.to_string(),
                outcome,
                polls_left,
                reported: None,
            },
        );
        state.task_order.push(task_id.clone());
        let running = state.running_count();
        state.peak_running = state.peak_running.max(running);
        task_id
    }

    /// Service calls accepted so far, in order.
    pub async fn submissions(&self) -> Vec<Submission> {
        self.state.lock().await.submissions.clone()
    }

    /// Workspace copies performed so far, as (source, destination).
    pub async fn copies(&self) -> Vec<(String, String)> {
        self.state.lock().await.copies.clone()
    }

    /// Local uploads performed so far, as (local path, destination).
    pub async fn uploads(&self) -> Vec<(String, String)> {
        self.state.lock().await.uploads.clone()
    }

    /// Number of batched status queries received.
    pub async fn poll_calls(&self) -> usize {
        self.state.lock().await.poll_calls
    }

    /// Largest number of tasks that were running at the same time.
    pub async fn peak_running(&self) -> usize {
        self.state.lock().await.peak_running
    }

    /// Number of tasks currently running.
    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running_count()
    }

    /// Returns whether a workspace path exists.
    pub async fn exists(&self, path: &str) -> bool {
        self.state.lock().await.exists(path)
    }

    fn allocate_id(state: &mut SimState) -> TaskId {
        state.next_id += 1;
        format!("task-{}", state.next_id)
    }

    fn next_outcome(state: &mut SimState, output_file: &str) -> TaskStatus {
        state
            .outcomes
            .get_mut(output_file)
            .and_then(VecDeque::pop_front)
            .unwrap_or(TaskStatus::Completed)
    }
}

#[async_trait]
impl TaskGateway for InMemoryGateway {
    async fn submit(&self, service: &str, params: &Value) -> Result<TaskId, GatewayError> {
        let field = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| GatewayError::Rpc {
                    method: "AppService.start_app".to_string(),
                    code: 400,
                    message: format!("missing parameter {}", key),
                })
        };
        let output_file = field("output_file")?;
        let output_path = field("output_path")?;

        let mut state = self.state.lock().await;
        let task_id = Self::allocate_id(&mut state);
        let outcome = Self::next_outcome(&mut state, &output_file);
        let polls_left = state.polls_before_finish;
        state.tasks.insert(
            task_id.clone(),
            SimTask {
                service: service.to_string(),
                output_file,
                output_path,
                outcome,
                polls_left,
                reported: None,
            },
        );
        state.task_order.push(task_id.clone());
        state.submissions.push(Submission {
            task_id: task_id.clone(),
            service: service.to_string(),
            params: params.clone(),
        });
        let running = state.running_count();
        state.peak_running = state.peak_running.max(running);
        Ok(task_id)
    }

    async fn poll_status(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, TaskStatus>, GatewayError> {
        let mut state = self.state.lock().await;
        state.poll_calls += 1;

        let mut statuses = HashMap::with_capacity(task_ids.len());
        let mut finished = Vec::new();
        for task_id in task_ids {
            let Some(task) = state.tasks.get_mut(task_id) else {
                continue;
            };
            let status = match task.reported {
                Some(status) => status,
                None if task.polls_left > 0 => {
                    task.polls_left -= 1;
                    TaskStatus::Running
                }
                None => {
                    task.reported = Some(task.outcome);
                    if task.outcome == TaskStatus::Completed {
                        finished.push(task.clone());
                    }
                    task.outcome
                }
            };
            statuses.insert(task_id.clone(), status);
        }
        for task in finished {
            state.materialize(&task);
        }
        Ok(statuses)
    }

    async fn list_running_tasks(&self) -> Result<HashMap<String, TaskId>, GatewayError> {
        let state = self.state.lock().await;
        let mut running = HashMap::new();
        for task_id in &state.task_order {
            let Some(task) = state.tasks.get(task_id) else {
                continue;
            };
            if !task.is_running() {
                continue;
            }
            let job_name = Phase::Align
                .job_name_from_output(&task.output_file)
                .or_else(|| Phase::Trim.job_name_from_output(&task.output_file));
            if let Some(name) = job_name {
                running.insert(name.to_string(), task_id.clone());
            }
        }
        Ok(running)
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, GatewayError> {
        let state = self.state.lock().await;
        let entries = state
            .dirs
            .get(&normalize(path))
            .ok_or_else(|| GatewayError::NotFound(path.to_string()))?;
        Ok(entries
            .iter()
            .map(|(name, entry_type)| DirEntry::new(name.clone(), *entry_type))
            .collect())
    }

    async fn create_folder(&self, path: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let path = normalize(path);
        let (parent, name) = split_path(&path);
        let (parent, name) = (parent.to_string(), name.to_string());
        state.add_entry(&parent, &name, EntryType::Folder);
        state.dirs.entry(path).or_default();
        Ok(())
    }

    async fn copy_remote_file(&self, src: &str, dst: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let src_norm = normalize(src);
        let (src_dir, src_name) = split_path(&src_norm);
        let entry_type = state
            .dirs
            .get(src_dir)
            .and_then(|entries| entries.get(src_name))
            .copied()
            .ok_or_else(|| GatewayError::NotFound(src.to_string()))?;

        let dst_norm = normalize(dst);
        let (dst_dir, dst_name) = split_path(&dst_norm);
        if !state.dirs.contains_key(dst_dir) {
            return Err(GatewayError::NotFound(dst_dir.to_string()));
        }
        let (dst_dir, dst_name) = (dst_dir.to_string(), dst_name.to_string());
        state.add_entry(&dst_dir, &dst_name, entry_type);
        state.copies.push((src.to_string(), dst.to_string()));
        Ok(())
    }

    async fn copy_local_file(&self, src: &Path, dst: &str) -> Result<(), GatewayError> {
        tokio::fs::metadata(src).await?;

        let mut state = self.state.lock().await;
        let dst_norm = normalize(dst);
        let (dst_dir, dst_name) = split_path(&dst_norm);
        if !state.dirs.contains_key(dst_dir) {
            return Err(GatewayError::NotFound(dst_dir.to_string()));
        }
        let (dst_dir, dst_name) = (dst_dir.to_string(), dst_name.to_string());
        state.add_entry(&dst_dir, &dst_name, EntryType::Reads);
        state
            .uploads
            .push((src.display().to_string(), dst.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trim_params(name: &str) -> Value {
        json!({ "output_file": format!("{}_fq", name), "output_path": "/ws/out" })
    }

    #[tokio::test]
    async fn test_task_completes_and_writes_outputs() {
        let gateway = InMemoryGateway::new();
        let id = gateway
            .submit(TRIM_SERVICE, &trim_params("S1"))
            .await
            .expect("submit");

        let statuses = gateway.poll_status(&[id.clone()]).await.expect("poll");
        assert_eq!(statuses[&id], TaskStatus::Completed);

        let out = gateway.list_directory("/ws/out").await.expect("out dir");
        assert!(out.contains(&DirEntry::new("S1_fq", EntryType::JobResult)));
        let trimmed = gateway.list_directory("/ws/out/.S1_fq").await.expect("hidden");
        assert_eq!(
            trimmed.iter().filter(|e| e.entry_type == EntryType::Reads).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_task_duration_and_scripted_failure() {
        let gateway = InMemoryGateway::with_task_duration(1);
        gateway
            .script_outcomes("S1_fq", vec![TaskStatus::Failed])
            .await;
        let id = gateway
            .submit(TRIM_SERVICE, &trim_params("S1"))
            .await
            .expect("submit");
        assert_eq!(gateway.running_count().await, 1);

        let first = gateway.poll_status(&[id.clone()]).await.expect("poll");
        assert_eq!(first[&id], TaskStatus::Running);
        let second = gateway.poll_status(&[id.clone()]).await.expect("poll");
        assert_eq!(second[&id], TaskStatus::Failed);
        assert_eq!(gateway.running_count().await, 0);
        assert_eq!(gateway.poll_calls().await, 2);
        assert!(!gateway.exists("/ws/out/S1_fq").await);
    }

    #[tokio::test]
    async fn test_list_running_tasks_keyed_by_job() {
        let gateway = InMemoryGateway::with_task_duration(5);
        let id = gateway
            .seed_running_task(ALIGN_SERVICE, "/ws/out", "S2_rna")
            .await;
        let running = gateway.list_running_tasks().await.expect("list");
        assert_eq!(running.get("S2"), Some(&id));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let gateway = InMemoryGateway::new();
        let err = gateway.list_directory("/nowhere").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_folder_and_copy() {
        let gateway = InMemoryGateway::new();
        gateway
            .add_entries("/ws/out", vec![DirEntry::new("a.txt", EntryType::Text)])
            .await;
        gateway.create_folder("/ws/out/FPKM").await.expect("mkdir");
        gateway
            .copy_remote_file("/ws/out/a.txt", "/ws/out/FPKM/b.txt")
            .await
            .expect("copy");
        assert!(gateway.exists("/ws/out/FPKM/b.txt").await);

        let err = gateway
            .copy_remote_file("/ws/out/missing.txt", "/ws/out/FPKM/c.txt")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
