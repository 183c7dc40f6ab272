//! Access to the remote compute service.
//!
//! The orchestrator never talks to the network directly. Everything it needs
//! from the remote side goes through the [`TaskGateway`] trait:
//!
//! - **Tasks**: submit a named service call, poll task status in one batched
//!   query, list tasks that are still running
//! - **Workspace**: list a directory, create a folder, copy a file inside the
//!   workspace or upload a local file into it
//!
//! Two implementations are provided:
//!
//! - [`RpcGateway`]: JSON-RPC client for the workspace and app services
//! - [`InMemoryGateway`]: deterministic simulation of the service, used by tests
//!
//! # Example
//!
//! ```rust,ignore
//! use rnaseq_runner::gateway::{RpcGateway, RpcGatewayConfig, TaskGateway};
//! use std::sync::Arc;
//!
//! let gateway: Arc<dyn TaskGateway> = Arc::new(RpcGateway::new(RpcGatewayConfig::from_env()?)?);
//! for entry in gateway.list_directory("/user@patricbrc.org/home/RNASeq").await? {
//!     println!("{} ({})", entry.name, entry.entry_type);
//! }
//! ```

pub mod memory;
pub mod rpc;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

pub use memory::InMemoryGateway;
pub use rpc::{RpcGateway, RpcGatewayConfig};

/// Opaque identifier of a remote task.
pub type TaskId = String;

/// Status of a remote task as reported by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued or executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully or was deleted.
    Failed,
}

impl TaskStatus {
    /// Maps a status string reported by the app service.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "completed" => TaskStatus::Completed,
            "failed" | "deleted" => TaskStatus::Failed,
            _ => TaskStatus::Running,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of a workspace directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// A sequence read file.
    Reads,
    /// The result marker of a finished service task.
    JobResult,
    /// A folder.
    Folder,
    /// A plain text file.
    Text,
    /// Anything else.
    Other,
}

impl EntryType {
    /// Maps a workspace object type string.
    pub fn from_workspace(kind: &str) -> Self {
        match kind {
            "reads" => EntryType::Reads,
            "job_result" => EntryType::JobResult,
            "folder" => EntryType::Folder,
            "txt" => EntryType::Text,
            _ => EntryType::Other,
        }
    }

    /// The workspace object type string.
    pub fn as_workspace(self) -> &'static str {
        match self {
            EntryType::Reads => "reads",
            EntryType::JobResult => "job_result",
            EntryType::Folder => "folder",
            EntryType::Text => "txt",
            EntryType::Other => "unspecified",
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_workspace())
    }
}

/// One entry of a workspace directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Base name of the entry.
    pub name: String,
    /// Kind of the entry.
    pub entry_type: EntryType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            name: name.into(),
            entry_type,
        }
    }
}

/// Joins a workspace directory and an entry name.
pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Path of the hidden folder holding the files of a task result.
pub fn hidden_result_path(dir: &str, result_name: &str) -> String {
    join_path(dir, &format!(".{}", result_name))
}

/// The remote compute service, as seen by the orchestrator.
///
/// Implementations hold no per-job state; the orchestrator owns all job state
/// and only reads remote truth through these calls.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    /// Submits a service call and returns the new task's id.
    async fn submit(&self, service: &str, params: &Value) -> Result<TaskId, GatewayError>;

    /// Queries the status of many tasks in a single call.
    ///
    /// Ids unknown to the service may be absent from the result.
    async fn poll_status(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, TaskStatus>, GatewayError>;

    /// Lists tasks still queued or running, keyed by job name.
    async fn list_running_tasks(&self) -> Result<HashMap<String, TaskId>, GatewayError>;

    /// Lists the entries of a workspace directory.
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, GatewayError>;

    /// Creates a workspace folder.
    async fn create_folder(&self, path: &str) -> Result<(), GatewayError>;

    /// Copies a file from one workspace path to another.
    async fn copy_remote_file(&self, src: &str, dst: &str) -> Result<(), GatewayError>;

    /// Uploads a local file to a workspace path.
    async fn copy_local_file(&self, src: &Path, dst: &str) -> Result<(), GatewayError>;
}
