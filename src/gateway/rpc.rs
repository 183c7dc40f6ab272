//! JSON-RPC client for the workspace and app services.
//!
//! Both services speak JSON-RPC 1.1 over HTTPS:
//!
//! - `Workspace.ls`, `Workspace.copy`, `Workspace.create` for files
//! - `AppService.start_app`, `AppService.query_tasks`,
//!   `AppService.enumerate_tasks` for tasks
//!
//! Uploads of local files create an upload node through `Workspace.create`
//! and then send the bytes to the returned storage URL as a multipart form.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::{DirEntry, EntryType, TaskGateway, TaskId, TaskStatus};
use crate::error::GatewayError;
use crate::jobs::Phase;

/// Default workspace service endpoint.
pub const DEFAULT_WORKSPACE_URL: &str = "https://p3.theseed.org/services/Workspace";

/// Default app service endpoint.
pub const DEFAULT_APP_SERVICE_URL: &str = "https://p3.theseed.org/services/app_service";

/// Token file read when no token is given in the environment.
const TOKEN_FILE_NAME: &str = ".patric_token";

/// Default number of recent tasks inspected when looking for running tasks.
const DEFAULT_TASK_QUERY_LIMIT: usize = 1000;

/// Connection settings for [`RpcGateway`].
#[derive(Debug, Clone)]
pub struct RpcGatewayConfig {
    /// Workspace service URL.
    pub workspace_url: String,
    /// App service URL.
    pub app_service_url: String,
    /// Authentication token sent with every call.
    pub auth_token: String,
    /// Workspace owner, e.g. `user@patricbrc.org`.
    pub workspace: String,
    /// How many recent tasks to inspect when listing running tasks.
    pub task_query_limit: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RpcGatewayConfig {
    /// Creates a configuration with the default endpoints.
    pub fn new(auth_token: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            workspace_url: DEFAULT_WORKSPACE_URL.to_string(),
            app_service_url: DEFAULT_APP_SERVICE_URL.to_string(),
            auth_token: auth_token.into(),
            workspace: workspace.into(),
            task_query_limit: DEFAULT_TASK_QUERY_LIMIT,
            timeout: Duration::from_secs(120),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `RNASEQ_WORKSPACE_URL`: workspace service URL (optional)
    /// - `RNASEQ_APP_SERVICE_URL`: app service URL (optional)
    /// - `RNASEQ_AUTH_TOKEN`: authentication token; when unset the token is
    ///   read from `~/.patric_token`
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::MissingToken` if no token can be found.
    pub fn from_env(workspace: impl Into<String>) -> Result<Self, GatewayError> {
        let auth_token = match env::var("RNASEQ_AUTH_TOKEN") {
            Ok(token) if !token.trim().is_empty() => token.trim().to_string(),
            _ => read_token_file()?,
        };

        let mut config = Self::new(auth_token, workspace);
        if let Ok(url) = env::var("RNASEQ_WORKSPACE_URL") {
            config.workspace_url = url;
        }
        if let Ok(url) = env::var("RNASEQ_APP_SERVICE_URL") {
            config.app_service_url = url;
        }
        Ok(config)
    }

    /// Sets how many recent tasks to inspect when listing running tasks.
    pub fn with_task_query_limit(mut self, limit: usize) -> Self {
        self.task_query_limit = limit;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn token_file_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| PathBuf::from(home).join(TOKEN_FILE_NAME))
}

fn read_token_file() -> Result<String, GatewayError> {
    let path = token_file_path().ok_or(GatewayError::MissingToken)?;
    match std::fs::read_to_string(&path) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(GatewayError::MissingToken),
    }
}

/// Request envelope for JSON-RPC 1.1.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: String,
    method: &'a str,
    version: &'static str,
    params: Value,
}

/// Response envelope for JSON-RPC 1.1.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorDetail {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// A task record as returned by the app service.
#[derive(Debug, Deserialize)]
struct RemoteTask {
    id: Value,
    #[serde(default)]
    status: String,
    #[serde(default)]
    parameters: Value,
}

impl RemoteTask {
    fn task_id(&self) -> TaskId {
        match &self.id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }
}

/// Gateway backed by the live workspace and app services.
pub struct RpcGateway {
    config: RpcGatewayConfig,
    http_client: Client,
}

impl RpcGateway {
    /// Creates a gateway from connection settings.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(config: RpcGatewayConfig) -> Result<Self, GatewayError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// The workspace owner this gateway acts for.
    pub fn workspace(&self) -> &str {
        &self.config.workspace
    }

    async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, GatewayError> {
        let request = RpcRequest {
            id: Uuid::new_v4().to_string(),
            method,
            version: "1.1",
            params,
        };
        debug!(method, "Remote call");

        let http_response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", &self.config.auth_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        // Errors come back as a JSON-RPC envelope with a 500 status, so parse
        // the body before looking at the status code.
        let response: RpcResponse = match serde_json::from_str(&body) {
            Ok(response) => response,
            Err(_) if !status.is_success() => {
                return Err(GatewayError::Rpc {
                    method: method.to_string(),
                    code: i64::from(status.as_u16()),
                    message: body,
                });
            }
            Err(e) => {
                return Err(GatewayError::ParseError {
                    method: method.to_string(),
                    message: e.to_string(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(classify_rpc_error(method, error));
        }
        response.result.ok_or_else(|| GatewayError::ParseError {
            method: method.to_string(),
            message: "response has neither result nor error".to_string(),
        })
    }

    async fn workspace_call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let url = self.config.workspace_url.clone();
        self.call(&url, method, params).await
    }

    async fn app_call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let url = self.config.app_service_url.clone();
        self.call(&url, method, params).await
    }
}

fn classify_rpc_error(method: &str, error: RpcErrorDetail) -> GatewayError {
    let lowered = error.message.to_lowercase();
    if lowered.contains("not found") || lowered.contains("does not exist") {
        return GatewayError::NotFound(error.message);
    }
    GatewayError::Rpc {
        method: method.to_string(),
        code: error.code,
        message: error.message,
    }
}

/// Extracts directory entries from a `Workspace.ls` result.
///
/// The result is `[{ "<path>": [[name, type, ...], ...] }]`.
fn parse_listing(path: &str, result: &Value) -> Result<Vec<DirEntry>, GatewayError> {
    let parse_error = |message: &str| GatewayError::ParseError {
        method: "Workspace.ls".to_string(),
        message: message.to_string(),
    };
    let listing = result
        .get(0)
        .and_then(Value::as_object)
        .ok_or_else(|| parse_error("expected an object of listings"))?;
    let Some(rows) = listing.get(path).or_else(|| listing.values().next()) else {
        return Err(GatewayError::NotFound(path.to_string()));
    };
    let rows = rows
        .as_array()
        .ok_or_else(|| parse_error("expected a list of entries"))?;

    rows.iter()
        .map(|row| {
            let name = row.get(0).and_then(Value::as_str);
            let kind = row.get(1).and_then(Value::as_str);
            match (name, kind) {
                (Some(name), Some(kind)) => Ok(DirEntry::new(name, EntryType::from_workspace(kind))),
                _ => Err(parse_error("entry lacks a name or type")),
            }
        })
        .collect()
}

/// Maps app-service task records to statuses.
fn parse_statuses(result: &Value) -> Result<HashMap<TaskId, TaskStatus>, GatewayError> {
    let tasks = result
        .get(0)
        .and_then(Value::as_object)
        .ok_or_else(|| GatewayError::ParseError {
            method: "AppService.query_tasks".to_string(),
            message: "expected an object of tasks".to_string(),
        })?;
    Ok(tasks
        .iter()
        .map(|(id, task)| {
            let status = task.get("status").and_then(Value::as_str).unwrap_or("");
            (id.clone(), TaskStatus::from_remote(status))
        })
        .collect())
}

/// Keys queued and running tasks by the job name in their output name.
fn running_by_job(tasks: Vec<RemoteTask>) -> HashMap<String, TaskId> {
    let mut running = HashMap::new();
    for task in tasks {
        if !matches!(task.status.as_str(), "queued" | "in-progress") {
            continue;
        }
        let Some(output) = task.parameters.get("output_file").and_then(Value::as_str) else {
            continue;
        };
        let job_name = Phase::Align
            .job_name_from_output(output)
            .or_else(|| Phase::Trim.job_name_from_output(output));
        if let Some(name) = job_name {
            running.entry(name.to_string()).or_insert_with(|| task.task_id());
        }
    }
    running
}

#[async_trait]
impl TaskGateway for RpcGateway {
    async fn submit(&self, service: &str, params: &Value) -> Result<TaskId, GatewayError> {
        let base = format!("/{}/home", self.config.workspace);
        let result = self
            .app_call("AppService.start_app", json!([service, params, base]))
            .await?;
        let task: RemoteTask = serde_json::from_value(result.get(0).cloned().unwrap_or_default())
            .map_err(|e| GatewayError::ParseError {
                method: "AppService.start_app".to_string(),
                message: e.to_string(),
            })?;
        Ok(task.task_id())
    }

    async fn poll_status(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, TaskStatus>, GatewayError> {
        if task_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self
            .app_call("AppService.query_tasks", json!([task_ids]))
            .await?;
        parse_statuses(&result)
    }

    async fn list_running_tasks(&self) -> Result<HashMap<String, TaskId>, GatewayError> {
        let result = self
            .app_call(
                "AppService.enumerate_tasks",
                json!([0, self.config.task_query_limit]),
            )
            .await?;
        let tasks: Vec<RemoteTask> =
            serde_json::from_value(result.get(0).cloned().unwrap_or_else(|| json!([])))
                .map_err(|e| GatewayError::ParseError {
                    method: "AppService.enumerate_tasks".to_string(),
                    message: e.to_string(),
                })?;
        Ok(running_by_job(tasks))
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, GatewayError> {
        let result = self
            .workspace_call("Workspace.ls", json!([{ "paths": [path] }]))
            .await?;
        parse_listing(path, &result)
    }

    async fn create_folder(&self, path: &str) -> Result<(), GatewayError> {
        self.workspace_call("Workspace.create", json!([{ "objects": [[path, "folder"]] }]))
            .await?;
        Ok(())
    }

    async fn copy_remote_file(&self, src: &str, dst: &str) -> Result<(), GatewayError> {
        self.workspace_call(
            "Workspace.copy",
            json!([{ "objects": [[src, dst]], "overwrite": 1, "recursive": 0 }]),
        )
        .await?;
        Ok(())
    }

    async fn copy_local_file(&self, src: &Path, dst: &str) -> Result<(), GatewayError> {
        let bytes = tokio::fs::read(src).await?;
        let result = self
            .workspace_call(
                "Workspace.create",
                json!([{
                    "objects": [[dst, EntryType::Reads.as_workspace(), {}, ""]],
                    "createUploadNodes": 1,
                    "overwrite": 1,
                }]),
            )
            .await?;
        // Object metadata tuples carry the upload URL in their twelfth field.
        let upload_url = result
            .get(0)
            .and_then(|objects| objects.get(0))
            .and_then(|meta| meta.get(11))
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::ParseError {
                method: "Workspace.create".to_string(),
                message: "no upload URL returned".to_string(),
            })?
            .to_string();

        let file_name = src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let form = reqwest::multipart::Form::new()
            .part("upload", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let response = self
            .http_client
            .put(&upload_url)
            .header("Authorization", format!("OAuth {}", self.config.auth_token))
            .multipart(form)
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::RequestFailed(format!(
                "upload of {} failed with status {}",
                src.display(),
                response.status()
            )));
        }
        Ok(())
    }
}
