//! Resumable upload of local read files into the workspace.
//!
//! Files in a local directory whose names look like sequencer read files are
//! copied into a workspace folder under their own names. Each finished upload
//! is appended to a progress file in the local directory, and files listed
//! there (or already present remotely) are skipped, so an interrupted upload
//! can simply be rerun.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::gateway::{join_path, EntryType, TaskGateway};

/// Default name of the progress file inside the local directory.
pub const DEFAULT_PROGRESS_FILE: &str = "progress.txt";

/// Default pattern for local read files.
pub const DEFAULT_UPLOAD_PATTERN: &str = r"\S+_R[12]_\d+\.fastq(\.gz)?";

const PROGRESS_HEADER: &str = "original\tdestination";

/// Errors that can occur while uploading read files.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Local directory {0} not found or not a directory")]
    LocalDirectory(PathBuf),

    #[error("Invalid upload pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Progress file {path}: {source}")]
    Progress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Settings for one upload run.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Local directory holding the read files.
    pub local_dir: PathBuf,
    /// Workspace folder receiving them.
    pub remote_dir: String,
    /// Pattern a file name must fully match to be uploaded.
    pub pattern: String,
    /// Progress file name, relative to `local_dir`.
    pub progress_file: String,
    /// List what would be uploaded without copying or recording anything.
    pub dry_run: bool,
}

impl UploadOptions {
    /// Creates options with the default pattern and progress file.
    pub fn new(local_dir: impl Into<PathBuf>, remote_dir: impl Into<String>) -> Self {
        Self {
            local_dir: local_dir.into(),
            remote_dir: remote_dir.into(),
            pattern: DEFAULT_UPLOAD_PATTERN.to_string(),
            progress_file: DEFAULT_PROGRESS_FILE.to_string(),
            dry_run: false,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_progress_file(mut self, name: impl Into<String>) -> Self {
        self.progress_file = name.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn progress_path(&self) -> PathBuf {
        self.local_dir.join(&self.progress_file)
    }
}

/// What an upload run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    /// Files copied (or, in a dry run, that would be copied).
    pub uploaded: Vec<String>,
    /// Files skipped because an earlier run already handled them.
    pub already_done: usize,
    /// Files skipped because they do not look like read files.
    pub not_reads: usize,
}

/// Uploads the read files of `options.local_dir` that have not been uploaded yet.
pub async fn upload_reads(
    gateway: &dyn TaskGateway,
    options: &UploadOptions,
) -> Result<UploadReport, UploadError> {
    let pattern = Regex::new(&format!("^(?:{})$", options.pattern)).map_err(|e| {
        UploadError::InvalidPattern {
            pattern: options.pattern.clone(),
            message: e.to_string(),
        }
    })?;
    let local_files = list_local_files(&options.local_dir).await?;

    let progress_path = options.progress_path();
    let mut done = read_progress(&progress_path).await?;
    done.extend(remote_reads(gateway, &options.remote_dir, options.dry_run).await?);
    info!(
        local = local_files.len(),
        already_done = done.len(),
        remote = %options.remote_dir,
        "Starting upload"
    );

    let mut progress = if options.dry_run {
        None
    } else {
        Some(open_progress(&progress_path).await?)
    };

    let mut report = UploadReport::default();
    for name in local_files {
        if name == options.progress_file {
            continue;
        }
        if !pattern.is_match(&name) {
            debug!(file = %name, "Skipping non-read file");
            report.not_reads += 1;
            continue;
        }
        if done.contains(&name) {
            report.already_done += 1;
            continue;
        }

        let destination = join_path(&options.remote_dir, &name);
        if let Some(progress) = progress.as_mut() {
            info!(file = %name, destination = %destination, "Uploading");
            gateway
                .copy_local_file(&options.local_dir.join(&name), &destination)
                .await?;
            let line = format!("{}\t{}\n", name, destination);
            progress
                .write_all(line.as_bytes())
                .await
                .map_err(|source| progress_error(&progress_path, source))?;
            progress
                .flush()
                .await
                .map_err(|source| progress_error(&progress_path, source))?;
        } else {
            info!(file = %name, destination = %destination, "Would upload (dry run)");
        }
        report.uploaded.push(name);
    }

    info!(
        uploaded = report.uploaded.len(),
        already_done = report.already_done,
        not_reads = report.not_reads,
        "Upload finished"
    );
    Ok(report)
}

async fn list_local_files(dir: &Path) -> Result<Vec<String>, UploadError> {
    let metadata = tokio::fs::metadata(dir).await;
    if !metadata.is_ok_and(|m| m.is_dir()) {
        return Err(UploadError::LocalDirectory(dir.to_path_buf()));
    }

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Names recorded in the progress file; a missing file means none.
async fn read_progress(path: &Path) -> Result<HashSet<String>, UploadError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(source) => return Err(progress_error(path, source)),
    };
    Ok(content
        .lines()
        .skip(1)
        .filter_map(|line| line.split('\t').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

async fn open_progress(path: &Path) -> Result<tokio::fs::File, UploadError> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|source| progress_error(path, source))?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| progress_error(path, source))?;
    if !exists {
        file.write_all(format!("{}\n", PROGRESS_HEADER).as_bytes())
            .await
            .map_err(|source| progress_error(path, source))?;
    }
    Ok(file)
}

/// Read files already in the remote folder. The folder is created when
/// missing, except in a dry run.
async fn remote_reads(
    gateway: &dyn TaskGateway,
    remote_dir: &str,
    dry_run: bool,
) -> Result<HashSet<String>, GatewayError> {
    match gateway.list_directory(remote_dir).await {
        Ok(entries) => Ok(entries
            .into_iter()
            .filter(|e| e.entry_type == EntryType::Reads)
            .map(|e| e.name)
            .collect()),
        Err(e) if e.is_not_found() => {
            if !dry_run {
                gateway.create_folder(remote_dir).await?;
            }
            Ok(HashSet::new())
        }
        Err(e) => Err(e),
    }
}

fn progress_error(path: &Path, source: std::io::Error) -> UploadError {
    UploadError::Progress {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{DirEntry, InMemoryGateway};
    use tempfile::TempDir;

    const REMOTE: &str = "/me/home/reads";

    fn local_dir(files: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in files {
            std::fs::write(dir.path().join(name), b"@read\nACGT\n+\nIIII\n").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_upload_copies_read_files() {
        let dir = local_dir(&["S1_R1_001.fastq", "S1_R2_001.fastq", "notes.txt"]);
        let gateway = InMemoryGateway::new();
        let options = UploadOptions::new(dir.path(), REMOTE);

        let report = upload_reads(&gateway, &options).await.unwrap();

        assert_eq!(
            report.uploaded,
            vec!["S1_R1_001.fastq".to_string(), "S1_R2_001.fastq".to_string()]
        );
        assert_eq!(report.not_reads, 1);
        assert_eq!(gateway.uploads().await.len(), 2);
        assert!(gateway.exists("/me/home/reads/S1_R2_001.fastq").await);

        let progress = std::fs::read_to_string(dir.path().join(DEFAULT_PROGRESS_FILE)).unwrap();
        assert!(progress.starts_with("original\tdestination\n"));
        assert!(progress.contains("S1_R1_001.fastq\t/me/home/reads/S1_R1_001.fastq"));
    }

    #[tokio::test]
    async fn test_upload_resumes_from_progress_file() {
        let dir = local_dir(&["S1_R1_001.fastq", "S1_R2_001.fastq"]);
        std::fs::write(
            dir.path().join(DEFAULT_PROGRESS_FILE),
            "original\tdestination\nS1_R1_001.fastq\t/me/home/reads/S1_R1_001.fastq\n",
        )
        .unwrap();
        let gateway = InMemoryGateway::new();
        let options = UploadOptions::new(dir.path(), REMOTE);

        let report = upload_reads(&gateway, &options).await.unwrap();

        assert_eq!(report.uploaded, vec!["S1_R2_001.fastq".to_string()]);
        assert_eq!(report.already_done, 1);

        let progress = std::fs::read_to_string(dir.path().join(DEFAULT_PROGRESS_FILE)).unwrap();
        assert_eq!(progress.matches("original\tdestination").count(), 1);
    }

    #[tokio::test]
    async fn test_upload_skips_files_already_remote() {
        let dir = local_dir(&["S1_R1_001.fastq"]);
        let gateway = InMemoryGateway::new();
        gateway
            .add_entries(REMOTE, vec![DirEntry::new("S1_R1_001.fastq", EntryType::Reads)])
            .await;

        let report = upload_reads(&gateway, &UploadOptions::new(dir.path(), REMOTE))
            .await
            .unwrap();

        assert!(report.uploaded.is_empty());
        assert_eq!(report.already_done, 1);
        assert!(gateway.uploads().await.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let dir = local_dir(&["S1_R1_001.fastq"]);
        let gateway = InMemoryGateway::new();
        let options = UploadOptions::new(dir.path(), REMOTE).with_dry_run(true);

        let report = upload_reads(&gateway, &options).await.unwrap();

        assert_eq!(report.uploaded.len(), 1);
        assert!(gateway.uploads().await.is_empty());
        assert!(!gateway.exists(REMOTE).await);
        assert!(!dir.path().join(DEFAULT_PROGRESS_FILE).exists());
    }

    #[tokio::test]
    async fn test_missing_local_directory() {
        let gateway = InMemoryGateway::new();
        let options = UploadOptions::new("/definitely/not/here", REMOTE);
        let err = upload_reads(&gateway, &options).await.unwrap_err();
        assert!(matches!(err, UploadError::LocalDirectory(_)));
    }
}
