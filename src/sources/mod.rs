//! Sample source resolution.
//!
//! Turns an input location into the initial set of jobs, keyed by sample name:
//!
//! - **WorkspaceDir**: a workspace directory of paired read files, matched by
//!   a filename pattern whose first capture group is the sample name and whose
//!   second group tells the left read from the right read
//! - **AccessionFile**: a local manifest of run accessions, one per line
//!
//! Every job is created at TRIM. Jobs whose source is incomplete (a sample
//! with only one read file) are returned unprepared; the orchestrator drops
//! them before any work starts.

pub mod accession;
pub mod paired;

use std::collections::BTreeMap;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::gateway::TaskGateway;
use crate::jobs::RnaJob;

pub use accession::AccessionManifest;
pub use paired::{PairedReadScanner, ReadPattern};

/// Kind of input location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// A workspace directory of paired read files.
    #[default]
    WorkspaceDir,
    /// A local file of run accessions.
    AccessionFile,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "workspace-dir" | "patric-dir" => Ok(SourceKind::WorkspaceDir),
            "accession-file" | "sra-file" => Ok(SourceKind::AccessionFile),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::WorkspaceDir => write!(f, "workspace-dir"),
            SourceKind::AccessionFile => write!(f, "accession-file"),
        }
    }
}

/// Settings shared by all source kinds.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Output directory copied into every job.
    pub out_dir: String,
    /// Reference genome copied into every job.
    pub genome_id: String,
    /// Filename pattern for the directory variant.
    pub read_pattern: String,
    /// Read-side value that marks a left read.
    pub left_id: String,
    /// Whether the manifest's first line is a header.
    pub manifest_has_header: bool,
}

/// Resolves the jobs for an input location.
///
/// # Errors
///
/// Returns `SourceError` if the pattern is invalid, a sample has two files
/// for the same side, the manifest cannot be read, or the listing fails.
pub async fn resolve_jobs(
    kind: SourceKind,
    input: &str,
    settings: &SourceSettings,
    gateway: &dyn TaskGateway,
) -> Result<BTreeMap<String, RnaJob>, SourceError> {
    match kind {
        SourceKind::WorkspaceDir => {
            let pattern = ReadPattern::new(&settings.read_pattern, &settings.left_id)?;
            PairedReadScanner::new(pattern)
                .scan(input, &settings.out_dir, &settings.genome_id, gateway)
                .await
        }
        SourceKind::AccessionFile => {
            let manifest = AccessionManifest::read(input, settings.manifest_has_header).await?;
            Ok(manifest.into_jobs(&settings.out_dir, &settings.genome_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{DirEntry, EntryType, InMemoryGateway};
    use std::io::Write;

    fn settings() -> SourceSettings {
        SourceSettings {
            out_dir: "/ws/out".to_string(),
            genome_id: "83333.1".to_string(),
            read_pattern: r"(.+)_(R[12])_001\.fastq".to_string(),
            left_id: "R1".to_string(),
            manifest_has_header: false,
        }
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!(
            "workspace-dir".parse::<SourceKind>(),
            Ok(SourceKind::WorkspaceDir)
        );
        assert_eq!("SRA_FILE".parse::<SourceKind>(), Ok(SourceKind::AccessionFile));
        assert!("ftp".parse::<SourceKind>().is_err());
        assert_eq!(SourceKind::AccessionFile.to_string(), "accession-file");
    }

    #[tokio::test]
    async fn test_resolve_workspace_dir() {
        let gateway = InMemoryGateway::new();
        gateway
            .add_entries(
                "/ws/in",
                vec![
                    DirEntry::new("A_R1_001.fastq", EntryType::Reads),
                    DirEntry::new("A_R2_001.fastq", EntryType::Reads),
                ],
            )
            .await;
        let jobs = resolve_jobs(SourceKind::WorkspaceDir, "/ws/in", &settings(), &gateway)
            .await
            .expect("resolves");
        assert_eq!(jobs.len(), 1);
        assert!(jobs["A"].is_prepared());
        assert_eq!(jobs["A"].out_dir(), "/ws/out");
        assert_eq!(jobs["A"].genome_id(), "83333.1");
    }

    #[tokio::test]
    async fn test_resolve_accession_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "SRR001\nSRR002").expect("write");
        let gateway = InMemoryGateway::new();
        let path = file.path().display().to_string();

        let jobs = resolve_jobs(SourceKind::AccessionFile, &path, &settings(), &gateway)
            .await
            .expect("resolves");
        assert_eq!(jobs.keys().collect::<Vec<_>>(), vec!["SRR001", "SRR002"]);
    }
}
