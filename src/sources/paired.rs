//! Paired read files in a workspace directory.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::gateway::{join_path, EntryType, TaskGateway};
use crate::jobs::{PartialPair, RnaJob};

/// Default filename pattern for read files.
pub const DEFAULT_READ_PATTERN: &str = r"(.+)_(R[12])_001\.fastq";

/// Default read-side value for left reads.
pub const DEFAULT_LEFT_ID: &str = "R1";

/// Which half of a read pair a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSide {
    Left,
    Right,
}

impl std::fmt::Display for ReadSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadSide::Left => write!(f, "left"),
            ReadSide::Right => write!(f, "right"),
        }
    }
}

/// A compiled read-file naming pattern.
///
/// The whole file name must match. Capture group 1 is the sample name;
/// capture group 2 is compared with the left id to pick the side.
#[derive(Debug, Clone)]
pub struct ReadPattern {
    regex: Regex,
    left_id: String,
}

impl ReadPattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::InvalidPattern` if the regex does not compile and
    /// `SourceError::MissingCaptureGroups` if it has fewer than two groups.
    pub fn new(pattern: &str, left_id: impl Into<String>) -> Result<Self, SourceError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            SourceError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            }
        })?;
        // captures_len counts the implicit whole-match group.
        if regex.captures_len() < 3 {
            return Err(SourceError::MissingCaptureGroups(pattern.to_string()));
        }
        Ok(Self {
            regex,
            left_id: left_id.into(),
        })
    }

    /// Splits a file name into sample name and read side.
    pub fn classify<'a>(&self, file_name: &'a str) -> Option<(&'a str, ReadSide)> {
        let captures = self.regex.captures(file_name)?;
        let sample = captures.get(1)?.as_str();
        let side = if captures.get(2)?.as_str() == self.left_id {
            ReadSide::Left
        } else {
            ReadSide::Right
        };
        Some((sample, side))
    }
}

/// Scans a workspace directory for paired read files.
#[derive(Debug, Clone)]
pub struct PairedReadScanner {
    pattern: ReadPattern,
}

impl PairedReadScanner {
    pub fn new(pattern: ReadPattern) -> Self {
        Self { pattern }
    }

    /// Builds one job per sample found in `input_dir`.
    ///
    /// Read files that do not match the pattern are skipped. Samples missing
    /// one of their two files are returned without a source.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::DuplicateReadFile` if two files resolve to the
    /// same sample and side, and `SourceError::Gateway` if listing fails.
    pub async fn scan(
        &self,
        input_dir: &str,
        out_dir: &str,
        genome_id: &str,
        gateway: &dyn TaskGateway,
    ) -> Result<BTreeMap<String, RnaJob>, SourceError> {
        info!(input = %input_dir, "Scanning input directory");
        let entries = gateway.list_directory(input_dir).await?;

        let mut pairs: BTreeMap<String, PartialPair> = BTreeMap::new();
        for entry in entries {
            if entry.entry_type != EntryType::Reads {
                continue;
            }
            let Some((sample, side)) = self.pattern.classify(&entry.name) else {
                debug!(file = %entry.name, "Read file does not match the naming pattern");
                continue;
            };
            let full_name = join_path(input_dir, &entry.name);
            let pair = pairs.entry(sample.to_string()).or_default();
            let slot = match side {
                ReadSide::Left => &mut pair.left,
                ReadSide::Right => &mut pair.right,
            };
            if let Some(first) = slot {
                return Err(SourceError::DuplicateReadFile {
                    sample: sample.to_string(),
                    side: side.to_string(),
                    first: first.clone(),
                    second: full_name,
                });
            }
            *slot = Some(full_name);
        }

        let mut jobs = BTreeMap::new();
        for (sample, pair) in pairs {
            let mut job = RnaJob::new(sample.clone(), out_dir, genome_id);
            match pair.complete() {
                Some(source) => job.set_source(source),
                None => warn!(sample = %sample, "Sample is missing one of its read files"),
            }
            jobs.insert(sample, job);
        }
        info!(samples = jobs.len(), "Input directory scanned");
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{DirEntry, InMemoryGateway};
    use crate::jobs::RnaSource;

    fn scanner() -> PairedReadScanner {
        PairedReadScanner::new(
            ReadPattern::new(DEFAULT_READ_PATTERN, DEFAULT_LEFT_ID).expect("valid pattern"),
        )
    }

    #[test]
    fn test_classify() {
        let pattern = ReadPattern::new(DEFAULT_READ_PATTERN, DEFAULT_LEFT_ID).expect("valid");
        assert_eq!(
            pattern.classify("S1_R1_001.fastq"),
            Some(("S1", ReadSide::Left))
        );
        assert_eq!(
            pattern.classify("S1_R2_001.fastq"),
            Some(("S1", ReadSide::Right))
        );
        assert_eq!(pattern.classify("S1_R1_001.fastq.bak"), None);
        assert_eq!(pattern.classify("notes.txt"), None);
    }

    #[test]
    fn test_pattern_needs_two_groups() {
        let err = ReadPattern::new(r"(.+)\.fastq", "R1").unwrap_err();
        assert!(matches!(err, SourceError::MissingCaptureGroups(_)));

        let err = ReadPattern::new(r"(.+", "R1").unwrap_err();
        assert!(matches!(err, SourceError::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn test_scan_pairs_and_skips() {
        let gateway = InMemoryGateway::new();
        gateway
            .add_entries(
                "/ws/in",
                vec![
                    DirEntry::new("A_R1_001.fastq", EntryType::Reads),
                    DirEntry::new("A_R2_001.fastq", EntryType::Reads),
                    DirEntry::new("B_R1_001.fastq", EntryType::Reads),
                    DirEntry::new("odd-name.fastq", EntryType::Reads),
                    DirEntry::new("C_R1_001.fastq", EntryType::Text),
                ],
            )
            .await;

        let jobs = scanner()
            .scan("/ws/in", "/ws/out", "83333.1", &gateway)
            .await
            .expect("scan succeeds");

        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs["A"].source(),
            Some(&RnaSource::paired("/ws/in/A_R1_001.fastq", "/ws/in/A_R2_001.fastq"))
        );
        assert!(!jobs["B"].is_prepared());
        assert!(!jobs.contains_key("C"));
    }

    #[tokio::test]
    async fn test_scan_rejects_duplicate_side() {
        let gateway = InMemoryGateway::new();
        let pattern = ReadPattern::new(r"(.+?)_.*(R[12])\.fastq", "R1").expect("valid");
        gateway
            .add_entries(
                "/ws/in",
                vec![
                    DirEntry::new("A_lane1_R1.fastq", EntryType::Reads),
                    DirEntry::new("A_lane2_R1.fastq", EntryType::Reads),
                ],
            )
            .await;

        let err = PairedReadScanner::new(pattern)
            .scan("/ws/in", "/ws/out", "83333.1", &gateway)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SourceError::DuplicateReadFile { ref sample, .. } if sample == "A"
        ));
    }
}
