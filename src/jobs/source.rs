//! Read sources for RNA-seq samples.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Where the reads for a sample come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RnaSource {
    /// A pair of read files in the workspace.
    Paired { left: String, right: String },
    /// A run accession in the public sequence archive; no local files.
    Accession { id: String },
}

impl RnaSource {
    /// Creates a paired-reads source.
    pub fn paired(left: impl Into<String>, right: impl Into<String>) -> Self {
        RnaSource::Paired {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Creates an accession source.
    pub fn accession(id: impl Into<String>) -> Self {
        RnaSource::Accession { id: id.into() }
    }

    /// Adds this source's library description to a service parameter object.
    pub fn store(&self, params: &mut Map<String, Value>) {
        match self {
            RnaSource::Paired { left, right } => {
                params.insert(
                    "paired_end_libs".to_string(),
                    json!([{ "read1": left, "read2": right }]),
                );
            }
            RnaSource::Accession { id } => {
                params.insert("srr_ids".to_string(), json!([id]));
            }
        }
    }
}

impl std::fmt::Display for RnaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RnaSource::Paired { left, right } => write!(f, "paired({}, {})", left, right),
            RnaSource::Accession { id } => write!(f, "accession({})", id),
        }
    }
}

/// Accumulates the two halves of a paired source as files are discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialPair {
    pub left: Option<String>,
    pub right: Option<String>,
}

impl PartialPair {
    /// Builds the paired source once both halves are known.
    pub fn complete(&self) -> Option<RnaSource> {
        match (&self.left, &self.right) {
            (Some(left), Some(right)) => Some(RnaSource::paired(left, right)),
            _ => None,
        }
    }
}
