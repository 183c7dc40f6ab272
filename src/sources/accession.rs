//! Run-accession manifests.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::SourceError;
use crate::jobs::{RnaJob, RnaSource};

/// A list of run accessions read from a local file.
///
/// The accession is the first tab-separated column of each line. Blank lines
/// are ignored and repeated accessions keep their first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessionManifest {
    ids: Vec<String>,
}

impl AccessionManifest {
    /// Reads a manifest file.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Manifest` if the file cannot be read.
    pub async fn read(path: &str, has_header: bool) -> Result<Self, SourceError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SourceError::Manifest {
                path: path.to_string(),
                source,
            })?;
        let manifest = Self::parse(&content, has_header);
        info!(count = manifest.len(), path = %path, "Run accessions read");
        Ok(manifest)
    }

    /// Parses manifest text.
    pub fn parse(content: &str, has_header: bool) -> Self {
        let skip = usize::from(has_header);
        let mut ids: Vec<String> = Vec::new();
        for line in content.lines().skip(skip) {
            let id = line.split('\t').next().unwrap_or("").trim();
            if id.is_empty() {
                continue;
            }
            if ids.iter().any(|known| known == id) {
                debug!(accession = %id, "Duplicate accession ignored");
                continue;
            }
            ids.push(id.to_string());
        }
        Self { ids }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Builds one prepared job per accession.
    pub fn into_jobs(self, out_dir: &str, genome_id: &str) -> BTreeMap<String, RnaJob> {
        self.ids
            .into_iter()
            .map(|id| {
                let mut job = RnaJob::new(id.clone(), out_dir, genome_id);
                job.set_source(RnaSource::accession(id.clone()));
                (id, job)
            })
            .collect()
    }
}
