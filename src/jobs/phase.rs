//! Processing phases of an RNA-seq job.

use serde::{Deserialize, Serialize};

/// A stage of the fixed TRIM → ALIGN → COPY pipeline.
///
/// Phases are totally ordered; a job's phase never moves backwards. Each
/// phase names its output with a stable suffix so that finished work can be
/// recognised in the output directory after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Adapter and quality trimming of the raw reads.
    Trim,
    /// Alignment of the trimmed reads to the reference genome.
    Align,
    /// Copy of the expression results into the shared results folder.
    Copy,
    /// Terminal phase.
    Done,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 4] = [Phase::Trim, Phase::Align, Phase::Copy, Phase::Done];

    /// Suffix appended to the job name to form this phase's output name.
    pub fn suffix(self) -> &'static str {
        match self {
            Phase::Trim => "_fq",
            Phase::Align => "_rna",
            Phase::Copy => "_genes.fpkm",
            Phase::Done => "",
        }
    }

    /// Output name produced by this phase for a job.
    pub fn output_name(self, job_name: &str) -> String {
        format!("{}{}", job_name, self.suffix())
    }

    /// Extracts the job name from an output name of this phase.
    ///
    /// Returns `None` when the name does not carry this phase's suffix, or
    /// when stripping the suffix would leave nothing.
    pub fn job_name_from_output(self, output_name: &str) -> Option<&str> {
        if self == Phase::Done {
            return None;
        }
        output_name
            .strip_suffix(self.suffix())
            .filter(|name| !name.is_empty())
    }

    /// The phase that follows this one, or `None` for `Done`.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Trim => Some(Phase::Align),
            Phase::Align => Some(Phase::Copy),
            Phase::Copy => Some(Phase::Done),
            Phase::Done => None,
        }
    }

    /// Returns whether this phase is carried out by a remote task.
    pub fn is_remote(self) -> bool {
        matches!(self, Phase::Trim | Phase::Align)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Trim => write!(f, "TRIM"),
            Phase::Align => write!(f, "ALIGN"),
            Phase::Copy => write!(f, "COPY"),
            Phase::Done => write!(f, "DONE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Trim < Phase::Align);
        assert!(Phase::Align < Phase::Copy);
        assert!(Phase::Copy < Phase::Done);
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
    }

    #[test]
    fn test_next_walks_the_pipeline() {
        assert_eq!(Phase::Trim.next(), Some(Phase::Align));
        assert_eq!(Phase::Align.next(), Some(Phase::Copy));
        assert_eq!(Phase::Copy.next(), Some(Phase::Done));
        assert_eq!(Phase::Done.next(), None);
    }

    #[test]
    fn test_output_names() {
        assert_eq!(Phase::Trim.output_name("S1"), "S1_fq");
        assert_eq!(Phase::Align.output_name("S1"), "S1_rna");
        assert_eq!(Phase::Copy.output_name("S1"), "S1_genes.fpkm");
    }

    #[test]
    fn test_job_name_from_output() {
        assert_eq!(Phase::Trim.job_name_from_output("S1_fq"), Some("S1"));
        assert_eq!(Phase::Align.job_name_from_output("S1_rna"), Some("S1"));
        assert_eq!(Phase::Align.job_name_from_output("S1_fq"), None);
        assert_eq!(Phase::Copy.job_name_from_output("S1_genes.fpkm"), Some("S1"));
        assert_eq!(Phase::Trim.job_name_from_output("_fq"), None);
        assert_eq!(Phase::Done.job_name_from_output("S1"), None);
    }

    #[test]
    fn test_display_and_remote() {
        assert_eq!(Phase::Align.to_string(), "ALIGN");
        assert!(Phase::Trim.is_remote());
        assert!(Phase::Align.is_remote());
        assert!(!Phase::Copy.is_remote());
        assert!(!Phase::Done.is_remote());
    }
}
