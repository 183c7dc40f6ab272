//! RNA-seq jobs: one per sample.
//!
//! - [`Phase`]: the ordered TRIM → ALIGN → COPY → DONE stages
//! - [`RnaSource`]: where a sample's reads come from
//! - [`RnaJob`]: the per-sample state machine
//! - [`launcher`]: how each phase is started on the remote service

pub mod job;
pub mod launcher;
pub mod phase;
pub mod source;

pub use job::RnaJob;
pub use launcher::{CopyOutcome, CopyTargets, Launch, ServiceRequest};
pub use phase::Phase;
pub use source::{PartialPair, RnaSource};
