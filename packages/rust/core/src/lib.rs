//! Core review workflow for careerkb.
//!
//! This crate ties the sanitizer, normalizer, stores and document
//! collaborators together: batch ingestion into the staging area, conflict
//! analysis against the live knowledge base, and the approve/reject
//! decisions that move staged entries into it.

pub mod approval;
pub mod conflict;
pub mod pipeline;
pub mod preview;
pub mod similarity;

pub use approval::ApprovalEngine;
pub use conflict::ConflictResolver;
pub use pipeline::{
    Collaborators, IngestFailure, IngestReport, IngestRequest, Ingestor, ProgressReporter,
    SilentProgress,
};
pub use preview::{DraftPreview, FieldChange, StagedPreview};
