//! Shared types, error model, and configuration for careerkb.
//!
//! This crate is the foundation depended on by all other careerkb crates.
//! It provides:
//! - [`CareerKbError`], the unified error type
//! - Domain types ([`Entry`], [`StagedItem`], [`KnowledgeBase`], [`KbManifest`])
//! - Configuration ([`AppConfig`] and the runtime values derived from it)

pub mod config;
pub mod error;
pub mod kb;
pub mod staged;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConflictConfig, ExtractionConfig, ExtractionSection, HttpConfig, IngestConfig,
    PathsConfig, SanitizeOptions, SanitizerConfig, SimilarityConfig, StoreConfig, StoreSettings,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{CareerKbError, ExtractionFailure, Result, ScrapeFailure};
pub use kb::{KbManifest, KnowledgeBase, MalformedEntry, RevisionMarker};
pub use staged::{
    ApprovalOutcome, ConflictAnnotation, Relation, Resolution, SourceInfo, StageStatus,
    StagedItem, StagedSummary,
};
pub use text::{fold, fold_opt};
pub use types::{
    CURRENT_SCHEMA_VERSION, Category, DateRange, EmploymentKind, Entry, EntryId, EntryKind,
    PiiCategory, PiiFinding, Provenance, StageId,
};
