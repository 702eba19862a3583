//! File-backed persistence for careerkb.
//!
//! - [`StagingStore`]: one JSON file per staged item under the staging directory
//! - [`KnowledgeBaseStore`]: one JSON array per category plus `manifest.json`,
//!   written through a redo journal so commits are all-or-nothing
//!
//! Both stores are single-writer: mutations take a per-store
//! `tokio::sync::Mutex` with a bounded wait. When both are needed the
//! knowledge-base lock is taken first.

mod fsio;
mod knowledge;
mod lock;
mod staging;

pub use knowledge::{ChangeSet, KbGuard, KnowledgeBaseStore};
pub use staging::StagingStore;
