//! The committed knowledge base and its manifest.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CURRENT_SCHEMA_VERSION, Category, Entry, EntryId, StageId};

/// The `manifest.json` structure stored at the root of the KB directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbManifest {
    pub schema_version: u32,
    pub name: String,
    /// Monotonic revision counter, bumped by every commit.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revisions: Vec<RevisionMarker>,
}

impl KbManifest {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: name.into(),
            revision: 0,
            created_at: now,
            updated_at: now,
            revisions: Vec::new(),
        }
    }

    /// The marker written when `stage_id` was committed, if any.
    pub fn marker_for(&self, stage_id: StageId) -> Option<&RevisionMarker> {
        self.revisions.iter().find(|m| m.stage_id == stage_id)
    }
}

/// Audit record of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMarker {
    pub revision: u64,
    pub stage_id: StageId,
    pub applied: Vec<EntryId>,
    pub skipped: Vec<EntryId>,
    #[serde(default)]
    pub overridden: bool,
    pub committed_at: DateTime<Utc>,
}

/// An on-disk record that could not be loaded as an [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEntry {
    pub category: Category,
    pub index: usize,
    pub reason: String,
}

/// In-memory view of the committed knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    pub manifest: KbManifest,
    pub collections: BTreeMap<Category, Vec<Entry>>,
    pub malformed: Vec<MalformedEntry>,
}

impl KnowledgeBase {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            manifest: KbManifest::new(name),
            collections: Category::ALL.into_iter().map(|c| (c, Vec::new())).collect(),
            malformed: Vec::new(),
        }
    }

    pub fn entries(&self, category: Category) -> &[Entry] {
        self.collections
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, category: Category, id: &EntryId) -> Option<&Entry> {
        self.entries(category).iter().find(|e| &e.id == id)
    }

    /// Look an id up across every category.
    pub fn find(&self, id: &EntryId) -> Option<&Entry> {
        self.collections.values().flatten().find(|e| &e.id == id)
    }

    pub fn malformed_in(&self, category: Category) -> impl Iterator<Item = &MalformedEntry> {
        self.malformed.iter().filter(move |m| m.category == category)
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
