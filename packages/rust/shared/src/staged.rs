//! Staged items: proposed knowledge-base changes awaiting review.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CareerKbError;
use crate::types::{CURRENT_SCHEMA_VERSION, Entry, EntryId, PiiFinding, StageId};

/// Where a staged item came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_hint: Option<String>,
    /// Short human-readable description, e.g. the file name.
    #[serde(default)]
    pub label: String,
}

impl SourceInfo {
    pub fn file(path: impl Into<String>, name_hint: Option<String>) -> Self {
        let path = path.into();
        Self {
            label: path.clone(),
            files: vec![path],
            profile_url: None,
            name_hint,
        }
    }

    pub fn profile(url: impl Into<String>, name_hint: Option<String>) -> Self {
        let url = url.into();
        Self {
            label: url.clone(),
            files: Vec::new(),
            profile_url: Some(url),
            name_hint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Approved,
    Rejected,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = CareerKbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(CareerKbError::validation(format!(
                "unknown status '{other}'"
            ))),
        }
    }
}

/// How a draft entry relates to the current knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    New,
    Duplicate,
    Update,
    Contradiction,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Duplicate => "duplicate",
            Self::Update => "update",
            Self::Contradiction => "contradiction",
        })
    }
}

/// Conflict classification of one draft entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictAnnotation {
    pub draft_id: EntryId,
    /// The existing entry this draft relates to. `None` for [`Relation::New`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EntryId>,
    pub relation: Relation,
    /// Similarity score against the target, 0 when there is none.
    pub score: f64,
    /// For a contradiction, the entry the draft is a revision of, if any.
    /// An overriding approval replaces it instead of adding a new entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<EntryId>,
}

impl ConflictAnnotation {
    /// The knowledge-base entry an approval of this draft would overwrite.
    pub fn replace_target(&self) -> Option<&EntryId> {
        match self.relation {
            Relation::Update => self.target.as_ref(),
            Relation::Contradiction => self.replaces.as_ref(),
            Relation::New | Relation::Duplicate => None,
        }
    }
}

/// What an approval did to the knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    /// Knowledge-base ids written by the commit.
    pub applied: Vec<EntryId>,
    /// Draft ids skipped as duplicates.
    pub skipped: Vec<EntryId>,
    /// Revision created by the commit, `None` when nothing was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// The terminal decision recorded on a staged item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Resolution {
    Approved {
        at: DateTime<Utc>,
        outcome: ApprovalOutcome,
        #[serde(default)]
        overridden: bool,
    },
    Rejected {
        at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Resolution {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Approved { at, .. } | Self::Rejected { at, .. } => *at,
        }
    }
}

/// A persisted proposal: one or more draft entries from a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedItem {
    pub schema_version: u32,
    pub id: StageId,
    pub payload: Vec<Entry>,
    pub source: SourceInfo,
    pub status: StageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub annotations: Vec<ConflictAnnotation>,
    /// Set once the conflict resolver has annotated the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<PiiFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl StagedItem {
    /// A fresh Pending item with a newly allocated id.
    pub fn new(payload: Vec<Entry>, source: SourceInfo) -> Self {
        let id = StageId::new();
        let now = Utc::now();
        let payload = payload
            .into_iter()
            .map(|mut entry| {
                entry.provenance.stage_id = Some(id);
                entry
            })
            .collect();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            id,
            payload,
            source,
            status: StageStatus::Pending,
            created_at: now,
            updated_at: now,
            annotations: Vec::new(),
            analyzed_at: None,
            warnings: Vec::new(),
            findings: Vec::new(),
            resolution: None,
        }
    }

    pub fn annotation_for(&self, draft: &EntryId) -> Option<&ConflictAnnotation> {
        self.annotations.iter().find(|a| &a.draft_id == draft)
    }

    pub fn has_contradictions(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| a.relation == Relation::Contradiction)
    }

    pub fn summary(&self) -> StagedSummary {
        let count = |relation| {
            self.annotations
                .iter()
                .filter(|a| a.relation == relation)
                .count()
        };
        StagedSummary {
            id: self.id,
            status: self.status,
            source: self.source.label.clone(),
            created_at: self.created_at,
            entries: self.payload.len(),
            analyzed: self.analyzed_at.is_some(),
            new: count(Relation::New),
            duplicates: count(Relation::Duplicate),
            updates: count(Relation::Update),
            contradictions: count(Relation::Contradiction),
            warnings: self.warnings.len(),
        }
    }
}

/// Compact listing row for a staged item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedSummary {
    pub id: StageId,
    pub status: StageStatus,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub entries: usize,
    pub analyzed: bool,
    pub new: usize,
    pub duplicates: usize,
    pub updates: usize,
    pub contradictions: usize,
    pub warnings: usize,
}
