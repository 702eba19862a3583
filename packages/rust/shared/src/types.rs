//! Core domain types for careerkb knowledge-base records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CareerKbError;
use crate::text::{fold, fold_opt};

/// Current schema version for staged items and the KB manifest.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// PiiCategory
// ---------------------------------------------------------------------------

/// Classes of personally identifiable information the sanitizer redacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Email,
    Phone,
    StreetAddress,
    GovernmentId,
}

impl PiiCategory {
    pub const ALL: [PiiCategory; 4] = [
        Self::Email,
        Self::Phone,
        Self::StreetAddress,
        Self::GovernmentId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::StreetAddress => "street_address",
            Self::GovernmentId => "government_id",
        }
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many matches of one PII category were found in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiFinding {
    pub category: PiiCategory,
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Knowledge-base partition. Each category persists to its own JSON file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Experience,
    Project,
    Patent,
    Certification,
    Note,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::Experience,
        Self::Project,
        Self::Patent,
        Self::Certification,
        Self::Note,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experience => "experience",
            Self::Project => "project",
            Self::Patent => "patent",
            Self::Certification => "certification",
            Self::Note => "note",
        }
    }

    /// File name of this category inside the knowledge-base directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Experience => "experience.json",
            Self::Project => "projects.json",
            Self::Patent => "patents.json",
            Self::Certification => "certifications.json",
            Self::Note => "notes.json",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CareerKbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CareerKbError::validation(format!("unknown category '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable identifier of a knowledge-base entry, unique within its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    /// Generate a new time-sortable entry identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A UUID v7 wrapper for staged item identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub Uuid);

impl StageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for StageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StageId {
    type Err = CareerKbError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| CareerKbError::validation(format!("invalid stage id '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// DateRange
// ---------------------------------------------------------------------------

/// A month-granularity period. `end == None` means ongoing.
///
/// Dates are stored as the first day of their month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Build a range, swapping the bounds if they arrive reversed.
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        match end {
            Some(e) if e < start => Self {
                start: e,
                end: Some(start),
            },
            _ => Self { start, end },
        }
    }

    /// A single month, e.g. a certification's issue date.
    pub fn point(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: Some(date),
        }
    }

    pub fn is_ongoing(&self) -> bool {
        self.end.is_none()
    }

    fn end_or_max(&self) -> NaiveDate {
        self.end.unwrap_or(NaiveDate::MAX)
    }

    /// Inclusive overlap: ranges that share at least one month.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end_or_max() && other.start <= self.end_or_max()
    }

    /// Strict overlap: touching boundaries (one ends the month the other
    /// starts) do not count.
    pub fn overlaps_strictly(&self, other: &DateRange) -> bool {
        self.start < other.end_or_max() && other.start < self.end_or_max()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.start.year(), self.start.month())?;
        match self.end {
            Some(end) if end == self.start => Ok(()),
            Some(end) => write!(f, " – {:04}-{:02}", end.year(), end.month()),
            None => write!(f, " – present"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentKind {
    FullTime,
    PartTime,
    Contract,
    Internship,
    #[default]
    Unspecified,
}

/// Category-specific fields. The variant determines the entry's category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Experience {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        organization: Option<String>,
        #[serde(default)]
        employment: EmploymentKind,
    },
    Project {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Patent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
    },
    Certification {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issuer: Option<String>,
    },
    Note,
}

impl EntryKind {
    pub fn category(&self) -> Category {
        match self {
            Self::Experience { .. } => Category::Experience,
            Self::Project { .. } => Category::Project,
            Self::Patent { .. } => Category::Patent,
            Self::Certification { .. } => Category::Certification,
            Self::Note => Category::Note,
        }
    }

    pub fn experience(organization: Option<String>, employment: EmploymentKind) -> Self {
        Self::Experience {
            organization,
            employment,
        }
    }

    /// The organization-like field of the kind: employer or issuer.
    pub fn organization(&self) -> Option<&str> {
        match self {
            Self::Experience { organization, .. } => organization.as_deref(),
            Self::Certification { issuer } => issuer.as_deref(),
            _ => None,
        }
    }
}

/// Where an entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Source document path, profile URL, or patent page URL.
    pub source: String,
    pub ingested_at: DateTime<Utc>,
    /// The staged item that introduced this revision of the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<StageId>,
}

impl Provenance {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ingested_at: Utc::now(),
            stage_id: None,
        }
    }
}

/// A single knowledge-base record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    #[serde(flatten)]
    pub kind: EntryKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dates: Option<DateRange>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub body: String,
    pub provenance: Provenance,
}

impl Entry {
    /// A draft entry with a fresh id and empty optional fields.
    pub fn draft(kind: EntryKind, title: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            id: EntryId::new(),
            kind,
            title: title.into(),
            dates: None,
            description: String::new(),
            tags: Vec::new(),
            body: String::new(),
            provenance,
        }
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }

    /// Check the invariants every entry must satisfy before it is staged.
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.0.trim().is_empty() {
            return Err(CareerKbError::validation("entry id is empty"));
        }
        if self.title.trim().is_empty() {
            return Err(CareerKbError::validation(format!(
                "{} entry {} has an empty title",
                self.category(),
                self.id
            )));
        }
        Ok(())
    }

    /// Description and body, the free text compared for similarity.
    pub fn text(&self) -> String {
        match (self.description.is_empty(), self.body.is_empty()) {
            (true, _) => self.body.clone(),
            (false, true) => self.description.clone(),
            (false, false) => format!("{}\n{}", self.description, self.body),
        }
    }

    /// SHA-256 over the folded content fields. Ids and provenance are
    /// excluded so a re-ingested copy of a committed entry fingerprints equal.
    pub fn fingerprint(&self) -> String {
        let mut tags: Vec<String> = self.tags.iter().map(|t| fold(t)).collect();
        tags.sort();
        tags.dedup();

        let kind = match &self.kind {
            EntryKind::Experience {
                organization,
                employment,
            } => format!("experience|{}|{employment:?}", fold_opt(organization.as_deref())),
            EntryKind::Project { url } => format!("project|{}", url.as_deref().unwrap_or("")),
            EntryKind::Patent { number } => format!("patent|{}", fold_opt(number.as_deref())),
            EntryKind::Certification { issuer } => {
                format!("certification|{}", fold_opt(issuer.as_deref()))
            }
            EntryKind::Note => "note".to_string(),
        };
        let dates = self.dates.map(|d| d.to_string()).unwrap_or_default();

        let mut hasher = Sha256::new();
        for part in [
            kind.as_str(),
            &fold(&self.title),
            &dates,
            &fold(&self.description),
            &fold(&self.body),
            &tags.join(","),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Apply `f` to every free-text field, including category-specific ones.
    pub fn map_text(&mut self, mut f: impl FnMut(&str) -> String) {
        self.title = f(&self.title);
        self.description = f(&self.description);
        self.body = f(&self.body);
        for tag in &mut self.tags {
            *tag = f(tag);
        }
        let field = match &mut self.kind {
            EntryKind::Experience { organization, .. } => organization.as_mut(),
            EntryKind::Project { url } => url.as_mut(),
            EntryKind::Patent { number } => number.as_mut(),
            EntryKind::Certification { issuer } => issuer.as_mut(),
            EntryKind::Note => None,
        };
        if let Some(value) = field {
            *value = f(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    fn sample_entry() -> Entry {
        let mut entry = Entry::draft(
            EntryKind::experience(Some("Acme Corp".into()), EmploymentKind::FullTime),
            "Staff Engineer",
            Provenance::new("cv.txt"),
        );
        entry.dates = Some(DateRange::new(ym(2019, 1), None));
        entry.description = "Led the storage team".into();
        entry.tags = vec!["Rust".into(), "storage".into()];
        entry
    }

    #[test]
    fn stage_id_roundtrip() {
        let id = StageId::new();
        let parsed: StageId = id.to_string().parse().expect("parse StageId");
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<StageId>().is_err());
    }

    #[test]
    fn category_roundtrip() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert_eq!(Category::Project.file_name(), "projects.json");
        assert!("education".parse::<Category>().is_err());
    }

    #[test]
    fn date_range_overlap_rules() {
        let a = DateRange::new(ym(2018, 1), Some(ym(2020, 3)));
        let b = DateRange::new(ym(2020, 3), None);
        let c = DateRange::new(ym(2019, 6), Some(ym(2019, 9)));

        assert!(a.overlaps(&b));
        assert!(!a.overlaps_strictly(&b));
        assert!(a.overlaps_strictly(&c));
        assert!(c.overlaps_strictly(&a));
        assert!(b.is_ongoing());
    }

    #[test]
    fn reversed_range_is_swapped() {
        let r = DateRange::new(ym(2021, 5), Some(ym(2019, 2)));
        assert_eq!(r.start, ym(2019, 2));
        assert_eq!(r.end, Some(ym(2021, 5)));
        assert_eq!(r.to_string(), "2019-02 – 2021-05");
        assert_eq!(DateRange::point(ym(2020, 7)).to_string(), "2020-07");
    }

    #[test]
    fn entry_serializes_with_flat_kind_tag() {
        let entry = sample_entry();
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["kind"], "experience");
        assert_eq!(json["organization"], "Acme Corp");
        assert_eq!(json["employment"], "full_time");

        let parsed: Entry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, entry);

        let note: Entry = serde_json::from_str(
            r#"{"id":"n1","kind":"note","title":"Skills","provenance":{"source":"cv","ingested_at":"2024-01-01T00:00:00Z"}}"#,
        )
        .expect("deserialize note");
        assert_eq!(note.category(), Category::Note);
        assert!(note.body.is_empty());
    }

    #[test]
    fn fingerprint_ignores_id_provenance_and_formatting() {
        let a = sample_entry();
        let mut b = sample_entry();
        b.title = "staff engineer".into();
        b.tags = vec!["storage".into(), "RUST".into()];
        b.provenance = Provenance::new("linkedin");
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.body = "Also mentored interns".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn validate_rejects_blank_title() {
        let mut entry = sample_entry();
        assert!(entry.validate().is_ok());
        entry.title = "   ".into();
        assert!(entry.validate().is_err());
    }

    #[test]
    fn map_text_reaches_kind_fields() {
        let mut entry = sample_entry();
        entry.map_text(|s| s.to_uppercase());
        assert_eq!(entry.title, "STAFF ENGINEER");
        assert_eq!(entry.kind.organization(), Some("ACME CORP"));
        assert_eq!(entry.tags, vec!["RUST", "STORAGE"]);
    }
}
