//! Record normalizer: maps extracted document text onto knowledge-base
//! draft entries.
//!
//! Sections are detected from headings, categorized sections are split into
//! blocks (or bullets) and each block's first line is parsed as an entry
//! header. Text that cannot be categorized is kept as `note` entries so no
//! input is dropped.

mod dates;
mod header;
mod sections;

use std::collections::HashSet;
use std::sync::LazyLock;

use careerkb_shared::{
    CareerKbError, Category, DateRange, Entry, EntryKind, Provenance, Result,
};
use regex::Regex;
use tracing::debug;

use header::{Header, find_patent_number, parse_header, parse_tags};
use sections::{Section, SectionKind, bullet_text, split_blocks, split_bullets, split_sections};

/// Shape of the incoming document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentKind {
    /// Resume, profile text or any sectioned document.
    #[default]
    General,
    /// A single patent publication.
    Patent,
}

/// Optional context supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct NormalizeHints {
    /// Name of the person the document describes.
    pub name: Option<String>,
    /// Source reference recorded in each entry's provenance (file path).
    pub source: String,
    /// Public URL of the source. Preferred over `source` for provenance.
    pub source_url: Option<String>,
    pub kind: DocumentKind,
}

impl NormalizeHints {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            source: path.into(),
            ..Self::default()
        }
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.source_url.as_deref().unwrap_or(&self.source))
    }
}

/// Draft entries plus non-fatal warnings.
#[derive(Debug, Clone, Default)]
pub struct NormalizeResult {
    pub entries: Vec<Entry>,
    pub warnings: Vec<String>,
}

/// Normalize extracted text into draft entries.
///
/// Fails with a parse error only when the text has no non-whitespace content.
pub fn normalize(text: &str, hints: &NormalizeHints) -> Result<NormalizeResult> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    if text.trim().is_empty() {
        return Err(CareerKbError::parse(format!(
            "no extractable text in {}",
            hints.source
        )));
    }

    let mut result = match hints.kind {
        DocumentKind::Patent => normalize_patent(&text, hints),
        DocumentKind::General => normalize_sections(&text, hints),
    };
    drop_repeated_entries(&mut result);

    for entry in &result.entries {
        entry.validate()?;
    }
    debug!(
        source = %hints.source,
        entries = result.entries.len(),
        warnings = result.warnings.len(),
        "normalized document"
    );
    Ok(result)
}

fn normalize_sections(text: &str, hints: &NormalizeHints) -> NormalizeResult {
    let sections = split_sections(text);
    let mut result = NormalizeResult::default();

    if sections.len() == 1 {
        let title = hints.name.clone().unwrap_or_else(|| "Document".to_string());
        result.entries.push(note(title, text.trim().to_string(), hints));
        result
            .warnings
            .push("no recognizable section headings; stored the whole document as a note".into());
        return result;
    }

    for section in &sections {
        if !section.has_content() {
            continue;
        }
        match &section.kind {
            SectionKind::Entries(category) => {
                entries_from_section(section, *category, hints, &mut result);
            }
            SectionKind::Summary | SectionKind::Other => {
                let title = section.heading.clone().unwrap_or_else(|| "Summary".into());
                result.entries.push(note(title, section.text(), hints));
            }
        }
    }
    result
}

/// Keep the first of several entries with identical normalized content.
fn drop_repeated_entries(result: &mut NormalizeResult) {
    let before = result.entries.len();
    let mut seen = HashSet::new();
    result.entries.retain(|entry| seen.insert(entry.fingerprint()));
    let dropped = before - result.entries.len();
    if dropped > 0 {
        result
            .warnings
            .push(format!("dropped {dropped} repeated entr{}", if dropped == 1 { "y" } else { "ies" }));
    }
}

fn note(title: String, body: String, hints: &NormalizeHints) -> Entry {
    let mut entry = Entry::draft(EntryKind::Note, title, hints.provenance());
    entry.body = body;
    entry
}

fn entries_from_section(
    section: &Section,
    category: Category,
    hints: &NormalizeHints,
    result: &mut NormalizeResult,
) {
    for block in split_blocks(&section.lines) {
        let starts_with_bullet = block.first().is_some_and(|l| bullet_text(l).is_some());
        let groups = if starts_with_bullet {
            split_bullets(&block)
        } else {
            vec![block.iter().map(|l| l.trim().to_string()).collect()]
        };

        for group in groups {
            let Some((first, rest)) = group.split_first() else {
                continue;
            };
            let entry = build_entry(parse_header(first, category), rest, category, hints);
            if category == Category::Experience && entry.dates.is_none() {
                result
                    .warnings
                    .push(format!("no dates found in experience entry '{}'", entry.title));
            }
            result.entries.push(entry);
        }
    }
}

fn build_entry(header: Header, rest: &[String], category: Category, hints: &NormalizeHints) -> Entry {
    let mut tags = Vec::new();
    let mut lines = Vec::new();
    for line in rest {
        match parse_tags(line) {
            Some(found) => tags.extend(found),
            None => lines.push(line.as_str()),
        }
    }

    // A tagline from the header, or a first plain line, becomes the description.
    let mut description = String::new();
    let mut body_lines: &[&str] = &lines;
    let mut secondary = header.secondary;
    if !matches!(category, Category::Experience | Category::Certification) {
        if let Some(tagline) = secondary.take() {
            description = tagline;
        }
    }
    if description.is_empty() {
        if let Some((first, remaining)) = lines.split_first() {
            if bullet_text(first).is_none() {
                description = first.trim().to_string();
                body_lines = remaining;
            }
        }
    }

    let kind = match category {
        Category::Experience => EntryKind::experience(secondary.clone(), header.employment),
        Category::Project => EntryKind::Project { url: header.url },
        Category::Patent => EntryKind::Patent {
            number: header.number,
        },
        Category::Certification => EntryKind::Certification {
            issuer: secondary.clone(),
        },
        Category::Note => EntryKind::Note,
    };

    let title = if header.title.is_empty() {
        secondary
            .or_else(|| (!description.is_empty()).then(|| description.clone()))
            .unwrap_or_else(|| format!("Untitled {category}"))
    } else {
        header.title
    };

    let mut entry = Entry::draft(kind, title, hints.provenance());
    entry.dates = header.dates;
    entry.description = description;
    entry.tags = tags;
    entry.body = body_lines.join("\n").trim().to_string();
    entry
}

fn normalize_patent(text: &str, hints: &NormalizeHints) -> NormalizeResult {
    static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?im)^\s*(?:\(54\)|title\s*:)\s*(.+)$").expect("valid regex")
    });
    static ABSTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)(?:\(57\)\s*)?\babstract\b\s*:?\s*(.+?)(?:\n\s*\n|\z)")
            .expect("valid regex")
    });

    let mut result = NormalizeResult::default();
    let title = TITLE_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .or_else(|| {
            text.lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let description = ABSTRACT_RE
        .captures(text)
        .map(|caps| caps[1].split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    if description.is_empty() {
        result.warnings.push("no abstract found in patent document".into());
    }

    let number = find_patent_number(text);
    let mut entry = Entry::draft(EntryKind::Patent { number }, title, hints.provenance());
    entry.dates = dates::find_date(text).map(|(d, _)| DateRange::point(d));
    entry.description = description;
    entry.body = text.trim().to_string();
    result.entries.push(entry);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use careerkb_shared::EmploymentKind;
    use chrono::NaiveDate;

    fn ym(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    const RESUME: &str = "\
Jane Doe
Platform engineer who likes boring infrastructure.

EXPERIENCE

Senior Software Engineer at Acme Corp (Full-time), Jan 2019 – Present
Owns the ingestion platform.
- Cut p99 latency by 40%
- Led a team of five
Technologies: Rust, Kafka

Software Engineer at Globex, 2016 - 2018
Built billing pipelines.

Consultant at Initech

PROJECTS
- careerkb — staged knowledge base https://github.com/jane/careerkb (2023)
- dotfiles: personal configuration

EDUCATION
BSc Computer Science, 2012 - 2016
";

    #[test]
    fn resume_sections_become_entries() {
        let result = normalize(RESUME, &NormalizeHints::file("resume.txt")).unwrap();
        let by_category = |c: Category| {
            result
                .entries
                .iter()
                .filter(|e| e.category() == c)
                .collect::<Vec<_>>()
        };

        let experience = by_category(Category::Experience);
        assert_eq!(experience.len(), 3);
        let acme = experience[0];
        assert_eq!(acme.title, "Senior Software Engineer");
        assert_eq!(
            acme.kind,
            EntryKind::experience(Some("Acme Corp".into()), EmploymentKind::FullTime)
        );
        assert_eq!(acme.dates, Some(DateRange::new(ym(2019, 1), None)));
        assert_eq!(acme.description, "Owns the ingestion platform.");
        assert_eq!(acme.body, "- Cut p99 latency by 40%\n- Led a team of five");
        assert_eq!(acme.tags, vec!["Rust", "Kafka"]);
        assert_eq!(acme.provenance.source, "resume.txt");

        let projects = by_category(Category::Project);
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].title, "careerkb");
        assert_eq!(projects[1].title, "dotfiles");
        assert_eq!(projects[1].description, "personal configuration");

        let notes = by_category(Category::Note);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].title, "Summary");
        assert!(notes[0].body.starts_with("Jane Doe"));
        assert_eq!(notes[1].title, "EDUCATION");
        assert_eq!(notes[1].body, "BSc Computer Science, 2012 - 2016");
    }

    #[test]
    fn undated_experience_is_warned() {
        let result = normalize(RESUME, &NormalizeHints::file("resume.txt")).unwrap();
        assert_eq!(
            result.warnings,
            vec!["no dates found in experience entry 'Consultant'".to_string()]
        );
    }

    #[test]
    fn headingless_text_becomes_one_note() {
        let hints = NormalizeHints {
            name: Some("Jane Doe".into()),
            ..NormalizeHints::file("notes.txt")
        };
        let result = normalize("just some words\nnothing else", &hints).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].category(), Category::Note);
        assert_eq!(result.entries[0].title, "Jane Doe");
        assert_eq!(result.entries[0].body, "just some words\nnothing else");
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn blank_text_is_a_parse_error() {
        let err = normalize(" \n\t\n", &NormalizeHints::file("empty.txt")).unwrap_err();
        assert!(matches!(err, CareerKbError::Parse { .. }));
    }

    #[test]
    fn patent_document_yields_one_entry() {
        let text = "\
United States Patent US 9,876,543 B2
Date of Patent: Mar. 5, 2019
(54) STREAMING DEDUPLICATION OF EVENT LOGS

(57) Abstract
A method for removing duplicate events
from a stream in constant memory.

Claims follow.";
        let hints = NormalizeHints {
            kind: DocumentKind::Patent,
            source_url: Some("https://patents.example/US9876543B2".into()),
            ..NormalizeHints::file("US9876543.pdf")
        };
        let result = normalize(text, &hints).unwrap();
        assert_eq!(result.entries.len(), 1);
        let patent = &result.entries[0];
        assert_eq!(patent.title, "STREAMING DEDUPLICATION OF EVENT LOGS");
        assert_eq!(
            patent.kind,
            EntryKind::Patent {
                number: Some("US 9,876,543 B2".into())
            }
        );
        assert_eq!(
            patent.description,
            "A method for removing duplicate events from a stream in constant memory."
        );
        assert_eq!(patent.dates, Some(DateRange::point(ym(2019, 1))));
        assert_eq!(patent.provenance.source, "https://patents.example/US9876543B2");
    }

    #[test]
    fn repeated_entries_are_kept_once() {
        let text = "PROJECTS\n- dotfiles: personal configuration\n- careerkb: staged knowledge base\n- dotfiles: personal configuration\n";
        let result = normalize(text, &NormalizeHints::file("cv.txt")).unwrap();
        let titles: Vec<_> = result
            .entries
            .iter()
            .filter(|e| e.category() == Category::Project)
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles, ["dotfiles", "careerkb"]);
        assert!(result.warnings.iter().any(|w| w == "dropped 1 repeated entry"));
    }
}
