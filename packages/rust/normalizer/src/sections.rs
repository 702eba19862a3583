//! Heading detection and block splitting.

use std::sync::LazyLock;

use careerkb_shared::{Category, fold};
use regex::Regex;

/// What a section heading announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SectionKind {
    /// A section whose blocks become entries of this category.
    Entries(Category),
    /// Summary, profile, objective and the text before the first heading.
    Summary,
    /// A heading outside the vocabulary (education, skills, ...).
    Other,
}

#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub kind: SectionKind,
    /// Heading text as written, `None` for the preamble.
    pub heading: Option<String>,
    pub lines: Vec<String>,
}

impl Section {
    pub fn has_content(&self) -> bool {
        self.lines.iter().any(|l| !l.trim().is_empty())
    }

    pub fn text(&self) -> String {
        self.lines.join("\n").trim().to_string()
    }
}

static MARKDOWN_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*#*\s*$").expect("valid regex"));

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•▪◦‣–]|\d{1,2}[.)])\s+(.*)$").expect("valid regex")
});

/// Map folded heading text onto the known section vocabulary.
fn vocabulary(folded: &str) -> Option<SectionKind> {
    let kind = match folded {
        "experience" | "work experience" | "professional experience" | "employment"
        | "employment history" | "work history" | "career history" => {
            SectionKind::Entries(Category::Experience)
        }
        "projects" | "personal projects" | "selected projects" | "side projects"
        | "key projects" => SectionKind::Entries(Category::Project),
        "patents" | "inventions" | "patents publications" | "patents and publications" => {
            SectionKind::Entries(Category::Patent)
        }
        "certifications" | "certification" | "certificates" | "licenses certifications"
        | "licenses and certifications" | "licences certifications" => {
            SectionKind::Entries(Category::Certification)
        }
        "summary" | "professional summary" | "profile" | "about" | "about me" | "objective" => {
            SectionKind::Summary
        }
        _ => return None,
    };
    Some(kind)
}

/// Short ALL-CAPS line without digits or separators, e.g. `EDUCATION`.
fn is_caps_heading(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3
        && line.chars().count() <= 40
        && line.split_whitespace().count() <= 4
        && letters.iter().all(|c| c.is_uppercase())
        && !line.chars().any(|c| c.is_ascii_digit() || ",|@/()".contains(c))
}

/// Classify `line` as a heading, returning its kind and display text.
pub(crate) fn classify_heading(line: &str) -> Option<(SectionKind, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || BULLET_RE.is_match(line) {
        return None;
    }

    if let Some(caps) = MARKDOWN_HEADING_RE.captures(trimmed) {
        let text = caps[1].trim_end_matches(':').trim().to_string();
        let kind = vocabulary(&fold(&text)).unwrap_or(SectionKind::Other);
        return Some((kind, text));
    }

    let text = trimmed.trim_end_matches(':').trim();
    if let Some(kind) = vocabulary(&fold(text)) {
        return Some((kind, text.to_string()));
    }
    if is_caps_heading(text) {
        return Some((SectionKind::Other, text.to_string()));
    }
    None
}

/// Split a document into sections. The first section is always the
/// preamble (possibly empty).
pub(crate) fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = vec![Section {
        kind: SectionKind::Summary,
        heading: None,
        lines: Vec::new(),
    }];

    for line in text.lines() {
        match classify_heading(line) {
            Some((kind, heading)) => sections.push(Section {
                kind,
                heading: Some(heading),
                lines: Vec::new(),
            }),
            None => {
                if let Some(current) = sections.last_mut() {
                    current.lines.push(line.trim_end().to_string());
                }
            }
        }
    }

    sections
}

/// Split section lines into blank-line separated blocks.
pub(crate) fn split_blocks(lines: &[String]) -> Vec<Vec<String>> {
    let mut blocks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line.clone());
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Text of a bullet line without its marker.
pub(crate) fn bullet_text(line: &str) -> Option<&str> {
    BULLET_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Split a bullet-led block into one line group per bullet. Non-bullet
/// lines continue the previous bullet.
pub(crate) fn split_bullets(block: &[String]) -> Vec<Vec<String>> {
    let mut items: Vec<Vec<String>> = Vec::new();
    for line in block {
        match bullet_text(line) {
            Some(text) => items.push(vec![text.to_string()]),
            None => match items.last_mut() {
                Some(item) => item.push(line.trim().to_string()),
                None => items.push(vec![line.trim().to_string()]),
            },
        }
    }
    items
}
