//! PII redaction for extracted document text.
//!
//! Each category is a regex pass `&str -> String` applied in a fixed order
//! (email, government id, street address, phone) so that earlier, more
//! specific patterns consume text before the broader phone pattern sees it.
//! The transform is pure; callers decide how to log the findings.

use std::sync::LazyLock;

use careerkb_shared::{Entry, PiiCategory, PiiFinding, SanitizeOptions};
use regex::Regex;

/// Fraction of U+FFFD characters above which text is treated as mis-decoded.
const REPLACEMENT_CHAR_LIMIT: f64 = 0.10;

/// Result of sanitizing one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    /// Non-zero match counts per category, in pass order.
    pub findings: Vec<PiiFinding>,
    /// Set when the input looked like an unrecognized encoding. The text is
    /// then returned unchanged and no findings are reported.
    pub encoding_warning: bool,
}

/// Replacement text for a category.
pub fn placeholder(category: PiiCategory) -> &'static str {
    match category {
        PiiCategory::Email => "[REDACTED_EMAIL]",
        PiiCategory::Phone => "[REDACTED_PHONE]",
        PiiCategory::StreetAddress => "[REDACTED_ADDRESS]",
        PiiCategory::GovernmentId => "[REDACTED_GOV_ID]",
    }
}

/// Categories in the order their passes run.
const PASS_ORDER: [PiiCategory; 4] = [
    PiiCategory::Email,
    PiiCategory::GovernmentId,
    PiiCategory::StreetAddress,
    PiiCategory::Phone,
];

fn pattern(category: PiiCategory) -> &'static Regex {
    static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[A-Za-z0-9_.+-]+@[A-Za-z0-9-]+\.[A-Za-z0-9.-]*[A-Za-z0-9]")
            .expect("valid regex")
    });
    // US SSN or UK National Insurance number.
    static GOV_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"\b\d{3}-\d{2}-\d{4}\b|\b[A-CEGHJ-PR-TW-Z][A-CEGHJ-NPR-TW-Z] ?\d{2} ?\d{2} ?\d{2} ?[A-D]\b",
        )
        .expect("valid regex")
    });
    static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(concat!(
            r"\b\d{1,5}(?: [A-Z][A-Za-z]+){1,4} ",
            r"(?i:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|way|place|pl|terrace|parkway|pkwy)\b\.?",
            r"(?:,? (?i:apt|suite|unit|#) ?[A-Za-z0-9-]+)?",
        ))
        .expect("valid regex")
    });
    static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(concat!(
            r"\+\d{1,3}(?:[ .-]?\(?\d{1,4}\)?){2,5}\b",
            r"|(?:\(\d{3}\) ?|\b\d{3}[ .-])\d{3}[ .-]\d{4}\b",
            r"|\b\d{10}\b",
        ))
        .expect("valid regex")
    });

    match category {
        PiiCategory::Email => &EMAIL_RE,
        PiiCategory::GovernmentId => &GOV_ID_RE,
        PiiCategory::StreetAddress => &ADDRESS_RE,
        PiiCategory::Phone => &PHONE_RE,
    }
}

/// Heuristic for text that was decoded with the wrong encoding.
pub fn looks_misencoded(text: &str) -> bool {
    if text.contains('\0') {
        return true;
    }
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let replaced = text.chars().filter(|&c| c == char::REPLACEMENT_CHARACTER).count();
    replaced as f64 / total as f64 > REPLACEMENT_CHAR_LIMIT
}

/// Redact every enabled PII category in `text`.
///
/// Never fails: mis-encoded input comes back unchanged with
/// `encoding_warning` set.
pub fn sanitize(text: &str, options: &SanitizeOptions) -> Sanitized {
    if looks_misencoded(text) {
        return Sanitized {
            text: text.to_string(),
            findings: Vec::new(),
            encoding_warning: true,
        };
    }

    let mut result = text.to_string();
    let mut findings = Vec::new();

    for category in PASS_ORDER {
        if !options.enabled(category) {
            continue;
        }
        let re = pattern(category);
        let count = re.find_iter(&result).count();
        if count == 0 {
            continue;
        }
        result = re.replace_all(&result, placeholder(category)).into_owned();
        findings.push(PiiFinding { category, count });
    }

    Sanitized {
        text: result,
        findings,
        encoding_warning: false,
    }
}

/// Count PII matches without rewriting. Uses the same pass order as
/// [`sanitize`], so the counts agree with what redaction would report.
pub fn scan(text: &str, options: &SanitizeOptions) -> Vec<PiiFinding> {
    sanitize(text, options).findings
}

/// Redact every text field of a normalized entry in place.
///
/// Returns the findings so callers can merge them into the document audit.
pub fn sanitize_entry(entry: &mut Entry, options: &SanitizeOptions) -> Vec<PiiFinding> {
    let mut findings: Vec<PiiFinding> = Vec::new();
    entry.map_text(|field| {
        let sanitized = sanitize(field, options);
        merge_findings(&mut findings, &sanitized.findings);
        sanitized.text
    });
    findings
}

/// Add `extra` counts into `into`, keeping one row per category.
pub fn merge_findings(into: &mut Vec<PiiFinding>, extra: &[PiiFinding]) {
    for finding in extra {
        match into.iter_mut().find(|f| f.category == finding.category) {
            Some(existing) => existing.count += finding.count,
            None => into.push(*finding),
        }
    }
}
