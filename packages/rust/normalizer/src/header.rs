//! Entry header parsing: title, organization, dates and per-category markers.

use std::sync::LazyLock;

use careerkb_shared::{Category, DateRange, EmploymentKind};
use regex::Regex;

use crate::dates::{find_date, find_range};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub title: String,
    /// Employer for experience, issuer for certifications, tagline otherwise.
    pub secondary: Option<String>,
    pub dates: Option<DateRange>,
    pub employment: EmploymentKind,
    pub url: Option<String>,
    pub number: Option<String>,
}

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)\]>,]+").expect("valid regex"));

static PATENT_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:US|EP|WO|GB) ?[\d,/]{5,}(?: ?[ABC]\d?)?\b").expect("valid regex")
});

static EMPLOYMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(?\b(full[- ]?time|part[- ]?time|contract(?:or)?|freelance|intern(?:ship)?)\b\)?")
        .expect("valid regex")
});

static EMPTY_PARENS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*[,;|]?\s*\)|\[\s*\]").expect("valid regex"));

const TITLE_SEPARATORS: [&str; 7] = [" at ", " @ ", " | ", " — ", " – ", " - ", ", "];
const TAGLINE_SEPARATORS: [&str; 5] = [" — ", " – ", " - ", ": ", " | "];

fn employment_kind(marker: &str) -> EmploymentKind {
    let marker = marker.to_ascii_lowercase();
    if marker.starts_with("full") {
        EmploymentKind::FullTime
    } else if marker.starts_with("part") {
        EmploymentKind::PartTime
    } else if marker.starts_with("intern") {
        EmploymentKind::Internship
    } else {
        EmploymentKind::Contract
    }
}

fn remove_span(text: &str, span: std::ops::Range<usize>) -> String {
    format!("{} {}", &text[..span.start], &text[span.end..])
}

/// Trim whitespace and dangling separators left behind by removed markers.
fn tidy(text: &str) -> String {
    let mut text = EMPTY_PARENS_RE.replace_all(text, " ").into_owned();
    text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    text.trim_matches(|c: char| c.is_whitespace() || ",;|–—-:()[]".contains(c))
        .to_string()
}

fn split_once_any<'a>(text: &'a str, separators: &[&str]) -> Option<(&'a str, &'a str)> {
    separators
        .iter()
        .filter_map(|sep| text.find(sep).map(|pos| (pos, sep.len())))
        .min_by_key(|&(pos, _)| pos)
        .map(|(pos, len)| (&text[..pos], &text[pos + len..]))
}

/// Parse a header line for an entry of `category`.
pub(crate) fn parse_header(line: &str, category: Category) -> Header {
    let mut header = Header::default();
    let mut rest = line.trim().to_string();

    // URLs and patent numbers go first so their digits are not read as dates.
    if let Some(m) = URL_RE.find(&rest) {
        header.url = Some(m.as_str().to_string());
        rest = remove_span(&rest, m.range());
    }

    if category == Category::Patent {
        if let Some(m) = PATENT_NUMBER_RE.find(&rest) {
            header.number = Some(m.as_str().trim().to_string());
            rest = remove_span(&rest, m.range());
        }
    }

    if let Some((range, span)) = find_range(&rest) {
        header.dates = Some(range);
        rest = remove_span(&rest, span);
    } else if let Some((date, span)) = find_date(&rest) {
        header.dates = Some(DateRange::point(date));
        rest = remove_span(&rest, span);
    }

    if category == Category::Experience {
        if let Some(caps) = EMPLOYMENT_RE.captures(&rest) {
            if let (Some(whole), Some(marker)) = (caps.get(0), caps.get(1)) {
                header.employment = employment_kind(marker.as_str());
                rest = remove_span(&rest, whole.range());
            }
        }
    }

    let rest = tidy(&rest);
    let separators: &[&str] = match category {
        Category::Experience | Category::Certification => &TITLE_SEPARATORS,
        _ => &TAGLINE_SEPARATORS,
    };
    match split_once_any(&rest, separators) {
        Some((title, secondary)) if !tidy(title).is_empty() => {
            header.title = tidy(title);
            let secondary = tidy(secondary);
            header.secondary = (!secondary.is_empty()).then_some(secondary);
        }
        _ => header.title = rest,
    }

    header
}

/// Tags from a `Tags:` / `Technologies:` / `Skills:` line.
pub(crate) fn parse_tags(line: &str) -> Option<Vec<String>> {
    static TAGS_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^\s*(?:tags|technologies|tech stack|stack|skills)\s*:\s*(.+)$")
            .expect("valid regex")
    });
    let caps = TAGS_RE.captures(line)?;
    let tags: Vec<String> = caps[1]
        .split([',', ';', '|'])
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (!tags.is_empty()).then_some(tags)
}

/// First patent number anywhere in `text`.
pub(crate) fn find_patent_number(text: &str) -> Option<String> {
    PATENT_NUMBER_RE
        .find(text)
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ym(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    #[test]
    fn experience_header_with_org_dates_and_kind() {
        let h = parse_header(
            "Senior Software Engineer at Acme Corp (Full-time), Jan 2019 – Present",
            Category::Experience,
        );
        assert_eq!(h.title, "Senior Software Engineer");
        assert_eq!(h.secondary.as_deref(), Some("Acme Corp"));
        assert_eq!(h.employment, EmploymentKind::FullTime);
        assert_eq!(h.dates, Some(DateRange::new(ym(2019, 1), None)));
    }

    #[test]
    fn pipe_separated_header() {
        let h = parse_header("Data Engineer | Globex | 2016 - 2018", Category::Experience);
        assert_eq!(h.title, "Data Engineer");
        assert_eq!(h.secondary.as_deref(), Some("Globex"));
        assert_eq!(h.dates, Some(DateRange::new(ym(2016, 1), Some(ym(2018, 1)))));
    }

    #[test]
    fn project_header_with_url_and_tagline() {
        let h = parse_header(
            "careerkb — staged knowledge base https://github.com/jane/careerkb (2023)",
            Category::Project,
        );
        assert_eq!(h.title, "careerkb");
        assert_eq!(h.secondary.as_deref(), Some("staged knowledge base"));
        assert_eq!(h.url.as_deref(), Some("https://github.com/jane/careerkb"));
        assert_eq!(h.dates, Some(DateRange::point(ym(2023, 1))));
    }

    #[test]
    fn patent_header_with_number() {
        let h = parse_header(
            "Method for streaming dedup (US 9,876,543 B2), 2019",
            Category::Patent,
        );
        assert_eq!(h.title, "Method for streaming dedup");
        assert_eq!(h.number.as_deref(), Some("US 9,876,543 B2"));
        assert_eq!(h.dates, Some(DateRange::point(ym(2019, 1))));
    }

    #[test]
    fn certification_header_with_issuer() {
        let h = parse_header("AWS Solutions Architect, Amazon, May 2021", Category::Certification);
        assert_eq!(h.title, "AWS Solutions Architect");
        assert_eq!(h.secondary.as_deref(), Some("Amazon"));
        assert_eq!(h.dates, Some(DateRange::point(ym(2021, 5))));
    }

    #[test]
    fn tags_lines() {
        assert_eq!(
            parse_tags("Technologies: Rust, Tokio; SQLite"),
            Some(vec!["Rust".into(), "Tokio".into(), "SQLite".into()])
        );
        assert_eq!(parse_tags("Built things with Rust"), None);
    }
}
