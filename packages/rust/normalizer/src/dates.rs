//! Date and date-range detection in entry headers.
//!
//! Dates have month granularity and are stored as the first of the month.
//! A bare year maps to January of that year.

use std::ops::Range;
use std::sync::LazyLock;

use careerkb_shared::DateRange;
use chrono::NaiveDate;
use regex::Regex;

const MONTH: &str = r"(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?";

fn date_pattern() -> String {
    format!(
        r"(?:{MONTH} \d{{4}}\b|(?:0?[1-9]|1[0-2])/\d{{4}}\b|\d{{4}}-(?:0[1-9]|1[0-2])\b|(?:19|20)\d{{2}}\b)"
    )
}

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let date = date_pattern();
    Regex::new(&format!(
        r"(?i)\b({date})\s*(?:-|–|—|to|until)\s*({date}|present|current|now|today|ongoing)\b"
    ))
    .expect("valid regex")
});

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b{}", date_pattern())).expect("valid regex"));

/// Parse one matched date token into the first day of its month.
fn parse_date(token: &str) -> Option<NaiveDate> {
    static DIGITS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

    let token = token.trim().to_ascii_lowercase();
    let numbers: Vec<u32> = DIGITS_RE
        .find_iter(&token)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();

    let (year, month) = if token.starts_with(|c: char| c.is_ascii_alphabetic()) {
        const MONTHS: [&str; 12] = [
            "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
        ];
        let month = MONTHS.iter().position(|m| token.starts_with(m))? as u32 + 1;
        (*numbers.last()?, month)
    } else if token.contains('/') {
        (*numbers.get(1)?, *numbers.first()?)
    } else if token.contains('-') {
        (*numbers.first()?, *numbers.get(1)?)
    } else {
        (*numbers.first()?, 1)
    };

    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, 1)
}

/// Find the first date range in `text`, returning it with the matched span.
pub(crate) fn find_range(text: &str) -> Option<(DateRange, Range<usize>)> {
    for caps in RANGE_RE.captures_iter(text) {
        let (Some(whole), Some(start), Some(end)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let Some(start_date) = parse_date(start.as_str()) else {
            continue;
        };
        let end_date = if is_open_end(end.as_str()) {
            None
        } else {
            match parse_date(end.as_str()) {
                Some(date) => Some(date),
                None => continue,
            }
        };
        return Some((DateRange::new(start_date, end_date), whole.range()));
    }
    None
}

/// Find the first single date in `text`.
pub(crate) fn find_date(text: &str) -> Option<(NaiveDate, Range<usize>)> {
    DATE_RE
        .find_iter(text)
        .find_map(|m| parse_date(m.as_str()).map(|date| (date, m.range())))
}

fn is_open_end(token: &str) -> bool {
    matches!(
        token.to_ascii_lowercase().as_str(),
        "present" | "current" | "now" | "today" | "ongoing"
    )
}
