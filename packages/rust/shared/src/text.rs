//! Text folding used for content comparison.

/// Lowercase, replace every non-alphanumeric run with one space, and trim.
///
/// "Software Engineer (AI/ML)" and "software engineer [ai/ml]" fold to the
/// same string.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }

    out
}

/// Fold an optional field, treating `None` as empty.
pub fn fold_opt(text: Option<&str>) -> String {
    text.map(fold).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_ignores_case_and_punctuation() {
        assert_eq!(fold("Software Engineer (AI/ML)"), "software engineer ai ml");
        assert_eq!(fold("software   engineer [ai/ml]"), "software engineer ai ml");
        assert_eq!(fold("  --  "), "");
        assert_eq!(fold("Ünïcode Straße"), "ünïcode straße");
    }

    #[test]
    fn fold_opt_handles_none() {
        assert_eq!(fold_opt(None), "");
        assert_eq!(fold_opt(Some("Acme, Inc.")), "acme inc");
    }
}
