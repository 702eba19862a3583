//! Text similarity: Sørensen–Dice over per-word character bigrams.

use std::collections::BTreeMap;

use careerkb_shared::fold;

/// Multiset of character bigrams of the folded text. Bigrams never span a
/// word boundary; a one-letter word counts as a bigram with a space.
fn bigrams(folded: &str) -> BTreeMap<(char, char), usize> {
    let mut counts = BTreeMap::new();
    for word in folded.split(' ').filter(|w| !w.is_empty()) {
        let chars: Vec<char> = word.chars().collect();
        if let [only] = chars.as_slice() {
            *counts.entry((*only, ' ')).or_insert(0) += 1;
            continue;
        }
        for pair in chars.windows(2) {
            *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
        }
    }
    counts
}

/// Similarity of two strings in `[0, 1]`. Symmetric; two empty strings are
/// identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (bigrams(&fold(a)), bigrams(&fold(b)));
    let total: usize = a.values().sum::<usize>() + b.values().sum::<usize>();
    if total == 0 {
        return 1.0;
    }
    let shared: usize = a
        .iter()
        .map(|(gram, n)| (*n).min(b.get(gram).copied().unwrap_or(0)))
        .sum();
    (2 * shared) as f64 / total as f64
}
