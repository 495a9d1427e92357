//! Token-order-insensitive string similarity.
//!
//! Scores are on a 0..=100 scale. Both inputs are lower-cased and every
//! non-alphanumeric character becomes a separator before tokenizing, so
//! punctuation and casing differences between a query and a gazetteer row
//! do not cost score.

use std::collections::BTreeSet;

/// Token-set similarity between two strings (0..=100).
///
/// The intersection of the two token sets is compared against each side's
/// remainder; the best of the three pairwise ratios wins. When one token set
/// contains the other the score is 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).map(String::as_str).collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).map(String::as_str).collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).map(String::as_str).collect();

    if !intersection.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let sect = intersection.join(" ");
    let diff_a = only_a.join(" ");
    let diff_b = only_b.join(" ");

    let mut best = ratio(&diff_a, &diff_b);
    if !sect.is_empty() {
        let combined_a = format!("{sect} {diff_a}");
        let combined_b = format!("{sect} {diff_b}");
        best = best
            .max(ratio(&sect, &combined_a))
            .max(ratio(&sect, &combined_b));
    }
    best
}

/// Normalized indel similarity between two strings (0..=100).
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let lcs = longest_common_subsequence(&a, &b);
    200.0 * lcs as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
