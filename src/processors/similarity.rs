//! Similarity scoring between a baseline line and a re-OCR candidate.
//!
//! The gate only ever compares scores against thresholds, so the metric just
//! has to be a stable, normalized string distance: we use the Levenshtein
//! ratio `1 - distance / max_len` over chars of the normalized texts.

use crate::processors::text::{diacritic_count, merge_skeleton, suspect_count};

/// Levenshtein edit distance over chars, two-row dynamic programming.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized similarity between two already-normalized strings.
///
/// Returns 1.0 for identical non-empty strings, 0.0 when either side is
/// empty, and `1 - levenshtein / max_chars` otherwise.
pub fn similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let max_len = ac.len().max(bc.len());
    let dist = levenshtein(&ac, &bc);
    1.0 - dist as f32 / max_len as f32
}

/// Whether candidate `b` represents a genuine diacritic/script gain over
/// baseline `a`: either a strictly higher diacritic census, or differing
/// surfaces over one shared diacritic-stripped skeleton (a diacritic or
/// confusable correction rather than an alternative spelling).
pub fn diacritic_gain(a: &str, b: &str) -> bool {
    let (a_d, b_d) = (diacritic_count(a), diacritic_count(b));
    if b_d > a_d {
        return true;
    }
    // Equal-skeleton difference only counts when something is actually being
    // corrected: diacritics in play, or suspect artifacts removed. A mere
    // case variant is an alternative spelling, not a gain.
    b_d >= a_d
        && a != b
        && (a_d + b_d > 0 || suspect_count(a) > suspect_count(b))
        && merge_skeleton(a) == merge_skeleton(b)
}
