//! Canonical text normalisation and fuzzy-overlap matching (GLOSSARY: *normalised*).
//!
//! Grounded on `original_source/utils/text_normalizer.py`, extended per spec
//! §4.3/§GLOSSARY with feat/featuring parenthetical stripping and optional
//! stopword dropping for fuzzy comparisons.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref FEAT_PAREN_RE: Regex =
        Regex::new(r"(?i)[\(\[]\s*(feat\.?|featuring)\b[^\)\]]*[\)\]]").unwrap();
    static ref NON_WORD_RE: Regex = Regex::new(r"[^\w\s'-]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "in", "on", "to", "feat", "featuring", "with",
];

/// Normalises text per the canonical pipeline: NFC, lowercase, smart-quote and
/// dash folding, feat/featuring parenthetical stripping, punctuation removal
/// (keeping apostrophes and hyphens), whitespace collapse.
pub fn normalise(input: &str) -> String {
    let nfc: String = input.nfc().collect();
    let lower = nfc.to_lowercase();

    let folded: String = lower
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect();

    let without_feat = FEAT_PAREN_RE.replace_all(&folded, "");
    let stripped = NON_WORD_RE.replace_all(&without_feat, " ");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Normalises and additionally drops stopwords, for fuzzy-overlap scoring.
fn normalise_words(input: &str) -> HashSet<String> {
    normalise(input)
        .split_whitespace()
        .filter(|w| !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Word-level Jaccard overlap between two strings, per spec §4.3's literal
/// instruction (the reference implementation actually overlaps at the
/// character level; the spec text is authoritative here — see DESIGN.md).
///
/// Abstains (returns 0.0) when either side's usable word set is empty, to
/// avoid spurious matches on symbol-only titles, unless both inputs are one
/// or two characters long (short titles are still compared directly).
pub fn fuzzy_word_overlap(a: &str, b: &str) -> f64 {
    let na = normalise(a);
    let nb = normalise(b);

    if na.len() <= 2 || nb.len() <= 2 {
        return if na == nb && !na.is_empty() { 1.0 } else { 0.0 };
    }

    let wa = normalise_words(a);
    let wb = normalise_words(b);

    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }

    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// True when `fuzzy_word_overlap(a, b) >= threshold`.
pub fn is_fuzzy_match(a: &str, b: &str, threshold: f64) -> bool {
    fuzzy_word_overlap(a, b) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_is_idempotent() {
        let s = "The Quick-Brown “Fox” feat. Someone Else";
        assert_eq!(normalise(&normalise(s)), normalise(s));
    }

    #[test]
    fn smart_quotes_and_dashes_fold() {
        assert_eq!(normalise("Rock \u{2013} Roll"), "rock - roll");
        assert_eq!(normalise("Don\u{2019}t Stop"), "don't stop");
    }

    #[test]
    fn feat_parenthetical_is_stripped() {
        assert_eq!(normalise("Song Title (feat. Someone)"), "song title");
        assert_eq!(normalise("Song Title [Featuring Other Artist]"), "song title");
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(normalise("  lots   of    space "), "lots of space");
    }

    #[test]
    fn fuzzy_overlap_exact_match_is_one() {
        assert_eq!(fuzzy_word_overlap("Deconstructed", "Deconstructed"), 1.0);
    }

    #[test]
    fn fuzzy_overlap_distinguishes_different_artists() {
        // word-level overlap between "Emmure" and "emmurée" shares no tokens
        assert_eq!(fuzzy_word_overlap("Emmure", "emmurée"), 0.0);
    }

    #[test]
    fn fuzzy_overlap_partial_title() {
        let score = fuzzy_word_overlap("Deconstructed Live Version", "Deconstructed");
        assert!(score > 0.0 && score < 1.0);
    }
}
