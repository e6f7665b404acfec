use crate::models::{RawCandidate, ScoredCandidate, SearchQuery};
use log::debug;
use regex::Regex;

/// Relative weights of the title and author similarity signals. Tunable:
/// only the resulting ordering is contractual, not the constants.
const TITLE_WEIGHT: f64 = 0.7;
const AUTHOR_WEIGHT: f64 = 0.3;

/// Filter, score, and order candidates against the query.
///
/// Blacklisted titles are dropped before scoring, so they never occupy a
/// ranked slot even when they would match perfectly. The sort is stable:
/// equal scores keep their original parse order, which keeps output
/// deterministic across identical inputs.
pub fn rank(
    query: &SearchQuery,
    candidates: Vec<RawCandidate>,
    title_blacklist: &[String],
    max_results: usize,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .filter(|candidate| {
            if let Some(term) = blacklisted_term(&candidate.title, title_blacklist) {
                debug!(
                    "Dropping '{}': title contains blacklisted term '{}'",
                    candidate.title, term
                );
                false
            } else {
                true
            }
        })
        .map(|candidate| {
            let score = score(query, &candidate);
            ScoredCandidate { candidate, score }
        })
        .collect();

    // Vec::sort_by is stable, so equal scores fall back to parse order.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(max_results);
    scored
}

/// The first blacklist term the title contains (case-insensitive
/// substring), if any.
pub fn blacklisted_term<'a>(title: &str, blacklist: &'a [String]) -> Option<&'a str> {
    let lowered = title.to_lowercase();
    blacklist
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .find(|term| lowered.contains(&term.to_lowercase()))
}

/// Weighted similarity of a candidate against the query, in [0, 1].
/// A pure function of its inputs; the metric itself is an implementation
/// choice hidden behind this signature.
pub fn score(query: &SearchQuery, candidate: &RawCandidate) -> f64 {
    let title_sim = query
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(|t| text_similarity(t, &candidate.title));

    // A candidate with no author listed gives no evidence either way, so
    // fall back to the title signal alone rather than penalizing it.
    let author_sim = if query.authors.is_empty() || candidate.author.trim().is_empty() {
        None
    } else {
        Some(text_similarity(&query.authors.join(" "), &candidate.author))
    };

    match (title_sim, author_sim) {
        (Some(t), Some(a)) => TITLE_WEIGHT * t + AUTHOR_WEIGHT * a,
        (Some(t), None) => t,
        (None, Some(a)) => a,
        (None, None) => 0.0,
    }
}

/// Normalized text similarity, case- and whitespace-insensitive, tolerant
/// of subtitle and series-suffix differences: both sides are also compared
/// with trailing parentheticals and colon-delimited annotations stripped,
/// and the best pairing wins.
fn text_similarity(a: &str, b: &str) -> f64 {
    let a_variants = comparison_variants(a);
    let b_variants = comparison_variants(b);

    let mut best: f64 = 0.0;
    for av in &a_variants {
        for bv in &b_variants {
            best = best.max(base_similarity(av, bv));
        }
    }
    best
}

fn base_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b).max(token_overlap(a, b))
}

/// Jaccard overlap of whitespace tokens. Catches reordered names
/// ("Herbert, Frank" vs "Frank Herbert") that edit distance punishes.
fn token_overlap(a: &str, b: &str) -> f64 {
    let a_tokens: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let b_tokens: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let intersection = a_tokens.intersection(&b_tokens).count();
    let union = a_tokens.union(&b_tokens).count();
    intersection as f64 / union as f64
}

fn comparison_variants(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let stripped = strip_annotations(&normalized);
    if stripped != normalized && !stripped.is_empty() {
        vec![normalized, stripped]
    } else {
        vec![normalized]
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(|c: char| c == ',' || c == '.', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop a colon-delimited subtitle and any trailing parenthetical, e.g.
/// "dune: deluxe edition" -> "dune", "dune (dune saga book 1)" -> "dune".
fn strip_annotations(text: &str) -> String {
    let before_colon = text.split(':').next().unwrap_or(text);
    let re = Regex::new(r"\s*\([^)]*\)\s*$").unwrap();
    re.replace(before_colon, "").trim().to_string()
}
