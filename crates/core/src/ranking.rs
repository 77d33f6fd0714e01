//! Score fusion, highlighting, snippets and confidence for hybrid results.
//!
//! Everything here is a pure function of its inputs so that ranking is
//! reproducible bit for bit across calls.

use crate::chunking::char_slice;
use crate::models::{Chunk, SearchCandidate};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Spread below which a score dimension is considered flat.
pub const DEGENERATE_SPREAD: f64 = 1e-9;
/// Normalized value given to every candidate in a flat dimension.
pub const FLAT_SCORE: f64 = 0.5;

static OBLIGATION_LANGUAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(shall|must|required|contractor(?:\sresponsible)?)\b")
        .expect("obligation pattern is valid")
});

/// Min-max normalization to `[0, 1]`; a flat input maps to [`FLAT_SCORE`].
pub fn normalize_scores(values: &[f64]) -> Vec<f64> {
    let Some(min) = values.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = values.iter().copied().fold(min, f64::max);
    let spread = max - min;
    if spread < DEGENERATE_SPREAD {
        return vec![FLAT_SCORE; values.len()];
    }
    values.iter().map(|value| (value - min) / spread).collect()
}

pub fn hybrid_score(alpha: f64, keyword_norm: f64, vector_norm: f64) -> f64 {
    alpha * vector_norm + (1.0 - alpha) * keyword_norm
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub chunk: Chunk,
    pub keyword_raw: f64,
    pub vector_raw: f64,
    pub keyword_norm: f64,
    pub vector_norm: f64,
    pub hybrid: f64,
}

/// Normalizes both score dimensions independently, fuses them with `alpha`
/// and sorts by hybrid score, then keyword score, then earlier page.
///
/// The sort is stable, so candidates tied on all three keys keep their
/// input order.
pub fn score_candidates(candidates: Vec<SearchCandidate>, alpha: f64) -> Vec<ScoredCandidate> {
    let keyword_raw: Vec<f64> = candidates.iter().map(|c| c.keyword_score).collect();
    let vector_raw: Vec<f64> = candidates.iter().map(|c| c.vector_score).collect();
    let keyword_norm = normalize_scores(&keyword_raw);
    let vector_norm = normalize_scores(&vector_raw);

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .zip(keyword_norm.into_iter().zip(vector_norm))
        .map(|(candidate, (keyword_norm, vector_norm))| ScoredCandidate {
            keyword_raw: candidate.keyword_score,
            vector_raw: candidate.vector_score,
            hybrid: hybrid_score(alpha, keyword_norm, vector_norm),
            keyword_norm,
            vector_norm,
            chunk: candidate.chunk,
        })
        .collect();

    scored.sort_by(compare_ranked);
    scored
}

fn compare_ranked(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    right
        .hybrid
        .total_cmp(&left.hybrid)
        .then_with(|| right.keyword_norm.total_cmp(&left.keyword_norm))
        .then_with(|| left.chunk.page_number.cmp(&right.chunk.page_number))
}

/// Alphanumeric/underscore runs of the query, in query order.
pub fn query_terms(query: &str) -> Vec<&str> {
    query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|term| !term.is_empty())
        .collect()
}

/// Query terms longer than `min_len` that occur in `text`, ignoring case.
/// Sorted and deduplicated.
pub fn extract_highlights(query: &str, text: &str, min_len: usize) -> Vec<String> {
    let lowered = text.to_ascii_lowercase();
    query_terms(query)
        .into_iter()
        .filter(|term| term.len() > min_len)
        .filter(|term| lowered.contains(&term.to_ascii_lowercase()))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// A `window`-character excerpt centred on the earliest highlight, or the
/// head of the text when nothing matched.
pub fn build_snippet(text: &str, highlights: &[String], window: usize) -> String {
    let lowered = text.to_ascii_lowercase();
    let first_hit = highlights
        .iter()
        .filter_map(|term| lowered.find(&term.to_ascii_lowercase()))
        .min();

    let excerpt = match first_hit {
        None => char_slice(text, 0, window),
        Some(byte_offset) => {
            let center = text[..byte_offset].chars().count();
            let half = window / 2;
            char_slice(text, center.saturating_sub(half), center + half)
        }
    };
    excerpt.trim().to_string()
}

pub fn has_obligation_language(text: &str) -> bool {
    OBLIGATION_LANGUAGE.is_match(text)
}

pub fn map_confidence(hybrid: f64, text: &str, obligation_boost: f64) -> f64 {
    let base = if has_obligation_language(text) {
        (hybrid + obligation_boost).min(1.0)
    } else {
        hybrid
    };
    base.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, page_number: u32) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "doc-1".to_string(),
            filename: "spec.txt".to_string(),
            page_number,
            section: None,
            text: format!("chunk {id}"),
            char_start: 0,
            char_end: 7,
            content_hash: String::new(),
        }
    }

    fn candidate(id: &str, page: u32, keyword: f64, vector: f64) -> SearchCandidate {
        SearchCandidate {
            chunk: chunk(id, page),
            keyword_score: keyword,
            vector_score: vector,
        }
    }

    #[test]
    fn normalization_stays_in_unit_interval() {
        let normalized = normalize_scores(&[3.0, -1.0, 7.0, 0.5]);
        assert_eq!(normalized[1], 0.0);
        assert_eq!(normalized[2], 1.0);
        assert!(normalized.iter().all(|value| (0.0..=1.0).contains(value)));
    }

    #[test]
    fn flat_dimension_normalizes_to_half() {
        assert_eq!(normalize_scores(&[0.3, 0.3, 0.3]), vec![0.5, 0.5, 0.5]);
        assert_eq!(normalize_scores(&[2.0]), vec![0.5]);
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn alpha_moves_hybrid_towards_stronger_dimension() {
        let candidates = vec![
            candidate("vector-strong", 1, 0.0, 0.9),
            candidate("keyword-strong", 2, 5.0, 0.1),
        ];
        let at = |alpha: f64, id: &str| {
            score_candidates(candidates.clone(), alpha)
                .into_iter()
                .find(|scored| scored.chunk.id == id)
                .map(|scored| scored.hybrid)
                .unwrap_or(f64::NAN)
        };
        assert!(at(0.8, "vector-strong") > at(0.2, "vector-strong"));
        assert!(at(0.8, "keyword-strong") < at(0.2, "keyword-strong"));
    }

    #[test]
    fn ties_prefer_keyword_then_earlier_page() {
        // alpha = 0.5: "a" and "b" tie on hybrid, "b" has more keyword weight
        let scored = score_candidates(
            vec![
                candidate("a", 1, 0.0, 1.0),
                candidate("b", 9, 1.0, 0.0),
                candidate("c", 5, 0.0, 1.0),
            ],
            0.5,
        );
        let ids: Vec<&str> = scored.iter().map(|s| s.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn scoring_is_reproducible() {
        let input = vec![
            candidate("a", 3, 1.5, 0.2),
            candidate("b", 1, 1.5, 0.2),
            candidate("c", 2, 0.7, 0.9),
        ];
        let first = score_candidates(input.clone(), 0.4);
        let second = score_candidates(input, 0.4);
        let project = |scored: &[ScoredCandidate]| {
            scored
                .iter()
                .map(|s| (s.chunk.id.clone(), s.hybrid.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(project(&first), project(&second));
        assert_eq!(first[0].chunk.id, "b");
    }

    #[test]
    fn highlights_are_long_case_insensitive_and_sorted() {
        let highlights = extract_highlights(
            "What are the LIQUIDATED damages? damages per day",
            "Liquidated damages: $2,000 per calendar day.",
            3,
        );
        assert_eq!(highlights, vec!["LIQUIDATED".to_string(), "damages".to_string()]);
    }

    #[test]
    fn snippet_without_highlights_is_trimmed_prefix() {
        let text = format!("  {}", "x".repeat(300));
        let snippet = build_snippet(&text, &[], 200);
        assert_eq!(snippet.chars().count(), 198);
    }

    #[test]
    fn snippet_centres_on_earliest_highlight() {
        let text = format!("{}bond{}award{}", "a".repeat(150), "b".repeat(30), "c".repeat(150));
        let highlights = vec!["award".to_string(), "bond".to_string()];
        let snippet = build_snippet(&text, &highlights, 200);
        assert_eq!(snippet.chars().count(), 200);
        assert!(snippet.starts_with(&"a".repeat(100)));
        assert!(snippet[100..].starts_with("bond"));
    }

    #[test]
    fn snippet_window_clamps_to_text_bounds() {
        let text = "Bonds are required within 10 days.";
        let snippet = build_snippet(text, &["required".to_string()], 200);
        assert_eq!(snippet, text);
    }

    #[test]
    fn obligation_language_boosts_confidence() {
        assert!(has_obligation_language("Contractor shall submit shop drawings."));
        assert!(!has_obligation_language("Liquidated damages: $2,000 per calendar day."));
        assert!(!has_obligation_language("mustard gas"));

        let boosted = map_confidence(0.5, "Contractor shall submit shop drawings.", 0.15);
        assert!((boosted - 0.65).abs() < 1e-12);
        assert_eq!(map_confidence(0.95, "Payment is required.", 0.15), 1.0);
        assert_eq!(map_confidence(0.4, "No modal verbs here.", 0.15), 0.4);
    }
}
