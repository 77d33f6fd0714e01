use crate::error::SearchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of candidates requested from each index per requested result.
pub const CANDIDATE_MULTIPLIER: usize = 2;
/// Width, in characters, of the snippet window built around the first highlight.
pub const SNIPPET_WINDOW_CHARS: usize = 200;
/// Confidence added when a chunk contains obligation language.
pub const OBLIGATION_CONFIDENCE_BOOST: f64 = 0.15;
/// Query tokens must be longer than this to become highlights.
pub const MIN_HIGHLIGHT_TOKEN_CHARS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_hash: String,
    pub pages_count: usize,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub document_id: String,
    pub page_number: u32,
    pub section: Option<String>,
    pub text: String,
}

/// A contiguous character span of one page, the unit of indexing and citation.
///
/// `char_start..char_end` are character (not byte) offsets into the page text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub filename: String,
    pub page_number: u32,
    pub section: Option<String>,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vector {
    pub chunk_id: String,
    pub dim: usize,
    pub values: Vec<f32>,
}

impl Vector {
    pub fn new(chunk_id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            dim: values.len(),
            values,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SearchFilters {
    pub document_ids: BTreeSet<String>,
}

impl SearchFilters {
    pub fn for_documents<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            document_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty allow-list behaves like no filter at all.
    pub fn is_active(&self) -> bool {
        !self.document_ids.is_empty()
    }

    pub fn allows(&self, document_id: &str) -> bool {
        !self.is_active() || self.document_ids.contains(document_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    pub alpha: f64,
    pub filters: Option<SearchFilters>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize, alpha: f64) -> Self {
        Self {
            text: text.into(),
            top_k,
            alpha,
            filters: None,
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.text.trim().is_empty() {
            return Err(SearchError::InputValidation("query is empty".to_string()));
        }
        if self.top_k == 0 {
            return Err(SearchError::InputValidation(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(SearchError::InputValidation(format!(
                "alpha must lie in [0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }

    pub fn document_filter(&self) -> Option<&SearchFilters> {
        self.filters.as_ref().filter(|filters| filters.is_active())
    }
}

/// A chunk with its raw scores from both indices, alive only during a merge.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub chunk: Chunk,
    pub keyword_score: f64,
    pub vector_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub keyword: f64,
    pub vector: f64,
    pub hybrid: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub page_number: u32,
    pub section: Option<String>,
    pub snippet: String,
    pub highlights: Vec<String>,
    pub scores: ScoreBreakdown,
    pub confidence: f64,
}

/// An exact quote from one chunk; offsets are relative to the chunk text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub page_number: u32,
    pub section: Option<String>,
    pub quote: String,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingConfig {
    pub candidate_multiplier: usize,
    pub snippet_window: usize,
    pub obligation_boost: f64,
    pub min_highlight_len: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: CANDIDATE_MULTIPLIER,
            snippet_window: SNIPPET_WINDOW_CHARS,
            obligation_boost: OBLIGATION_CONFIDENCE_BOOST,
            min_highlight_len: MIN_HIGHLIGHT_TOKEN_CHARS,
        }
    }
}
