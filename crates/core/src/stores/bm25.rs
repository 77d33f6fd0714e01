//! In-process Okapi BM25 index over chunk text.
//!
//! Postings are keyed by an internal slot number; each slot remembers its
//! chunk id, owning document, insertion sequence and distinct terms so that
//! document filters apply before scoring, ties resolve in insertion order and
//! removal only touches the chunk's own postings. Freed slots are reused.

use crate::models::SearchFilters;
use crate::traits::KeywordHit;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "what", "will", "with",
    ]
    .into_iter()
    .collect()
});

/// Lowercases, splits on non-alphanumeric characters, and drops stop words
/// and single-character tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 1 && !STOP_WORDS.contains(*token))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    slot: usize,
    term_frequency: u32,
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk_id: String,
    document_id: String,
    sequence: u64,
    length: u32,
    terms: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Bm25Index {
    postings: HashMap<String, Vec<Posting>>,
    slots: Vec<Option<IndexedChunk>>,
    free_slots: Vec<usize>,
    by_chunk: HashMap<String, usize>,
    total_length: u64,
    next_sequence: u64,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chunk.is_empty()
    }

    /// Indexes `text` under `chunk_id`, replacing an earlier entry for the same id.
    pub fn insert(&mut self, chunk_id: &str, document_id: &str, text: &str) {
        self.remove(chunk_id);

        let tokens = tokenize(text);
        let slot = self.free_slots.pop().unwrap_or(self.slots.len());
        let mut frequencies: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token.as_str()).or_insert(0) += 1;
        }
        let mut terms = Vec::with_capacity(frequencies.len());
        for (term, term_frequency) in frequencies {
            self.postings
                .entry(term.to_string())
                .or_default()
                .push(Posting {
                    slot,
                    term_frequency,
                });
            terms.push(term.to_string());
        }

        let length = tokens.len() as u32;
        self.total_length += u64::from(length);
        let entry = Some(IndexedChunk {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            sequence: self.next_sequence,
            length,
            terms,
        });
        if slot == self.slots.len() {
            self.slots.push(entry);
        } else {
            self.slots[slot] = entry;
        }
        self.next_sequence += 1;
        self.by_chunk.insert(chunk_id.to_string(), slot);
    }

    pub fn remove(&mut self, chunk_id: &str) -> bool {
        let Some(slot) = self.by_chunk.remove(chunk_id) else {
            return false;
        };
        let Some(entry) = self.slots.get_mut(slot).and_then(Option::take) else {
            return false;
        };
        self.total_length -= u64::from(entry.length);
        for term in &entry.terms {
            if let Some(postings) = self.postings.get_mut(term) {
                postings.retain(|posting| posting.slot != slot);
                if postings.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        self.free_slots.push(slot);
        true
    }

    fn average_length(&self) -> f64 {
        if self.by_chunk.is_empty() {
            return 0.0;
        }
        self.total_length as f64 / self.by_chunk.len() as f64
    }

    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilters>,
    ) -> Vec<KeywordHit> {
        let mut terms = tokenize(query);
        let mut seen = HashSet::new();
        terms.retain(|term| seen.insert(term.clone()));

        if terms.is_empty() || self.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let total = self.by_chunk.len() as f64;
        let average_length = self.average_length().max(f64::EPSILON);
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = ((total - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings {
                let Some(entry) = self.slots[posting.slot].as_ref() else {
                    continue;
                };
                if filter.is_some_and(|filter| !filter.allows(&entry.document_id)) {
                    continue;
                }
                let tf = f64::from(posting.term_frequency);
                let length_norm =
                    1.0 - BM25_B + BM25_B * f64::from(entry.length) / average_length;
                let score = idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * length_norm);
                *scores.entry(posting.slot).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(&IndexedChunk, f64)> = scores
            .into_iter()
            .filter_map(|(slot, score)| self.slots[slot].as_ref().map(|entry| (entry, score)))
            .collect();
        ranked.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| left.0.sequence.cmp(&right.0.sequence))
        });
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(entry, score)| KeywordHit {
                chunk_id: entry.chunk_id.clone(),
                score,
            })
            .collect()
    }
}
