use crate::models::Vector;
use crate::traits::{VectorHit, VectorIndex};
use crate::SearchError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const COSINE_EPSILON: f64 = 1e-8;

/// `dot(a, b) / (|a| * |b| + 1e-8)`; null vectors score 0.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let (dot, left_sq, right_sq) = left.iter().zip(right).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(dot, left_sq, right_sq), (a, b)| {
            let (a, b) = (f64::from(*a), f64::from(*b));
            (dot + a * b, left_sq + a * a, right_sq + b * b)
        },
    );
    dot / (left_sq.sqrt() * right_sq.sqrt() + COSINE_EPSILON)
}

/// Brute-force cosine index owned by whoever constructs it.
///
/// Vectors live in an ordered map so scans, ties and snapshots are
/// deterministic. All vectors share the dimensionality of the first one
/// stored.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    vectors: RwLock<BTreeMap<String, Vector>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, SearchError> {
        let stored: Vec<Vector> = serde_json::from_slice(&fs::read(path)?)?;
        let index = Self::new();
        {
            let mut vectors = index.vectors.write();
            for vector in stored {
                vectors.insert(vector.chunk_id.clone(), vector);
            }
        }
        Ok(index)
    }

    pub fn open(path: &Path) -> Result<Self, SearchError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SearchError> {
        let stored: Vec<Vector> = self.vectors.read().values().cloned().collect();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.vectors.read().contains_key(chunk_id)
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.vectors.read().values().next().map(|vector| vector.dim)
    }

    pub fn upsert(&self, chunk_id: &str, values: Vec<f32>) -> Result<(), SearchError> {
        if values.is_empty() {
            return Err(SearchError::InputValidation(format!(
                "empty vector for chunk {chunk_id}"
            )));
        }

        let mut vectors = self.vectors.write();
        let expected = vectors
            .values()
            .find(|vector| vector.chunk_id != chunk_id)
            .map(|vector| vector.dim);
        if let Some(expected) = expected.filter(|expected| *expected != values.len()) {
            return Err(SearchError::InputValidation(format!(
                "vector for chunk {chunk_id} has {} dimensions, index holds {expected}",
                values.len()
            )));
        }
        vectors.insert(chunk_id.to_string(), Vector::new(chunk_id, values));
        Ok(())
    }

    /// Upserts every pair, stopping at the first rejected vector.
    pub fn upsert_batch<I>(&self, entries: I) -> Result<usize, SearchError>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut stored = 0;
        for (chunk_id, values) in entries {
            self.upsert(&chunk_id, values)?;
            stored += 1;
        }
        Ok(stored)
    }

    pub fn remove(&self, chunk_ids: &[String]) -> usize {
        let mut vectors = self.vectors.write();
        chunk_ids
            .iter()
            .filter(|chunk_id| vectors.remove(chunk_id.as_str()).is_some())
            .count()
    }

    /// Top `top_k` by similarity; equal similarities order by chunk id.
    pub fn query(&self, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>, SearchError> {
        let vectors = self.vectors.read();
        if let Some(dim) = vectors.values().next().map(|vector| vector.dim) {
            if dim != query.len() {
                return Err(SearchError::InputValidation(format!(
                    "query vector has {} dimensions, index holds {dim}",
                    query.len()
                )));
            }
        }

        let mut hits: Vec<VectorHit> = vectors
            .values()
            .map(|vector| VectorHit {
                chunk_id: vector.chunk_id.clone(),
                similarity: cosine_similarity(&vector.values, query),
            })
            .collect();
        drop(vectors);

        hits.sort_by(|left, right| {
            right
                .similarity
                .total_cmp(&left.similarity)
                .then_with(|| left.chunk_id.cmp(&right.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert_vector(&self, chunk_id: &str, vector: Vec<f32>) -> Result<(), SearchError> {
        self.upsert(chunk_id, vector)
    }

    async fn remove_vectors(&self, chunk_ids: &[String]) -> Result<usize, SearchError> {
        Ok(self.remove(chunk_ids))
    }

    async fn query_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, SearchError> {
        self.query(vector, top_k)
    }
}
