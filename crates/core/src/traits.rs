use crate::models::{Chunk, Document, Page, SearchFilters};
use crate::SearchError;
use async_trait::async_trait;

/// A lexical hit: chunk id plus a "higher is better" relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub chunk_id: String,
    pub score: f64,
}

/// A semantic hit: chunk id plus cosine similarity to the query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub similarity: f64,
}

#[async_trait]
pub trait KeywordIndex {
    /// Ranked lexical search. `filter` restricts candidates before ranking.
    async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<KeywordHit>, SearchError>;
}

#[async_trait]
pub trait VectorIndex {
    /// Stores `vector` for `chunk_id`, replacing any previous vector.
    async fn upsert_vector(&self, chunk_id: &str, vector: Vec<f32>) -> Result<(), SearchError>;

    async fn remove_vectors(&self, chunk_ids: &[String]) -> Result<usize, SearchError>;

    async fn query_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, SearchError>;
}

/// Canonical row store for documents, pages and chunks.
#[async_trait]
pub trait ChunkStore {
    /// Inserts a document with its pages and chunks as one unit.
    async fn insert_document(
        &self,
        document: Document,
        pages: Vec<Page>,
        chunks: Vec<Chunk>,
    ) -> Result<(), SearchError>;

    async fn find_by_file_hash(&self, file_hash: &str) -> Result<Option<Document>, SearchError>;

    /// Point lookup; unknown ids are simply absent from the output.
    async fn chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>, SearchError>;

    /// Removes the document, its pages and chunks; returns the removed chunk ids.
    async fn delete_document(&self, document_id: &str) -> Result<Vec<String>, SearchError>;
}
