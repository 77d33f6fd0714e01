use crate::models::{Chunk, Document, Page, SearchFilters};
use crate::stores::bm25::Bm25Index;
use crate::traits::{ChunkStore, KeywordHit, KeywordIndex};
use crate::SearchError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<String, Document>,
    pages: BTreeMap<(String, u32), Page>,
    chunks: BTreeMap<String, Chunk>,
    keyword: Bm25Index,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    documents: Vec<Document>,
    pages: Vec<Page>,
    chunks: Vec<Chunk>,
}

/// Row store for documents, pages and chunks with a synchronously maintained
/// BM25 index. Every write updates rows and postings under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, SearchError> {
        let snapshot: StoreSnapshot = serde_json::from_slice(&fs::read(path)?)?;
        let mut state = StoreState::default();
        for document in snapshot.documents {
            state.documents.insert(document.id.clone(), document);
        }
        for page in snapshot.pages {
            state
                .pages
                .insert((page.document_id.clone(), page.page_number), page);
        }
        for chunk in snapshot.chunks {
            state
                .keyword
                .insert(&chunk.id, &chunk.document_id, &chunk.text);
            state.chunks.insert(chunk.id.clone(), chunk);
        }
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Loads `path` when it exists, otherwise starts empty.
    pub fn open(path: &Path) -> Result<Self, SearchError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SearchError> {
        let snapshot = {
            let state = self.state.read();
            StoreSnapshot {
                documents: state.documents.values().cloned().collect(),
                pages: state.pages.values().cloned().collect(),
                chunks: state.chunks.values().cloned().collect(),
            }
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(&snapshot)?)?;
        Ok(())
    }

    /// Newest upload first; ties fall back to document id.
    pub fn list_documents(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.state.read().documents.values().cloned().collect();
        documents.sort_by(|left, right| {
            right
                .uploaded_at
                .cmp(&left.uploaded_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        documents
    }

    pub fn get_document(&self, document_id: &str) -> Result<Document, SearchError> {
        self.state
            .read()
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| SearchError::not_found("document", document_id))
    }

    pub fn get_page(&self, document_id: &str, page_number: u32) -> Result<Page, SearchError> {
        self.state
            .read()
            .pages
            .get(&(document_id.to_string(), page_number))
            .cloned()
            .ok_or_else(|| SearchError::not_found("page", format!("{document_id}#{page_number}")))
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Chunk, SearchError> {
        self.state
            .read()
            .chunks
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| SearchError::not_found("chunk", chunk_id))
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().chunks.len()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn insert_document(
        &self,
        document: Document,
        pages: Vec<Page>,
        chunks: Vec<Chunk>,
    ) -> Result<(), SearchError> {
        if let Some(stray) = pages
            .iter()
            .map(|page| &page.document_id)
            .chain(chunks.iter().map(|chunk| &chunk.document_id))
            .find(|owner| **owner != document.id)
        {
            return Err(SearchError::InputValidation(format!(
                "row owned by {stray} cannot be inserted under document {}",
                document.id
            )));
        }

        let mut state = self.state.write();
        if state.documents.contains_key(&document.id) {
            return Err(SearchError::InputValidation(format!(
                "document {} already exists",
                document.id
            )));
        }
        if let Some(existing) = state
            .documents
            .values()
            .find(|stored| stored.file_hash == document.file_hash)
        {
            return Err(SearchError::DuplicateContent {
                file_hash: document.file_hash.clone(),
                document_id: existing.id.clone(),
            });
        }
        if let Some(clash) = chunks.iter().find(|chunk| state.chunks.contains_key(&chunk.id)) {
            return Err(SearchError::InputValidation(format!(
                "chunk {} already exists",
                clash.id
            )));
        }

        for page in pages {
            state
                .pages
                .insert((page.document_id.clone(), page.page_number), page);
        }
        for chunk in chunks {
            state
                .keyword
                .insert(&chunk.id, &chunk.document_id, &chunk.text);
            state.chunks.insert(chunk.id.clone(), chunk);
        }
        state.documents.insert(document.id.clone(), document);
        Ok(())
    }

    async fn find_by_file_hash(&self, file_hash: &str) -> Result<Option<Document>, SearchError> {
        Ok(self
            .state
            .read()
            .documents
            .values()
            .find(|document| document.file_hash == file_hash)
            .cloned())
    }

    async fn chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<Chunk>, SearchError> {
        let state = self.state.read();
        Ok(chunk_ids
            .iter()
            .filter_map(|id| state.chunks.get(id).cloned())
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<Vec<String>, SearchError> {
        let mut state = self.state.write();
        if state.documents.remove(document_id).is_none() {
            return Err(SearchError::not_found("document", document_id));
        }

        state.pages.retain(|(owner, _), _| owner != document_id);
        let removed: Vec<String> = state
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .map(|chunk| chunk.id.clone())
            .collect();
        for chunk_id in &removed {
            state.chunks.remove(chunk_id);
            state.keyword.remove(chunk_id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl KeywordIndex for MemoryStore {
    async fn search_keyword(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<KeywordHit>, SearchError> {
        Ok(self.state.read().keyword.search(query, top_k, filter))
    }
}
