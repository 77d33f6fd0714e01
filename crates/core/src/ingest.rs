use crate::chunking::{build_chunks, sha256_hex, ChunkingConfig};
use crate::embeddings::{embed_in_batches, Embedder, DEFAULT_EMBEDDING_BATCH_SIZE};
use crate::extractor::{PageExtractor, PageText, PlainTextExtractor};
use crate::models::{Chunk, Document, Page};
use crate::retry::RetryPolicy;
use crate::traits::{ChunkStore, VectorIndex};
use crate::{IngestError, SearchError};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const DEFAULT_MAX_PAGES: usize = 3_000;

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunking: ChunkingConfig,
    pub embedding_batch_size: usize,
    pub max_pages: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// Extracted content of one source file, ready for chunking.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub filename: String,
    pub file_hash: String,
    pub pages: Vec<PageText>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingFailure {
    pub page_number: u32,
    pub chunk_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub document: Document,
    /// The content hash matched an existing document; nothing was written.
    pub duplicate: bool,
    pub chunk_count: usize,
    pub embedded_count: usize,
    pub failures: Vec<EmbeddingFailure>,
}

impl IngestionReport {
    pub fn is_fully_embedded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sequential per-document pipeline: dedupe, chunk, store, embed.
///
/// Different documents may be ingested concurrently through a shared
/// `Ingestor`; the store and vector index serialize their own writes.
pub struct Ingestor<S, V, E>
where
    S: ChunkStore,
    V: VectorIndex,
    E: Embedder + ?Sized,
{
    store: Arc<S>,
    vectors: Arc<V>,
    embedder: Arc<E>,
    retry: RetryPolicy,
    options: IngestionOptions,
}

impl<S, V, E> Ingestor<S, V, E>
where
    S: ChunkStore + Send + Sync,
    V: VectorIndex + Send + Sync,
    E: Embedder + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        vectors: Arc<V>,
        embedder: Arc<E>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            retry: RetryPolicy::default(),
            options,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn ingest(&self, mut source: DocumentSource) -> Result<IngestionReport, IngestError> {
        if let Some(existing) = self.store.find_by_file_hash(&source.file_hash).await? {
            return Ok(duplicate_report(existing, &source.filename));
        }

        if source.pages.len() > self.options.max_pages {
            warn!(
                filename = %source.filename,
                pages = source.pages.len(),
                max_pages = self.options.max_pages,
                "page limit reached, ignoring trailing pages"
            );
            source.pages.truncate(self.options.max_pages);
        }

        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            filename: source.filename.clone(),
            file_hash: source.file_hash.clone(),
            pages_count: source.pages.len(),
            uploaded_at: Utc::now(),
        };

        let mut pages = Vec::with_capacity(source.pages.len());
        let mut chunks_by_page: Vec<(u32, Vec<Chunk>)> = Vec::with_capacity(source.pages.len());
        for page in source.pages {
            let chunks = build_chunks(
                &document.id,
                &document.filename,
                page.number,
                page.section.as_deref(),
                &page.text,
                self.options.chunking,
            );
            chunks_by_page.push((page.number, chunks));
            pages.push(Page {
                document_id: document.id.clone(),
                page_number: page.number,
                section: page.section,
                text: page.text,
            });
        }

        let all_chunks: Vec<Chunk> = chunks_by_page
            .iter()
            .flat_map(|(_, chunks)| chunks.iter().cloned())
            .collect();
        let chunk_count = all_chunks.len();
        // A concurrent ingest of the same content can win between the lookup
        // above and this insert; the store rejects the loser atomically.
        match self
            .store
            .insert_document(document.clone(), pages, all_chunks)
            .await
        {
            Ok(()) => {}
            Err(SearchError::DuplicateContent { file_hash, .. }) => {
                let existing = self
                    .store
                    .find_by_file_hash(&file_hash)
                    .await?
                    .ok_or_else(|| SearchError::not_found("document", file_hash))?;
                return Ok(duplicate_report(existing, &document.filename));
            }
            Err(error) => return Err(error.into()),
        }

        let mut embedded_count = 0;
        let mut failures = Vec::new();
        for (page_number, chunks) in &chunks_by_page {
            match self.embed_page(chunks).await {
                Ok(count) => embedded_count += count,
                Err(reason) => {
                    warn!(
                        document_id = %document.id,
                        page_number,
                        %reason,
                        "page left without vectors"
                    );
                    failures.push(EmbeddingFailure {
                        page_number: *page_number,
                        chunk_ids: chunks.iter().map(|chunk| chunk.id.clone()).collect(),
                        reason,
                    });
                }
            }
        }

        info!(
            document_id = %document.id,
            filename = %document.filename,
            pages = document.pages_count,
            chunk_count,
            embedded_count,
            failed_pages = failures.len(),
            "document ingested"
        );

        Ok(IngestionReport {
            document,
            duplicate: false,
            chunk_count,
            embedded_count,
            failures,
        })
    }

    async fn embed_page(&self, chunks: &[Chunk]) -> Result<usize, String> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &self.retry,
            &texts,
            self.options.embedding_batch_size,
        )
        .await
        .map_err(|error| error.to_string())?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            self.vectors
                .upsert_vector(&chunk.id, vector)
                .await
                .map_err(|error| error.to_string())?;
        }
        Ok(chunks.len())
    }

    /// Cascades the delete from the store to the vector index.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize, IngestError> {
        let removed = self.store.delete_document(document_id).await?;
        let dropped = self.vectors.remove_vectors(&removed).await?;
        if dropped != removed.len() {
            warn!(
                document_id,
                chunks = removed.len(),
                vectors = dropped,
                "document had chunks without vectors"
            );
        }
        Ok(removed.len())
    }

    pub async fn ingest_file<X>(
        &self,
        extractor: &X,
        path: &Path,
    ) -> Result<IngestionReport, IngestError>
    where
        X: PageExtractor + ?Sized,
    {
        let source = load_document_source(extractor, path)?;
        self.ingest(source).await
    }

    /// Ingests every supported file under `folder`; files that fail are
    /// reported instead of aborting the run.
    pub async fn ingest_folder<X>(
        &self,
        extractor: &X,
        folder: &Path,
    ) -> Result<FolderReport, IngestError>
    where
        X: PageExtractor + ?Sized,
    {
        let files = discover_files(folder, extractor.extensions());
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no supported files found in {}",
                folder.display()
            )));
        }

        let mut report = FolderReport::default();
        for path in files {
            match self.ingest_file(extractor, &path).await {
                Ok(ingested) => report.documents.push(ingested),
                Err(error) => report.skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                }),
            }
        }
        Ok(report)
    }
}

fn duplicate_report(existing: Document, filename: &str) -> IngestionReport {
    info!(
        document_id = %existing.id,
        filename,
        "duplicate content hash, skipping ingestion"
    );
    IngestionReport {
        document: existing,
        duplicate: true,
        chunk_count: 0,
        embedded_count: 0,
        failures: Vec::new(),
    }
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Default)]
pub struct FolderReport {
    pub documents: Vec<IngestionReport>,
    pub skipped_files: Vec<SkippedFile>,
}

pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, PlainTextExtractor::EXTENSIONS)
}

pub fn discover_files(folder: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    Ok(sha256_hex(&fs::read(path)?))
}

pub fn load_document_source<X>(extractor: &X, path: &Path) -> Result<DocumentSource, IngestError>
where
    X: PageExtractor + ?Sized,
{
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(DocumentSource {
        filename: filename.to_string(),
        file_hash: digest_file(path)?,
        pages: extractor.extract_pages(path)?,
    })
}
