pub mod chunking;
pub mod citation;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod ranking;
pub mod retry;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, chunk_spans, ChunkSpan, ChunkingConfig};
pub use citation::{citation_matches, locate_quote, validate_citation, validate_citations};
pub use embeddings::{
    embed_in_batches, embed_query, Embedder, EmbeddingBackend, EmbeddingSettings, HashEmbedder,
    RemoteEmbedder, DEFAULT_EMBEDDING_BATCH_SIZE, DEFAULT_EMBEDDING_ENDPOINT,
    DEFAULT_EMBEDDING_MODEL, OFFLINE_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IngestError, SearchError};
pub use extractor::{PageExtractor, PageText, PlainTextExtractor};
pub use ingest::{
    digest_file, discover_files, discover_text_files, load_document_source, DocumentSource,
    EmbeddingFailure, FolderReport, IngestionOptions, IngestionReport, Ingestor, SkippedFile,
    DEFAULT_MAX_PAGES,
};
pub use models::{
    Chunk, Citation, Document, Page, RankingConfig, ScoreBreakdown, SearchCandidate,
    SearchFilters, SearchQuery, SearchResult, Vector,
};
pub use orchestrator::HybridRanker;
pub use retry::RetryPolicy;
pub use stores::{Bm25Index, MemoryStore, MemoryVectorIndex};
pub use traits::{ChunkStore, KeywordHit, KeywordIndex, VectorHit, VectorIndex};
