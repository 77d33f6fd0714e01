use chrono::Utc;
use clap::{Parser, Subcommand};
use specscope_core::{
    validate_citation, Citation, EmbeddingBackend, EmbeddingSettings, HybridRanker,
    IngestionOptions, Ingestor, MemoryStore, MemoryVectorIndex, PlainTextExtractor, SearchFilters,
    SearchQuery, DEFAULT_EMBEDDING_ENDPOINT, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_PAGES,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const STORE_FILE: &str = "store.json";
const VECTORS_FILE: &str = "vectors.json";

#[derive(Parser)]
#[command(name = "specscope", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the document store and vector snapshots.
    #[arg(long, env = "SPECSCOPE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Remote embedding API key; without one the offline hash embedder is used.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_ENDPOINT", default_value = DEFAULT_EMBEDDING_ENDPOINT)]
    embedding_endpoint: String,

    /// Pages beyond this limit are ignored at ingestion.
    #[arg(long, env = "MAX_PAGES_PER_UPLOAD", default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: usize,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every .txt/.md file under a folder.
    Ingest {
        #[arg(long)]
        folder: PathBuf,
    },
    /// Hybrid keyword + semantic search with cited results.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        /// Weight of the semantic score; 0 is keyword only, 1 is vector only.
        #[arg(long, default_value_t = 0.5)]
        alpha: f64,
        /// Restrict results to these documents (repeatable).
        #[arg(long = "doc-id")]
        doc_ids: Vec<String>,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List ingested documents, newest first.
    Documents,
    /// Print the text of one page.
    Page {
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        page: u32,
    },
    /// Delete a document with its pages, chunks and vectors.
    Delete {
        #[arg(long)]
        document_id: String,
    },
    /// Check that a quote appears verbatim in a chunk.
    Cite {
        #[arg(long)]
        chunk_id: String,
        #[arg(long)]
        quote: String,
        #[arg(long, default_value_t = 0)]
        char_start: usize,
        #[arg(long, default_value_t = 0)]
        char_end: usize,
    },
}

struct Workspace {
    data_dir: PathBuf,
    store: Arc<MemoryStore>,
    vectors: Arc<MemoryVectorIndex>,
}

impl Workspace {
    fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            store: Arc::new(MemoryStore::open(&data_dir.join(STORE_FILE))?),
            vectors: Arc::new(MemoryVectorIndex::open(&data_dir.join(VECTORS_FILE))?),
        })
    }

    fn save(&self) -> anyhow::Result<()> {
        self.store.save(&self.data_dir.join(STORE_FILE))?;
        self.vectors.save(&self.data_dir.join(VECTORS_FILE))?;
        Ok(())
    }
}

fn init_tracing(json: bool) {
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = EmbeddingSettings {
        model: cli.embedding_model.clone(),
        endpoint: cli.embedding_endpoint.clone(),
        api_key: cli.openai_api_key.clone(),
        ..EmbeddingSettings::default()
    };
    let embedder = Arc::new(EmbeddingBackend::from_settings(&settings)?);
    let workspace = Workspace::open(&cli.data_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %cli.data_dir.display(),
        offline_embeddings = embedder.is_offline(),
        "specscope boot"
    );

    let ingestor = Ingestor::new(
        Arc::clone(&workspace.store),
        Arc::clone(&workspace.vectors),
        Arc::clone(&embedder),
        IngestionOptions {
            max_pages: cli.max_pages,
            embedding_batch_size: settings.batch_size,
            ..IngestionOptions::default()
        },
    );

    match cli.command {
        Command::Ingest { folder } => {
            let report = ingestor.ingest_folder(&PlainTextExtractor, &folder).await?;
            workspace.save()?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            for ingested in &report.documents {
                for failure in &ingested.failures {
                    warn!(
                        document_id = %ingested.document.id,
                        page_number = failure.page_number,
                        reason = %failure.reason,
                        "page not searchable by meaning"
                    );
                }
                let status = if ingested.duplicate { "unchanged" } else { "ingested" };
                println!(
                    "{status} {} id={} pages={} chunks={} embedded={}",
                    ingested.document.filename,
                    ingested.document.id,
                    ingested.document.pages_count,
                    ingested.chunk_count,
                    ingested.embedded_count
                );
            }
            println!(
                "{} document(s), {} skipped at {}",
                report.documents.len(),
                report.skipped_files.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            top_k,
            alpha,
            doc_ids,
            json,
        } => {
            let mut search_query = SearchQuery::new(query, top_k, alpha);
            if !doc_ids.is_empty() {
                search_query = search_query.with_filters(SearchFilters::for_documents(doc_ids));
            }

            let ranker = HybridRanker::new(
                Arc::clone(&workspace.store),
                Arc::clone(&workspace.vectors),
                Arc::clone(&workspace.store),
                Arc::clone(&embedder),
            );
            let results = ranker.hybrid_search(&search_query).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("query: {}", search_query.text);
                for result in results {
                    println!(
                        "[{:.4}] {} p.{} chunk={} keyword={:.4} vector={:.4} confidence={:.2}",
                        result.scores.hybrid,
                        result.filename,
                        result.page_number,
                        result.chunk_id,
                        result.scores.keyword,
                        result.scores.vector,
                        result.confidence
                    );
                    if let Some(section) = &result.section {
                        println!("  section: {section}");
                    }
                    println!("  {}", result.snippet);
                }
            }
        }
        Command::Documents => {
            for document in workspace.store.list_documents() {
                println!(
                    "{} {} pages={} uploaded={}",
                    document.id,
                    document.filename,
                    document.pages_count,
                    document.uploaded_at.to_rfc3339()
                );
            }
        }
        Command::Page { document_id, page } => {
            let page = workspace.store.get_page(&document_id, page)?;
            if let Some(section) = &page.section {
                println!("[{section}]");
            }
            println!("{}", page.text);
        }
        Command::Delete { document_id } => {
            let document = workspace.store.get_document(&document_id)?;
            let removed = ingestor.delete_document(&document.id).await?;
            workspace.save()?;
            info!(%document_id, filename = %document.filename, removed, "document deleted");
            println!("deleted {} {document_id} ({removed} chunks)", document.filename);
        }
        Command::Cite {
            chunk_id,
            quote,
            char_start,
            char_end,
        } => {
            let chunk = workspace.store.get_chunk(&chunk_id)?;
            let citation = Citation {
                chunk_id: chunk.id,
                document_id: chunk.document_id,
                filename: chunk.filename,
                page_number: chunk.page_number,
                section: chunk.section,
                quote,
                char_start,
                char_end,
            };
            let valid = validate_citation(workspace.store.as_ref(), &citation).await?;
            println!(
                "{} {} p.{}",
                if valid { "valid" } else { "invalid" },
                citation.filename,
                citation.page_number
            );
            if !valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
