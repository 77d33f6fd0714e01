use crate::error::{EmbeddingError, SearchError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

pub const OFFLINE_EMBEDDING_DIMENSIONS: usize = 64;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 64;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch text-to-vector conversion. Output order matches input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Deterministic offline embedding derived from the SHA-256 digest of the text.
///
/// Carries no semantic signal, but lets search run identically without a
/// network provider and keeps tests reproducible.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: OFFLINE_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = digest
            .iter()
            .cycle()
            .take(self.dimensions.max(1))
            .map(|byte| (f32::from(*byte) - 127.5) / 127.5)
            .collect();

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt() + 1e-8;
        for value in &mut vector {
            *value /= norm;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn model_name(&self) -> &str {
        "sha256-offline"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Overrides the known vector width of `model`.
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub offline_dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            api_key: None,
            dimensions: None,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            offline_dimensions: OFFLINE_EMBEDDING_DIMENSIONS,
        }
    }
}

pub fn known_model_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-large" => Some(3072),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl RemoteEmbedder {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, SearchError> {
        if dimensions == 0 {
            return Err(SearchError::InputValidation(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(endpoint)?,
            model: model.into(),
            api_key: api_key.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|error| EmbeddingError::Transient(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let mut payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::Permanent(format!("malformed response: {error}")))?;

        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: payload.data.len(),
            });
        }

        payload.data.sort_by_key(|datum| datum.index);
        payload
            .data
            .into_iter()
            .map(|datum| {
                if datum.embedding.len() == self.dimensions {
                    Ok(datum.embedding)
                } else {
                    Err(EmbeddingError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: datum.embedding.len(),
                    })
                }
            })
            .collect()
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> EmbeddingError {
    let details = format!("{status}: {}", body.chars().take(200).collect::<String>());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        EmbeddingError::Transient(details)
    } else {
        EmbeddingError::Permanent(details)
    }
}

/// The provider actually used at runtime: remote when credentials are
/// configured, the hash fallback otherwise.
#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    Offline(HashEmbedder),
    Remote(RemoteEmbedder),
}

impl EmbeddingBackend {
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, SearchError> {
        match settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
        {
            None => Ok(Self::Offline(HashEmbedder {
                dimensions: settings.offline_dimensions,
            })),
            Some(key) => {
                let dimensions = settings
                    .dimensions
                    .or_else(|| known_model_dimensions(&settings.model))
                    .ok_or_else(|| {
                        SearchError::InputValidation(format!(
                            "unknown vector width for model {}; set dimensions explicitly",
                            settings.model
                        ))
                    })?;
                Ok(Self::Remote(RemoteEmbedder::new(
                    &settings.endpoint,
                    settings.model.clone(),
                    key,
                    dimensions,
                )?))
            }
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

#[async_trait]
impl Embedder for EmbeddingBackend {
    fn dimensions(&self) -> usize {
        match self {
            Self::Offline(embedder) => Embedder::dimensions(embedder),
            Self::Remote(embedder) => embedder.dimensions(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::Offline(embedder) => embedder.model_name(),
            Self::Remote(embedder) => embedder.model_name(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            Self::Offline(embedder) => embedder.embed_batch(texts).await,
            Self::Remote(embedder) => embedder.embed_batch(texts).await,
        }
    }
}

/// Embeds `texts` in groups of `batch_size`, retrying each group under `policy`.
pub async fn embed_in_batches<E>(
    embedder: &E,
    policy: &RetryPolicy,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, SearchError>
where
    E: Embedder + ?Sized,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = policy
            .run(|| async move {
                let embedded = embedder.embed_batch(batch).await?;
                if embedded.len() != batch.len() {
                    return Err(EmbeddingError::CountMismatch {
                        expected: batch.len(),
                        actual: embedded.len(),
                    });
                }
                Ok(embedded)
            })
            .await?;
        vectors.extend(embedded);
    }
    Ok(vectors)
}

pub async fn embed_query<E>(
    embedder: &E,
    policy: &RetryPolicy,
    text: &str,
) -> Result<Vec<f32>, SearchError>
where
    E: Embedder + ?Sized,
{
    let mut vectors = embed_in_batches(embedder, policy, &[text.to_string()], 1).await?;
    vectors
        .pop()
        .ok_or_else(|| SearchError::ProviderPermanent("provider returned no vector".to_string()))
}
