//! Embedding provider: remote HTTP embedder with task prefixes and caching.
//!
//! The embedding model is a black box behind an HTTP endpoint producing
//! fixed-dimension vectors. Before embedding, a task-specific prefix is
//! prepended so passages (index time) and queries (search time) land in
//! matched representation spaces. The query prefix depends on a first-line
//! heuristic: code keywords → code, leading wh-word or trailing `?` →
//! question, anything else → natural-language description.
//!
//! # Retry Strategy
//!
//! Transient failures (HTTP 429/5xx, network errors) are retried up to 3
//! times with exponential backoff (1 s, 2 s, 4 s); other 4xx responses fail
//! immediately. Batches above the sub-batch ceiling are split and submitted
//! sequentially, with results concatenated in request order.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingsConfig;
use crate::embed_cache::EmbeddingCache;
use crate::error::{Error, Result};
use crate::models::content_hash;

/// Largest number of texts sent in one upstream call.
const MAX_SUB_BATCH: usize = 128;

const MAX_RETRIES: u32 = 3;

/// Prefix applied to every chunk at indexing time.
pub const PASSAGE_PREFIX: &str = "Represent this code passage for retrieval: ";

/// Detected intent of a query, selecting its embedding prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTask {
    /// Code-shaped input: find similar code.
    Code,
    /// A technical question.
    Question,
    /// A natural-language feature description.
    NaturalLanguage,
}

impl QueryTask {
    pub fn prefix(self) -> &'static str {
        match self {
            QueryTask::Code => "Represent this code for finding similar code: ",
            QueryTask::Question => {
                "Represent this technical question for retrieving supporting code: "
            }
            QueryTask::NaturalLanguage => {
                "Represent this description for retrieving relevant code: "
            }
        }
    }
}

const CODE_KEYWORDS: &[&str] = &[
    "fn", "def", "func", "function", "class", "interface", "impl", "struct", "enum", "const",
    "let", "var", "import", "export", "pub", "async", "return", "package", "type",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "how", "why", "where", "when", "which", "who", "whose", "is", "are", "does", "do",
    "can", "should",
];

/// Classify a query by its first line.
pub fn detect_query_task(text: &str) -> QueryTask {
    let first_line = text.lines().next().unwrap_or("").trim();
    let lowered = first_line.to_lowercase();

    let has_code_keyword = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|word| CODE_KEYWORDS.contains(&word));
    // Punctuation that rarely appears in prose tips the balance toward code.
    let has_code_punct =
        first_line.contains("::") || first_line.contains("=>") || first_line.contains("){");
    if has_code_keyword || has_code_punct {
        return QueryTask::Code;
    }

    let leading_question = lowered
        .split_whitespace()
        .next()
        .map(|w| QUESTION_WORDS.contains(&w))
        .unwrap_or(false);
    if leading_question || first_line.ends_with('?') {
        return QueryTask::Question;
    }

    QueryTask::NaturalLanguage
}

/// Seam for embedding backends; inputs arrive already prefixed.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
}

/// Remote HTTP embedding provider.
///
/// Speaks the `/api/embed` JSON shape: request `{model, input}`, response
/// `{embeddings: [[f32]]}`.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl RemoteEmbedder {
    pub fn new(url: &str, config: &EmbeddingsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dimensions,
        })
    }

    async fn embed_sub_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s, 4s.
                let delay = Duration::from_secs(1 << (attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let vectors = parse_embed_response(&json)?;
                        return self.check_dims(vectors, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::Upstream(format!(
                            "embedding service {status}: {body_text}"
                        )));
                        continue;
                    }
                    return Err(Error::Upstream(format!(
                        "embedding service {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Upstream("embedding failed after retries".into())))
    }

    fn check_dims(&self, vectors: Vec<Vec<f32>>, expected_count: usize) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected_count {
            return Err(Error::Upstream(format!(
                "embedding count mismatch: sent {expected_count}, got {}",
                vectors.len()
            )));
        }
        for v in &vectors {
            if v.len() != self.dims {
                return Err(Error::EmbeddingShape {
                    expected: self.dims,
                    actual: v.len(),
                });
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut all = Vec::with_capacity(texts.len());
        for sub in texts.chunks(MAX_SUB_BATCH) {
            let vectors = self.embed_sub_batch(sub).await?;
            all.extend(vectors);
        }
        Ok(all)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Upstream("invalid embed response: missing embeddings array".into()))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| Error::Upstream("invalid embed response: embedding is not an array".into()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

/// Result of a cached passage-embedding pass.
pub struct EmbedOutcome {
    /// Vectors in request order.
    pub vectors: Vec<Vec<f32>>,
    /// How many inputs were served from the cache.
    pub cache_hits: u64,
}

/// Composes an [`Embedder`] with the durable cache: look up each input by
/// content hash, embed only the misses as one batch, populate the cache, and
/// return vectors in request order.
pub struct CachedEmbedder {
    inner: Box<dyn Embedder>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(inner: Box<dyn Embedder>, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn dims(&self) -> usize {
        self.inner.dims()
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    /// Embed chunk contents with the passage prefix, cache-first.
    pub async fn embed_passages(&self, contents: &[String]) -> Result<EmbedOutcome> {
        let model = self.inner.model_name().to_string();
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; contents.len()];
        let mut miss_indices = Vec::new();
        let mut cache_hits = 0u64;

        for (i, content) in contents.iter().enumerate() {
            let hash = content_hash(content);
            match self.cache.get(&hash, &model).await? {
                Some(vector) => {
                    vectors[i] = Some(vector);
                    cache_hits += 1;
                }
                None => miss_indices.push(i),
            }
        }

        if !miss_indices.is_empty() {
            debug!(misses = miss_indices.len(), hits = cache_hits, "embedding cache pass");
            let batch: Vec<String> = miss_indices
                .iter()
                .map(|&i| format!("{PASSAGE_PREFIX}{}", contents[i]))
                .collect();
            let fresh = self.inner.embed(&batch).await?;
            for (&i, vector) in miss_indices.iter().zip(fresh.into_iter()) {
                let hash = content_hash(&contents[i]);
                self.cache.set(&hash, &model, &vector).await?;
                vectors[i] = Some(vector);
            }
        }

        Ok(EmbedOutcome {
            vectors: vectors.into_iter().map(|v| v.unwrap_or_default()).collect(),
            cache_hits,
        })
    }

    /// Embed a query with the task prefix chosen by [`detect_query_task`].
    /// Queries are not cached; the query cache upstream covers full results.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let task = detect_query_task(query);
        let prefixed = format!("{}{query}", task.prefix());
        let mut vectors = self.inner.embed(&[prefixed]).await?;
        if vectors.is_empty() {
            return Err(Error::Upstream("empty embedding response".into()));
        }
        Ok(vectors.remove(0))
    }
}

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
