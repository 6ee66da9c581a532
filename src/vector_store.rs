//! Vector store coordination.
//!
//! The engine talks to the vector database through the [`VectorStore`]
//! trait: one collection per group (cosine distance, keyword payload indices
//! on `project` and `file`), deterministic point ids hashed from chunk ids,
//! filtered search, scrolling, payload patches, and deletes.
//!
//! Two implementations ship: [`QdrantStore`] for production and
//! [`MemoryVectorStore`], an in-process brute-force store used by tests and
//! local smoke runs.
//!
//! Search tolerates an unknown collection (the expected state before a
//! group's first index) and returns an empty result set. Every
//! other operation retries transient failures up to 3 times with exponential
//! backoff; errors carrying not-found terms short-circuit the retry loop.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, points_selector::PointsSelectorOneOf, r#match::MatchValue,
    value::Kind, Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance,
    FieldCondition, FieldType, Filter, Match, PointId, PointStruct, PointsIdsList,
    RepeatedStrings, ScrollPointsBuilder, SearchPointsBuilder, SetPayloadPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkKind};

/// Payload stored with every point, one per chunk.
///
/// Line fields use camelCase on the wire; everything else is snake_case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub project: String,
    pub file: String,
    pub language: String,
    #[serde(rename = "startLine")]
    pub start_line: u32,
    #[serde(rename = "endLine")]
    pub end_line: u32,
    pub content: String,
    pub hash: String,
    pub chunk_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChunkKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounded_context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_author_email: Option<String>,
    #[serde(default)]
    pub ticket_keys: Vec<String>,
    #[serde(default)]
    pub defines_symbols: Vec<String>,
    #[serde(default)]
    pub uses_symbols: Vec<String>,
}

impl From<&Chunk> for ChunkPayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            project: chunk.project.clone(),
            file: chunk.file.clone(),
            language: chunk.language.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.content.clone(),
            hash: chunk.hash.clone(),
            chunk_id: chunk.chunk_id.clone(),
            symbol_name: chunk.symbol_name.clone(),
            kind: chunk.kind,
            service: chunk.service.clone(),
            bounded_context: chunk.bounded_context.clone(),
            tags: chunk.tags.clone(),
            last_commit_hash: chunk.last_commit_hash.clone(),
            last_commit_at: chunk.last_commit_at.clone(),
            last_author_email: chunk.last_author_email.clone(),
            ticket_keys: chunk.ticket_keys.clone(),
            defines_symbols: chunk.defines_symbols.clone(),
            uses_symbols: chunk.uses_symbols.clone(),
        }
    }
}

/// One point to upsert: stable id, vector, payload.
#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredPayload {
    pub score: f32,
    pub payload: ChunkPayload,
}

/// AND-combined filter conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub must: Vec<FilterCond>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCond {
    /// Field equals value (array fields match by containment).
    Eq { field: String, value: String },
    /// Field equals any of the values.
    AnyOf { field: String, values: Vec<String> },
}

impl SearchFilter {
    pub fn eq(field: &str, value: impl Into<String>) -> Self {
        Self {
            must: vec![FilterCond::Eq {
                field: field.to_string(),
                value: value.into(),
            }],
        }
    }

    pub fn and(mut self, cond: FilterCond) -> Self {
        self.must.push(cond);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    /// Stable JSON form used in query-cache fingerprints.
    pub fn canonical_form(&self) -> String {
        let mut parts: Vec<String> = self
            .must
            .iter()
            .map(|c| match c {
                FilterCond::Eq { field, value } => format!("{field}={value}"),
                FilterCond::AnyOf { field, values } => {
                    let mut sorted = values.clone();
                    sorted.sort();
                    format!("{field}~{}", sorted.join("|"))
                }
            })
            .collect();
        parts.sort();
        parts.join("&")
    }
}

/// The coordination seam over the vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent collection create with cosine distance and keyword payload
    /// indices on `project` and `file`.
    async fn ensure_collection(&self, group: &str, dims: usize) -> Result<()>;
    async fn upsert(&self, group: &str, points: Vec<Point>) -> Result<()>;
    /// Returns an empty set for an unknown collection.
    async fn search(
        &self,
        group: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPayload>>;
    async fn delete_by_filter(&self, group: &str, filter: &SearchFilter) -> Result<()>;
    async fn scroll_by_filter(&self, group: &str, filter: &SearchFilter)
        -> Result<Vec<ChunkPayload>>;
    async fn set_payload(&self, group: &str, point_id: &str, patch: serde_json::Value)
        -> Result<()>;
    async fn delete_collection(&self, group: &str) -> Result<()>;
    async fn list_collections(&self) -> Result<Vec<String>>;
    async fn healthz(&self) -> Result<()>;
}

// ── Qdrant implementation ───────────────────────────────────────────────

pub struct QdrantStore {
    client: Qdrant,
}

const STORE_RETRIES: u32 = 3;

impl QdrantStore {
    pub fn connect(url: &str, api_key: Option<&str>) -> Result<Self> {
        let mut builder = Qdrant::from_url(url).timeout(Duration::from_secs(30));
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Upstream(format!("qdrant client: {e}")))?;
        Ok(Self { client })
    }

    /// Retry transient failures with 500 ms/1 s/2 s backoff. Not-found
    /// errors are terminal: retrying cannot make a missing thing appear.
    async fn with_retries<T, F, Fut>(&self, op: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, qdrant_client::QdrantError>>,
    {
        let mut last_err = String::new();
        for attempt in 0..=STORE_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 << (attempt - 1))).await;
            }
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let msg = e.to_string();
                    if is_not_found(&msg) {
                        return Err(Error::NotFound(format!("{op}: {msg}")));
                    }
                    warn!(op, attempt, error = %msg, "vector store call failed");
                    last_err = msg;
                }
            }
        }
        Err(Error::Upstream(format!("{op} failed after retries: {last_err}")))
    }
}

fn is_not_found(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("not found") || lowered.contains("doesn't exist") || lowered.contains("not_found")
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, group: &str, dims: usize) -> Result<()> {
        let exists = self
            .with_retries("collection_exists", || self.client.collection_exists(group))
            .await?;
        if !exists {
            debug!(group, dims, "creating collection");
            self.with_retries("create_collection", || {
                self.client.create_collection(
                    CreateCollectionBuilder::new(group)
                        .vectors_config(VectorParamsBuilder::new(dims as u64, Distance::Cosine)),
                )
            })
            .await?;
        }

        for field in ["project", "file"] {
            self.with_retries("create_field_index", || {
                self.client.create_field_index(CreateFieldIndexCollectionBuilder::new(
                    group,
                    field,
                    FieldType::Keyword,
                ))
            })
            .await?;
        }
        Ok(())
    }

    async fn upsert(&self, group: &str, points: Vec<Point>) -> Result<()> {
        let qdrant_points: Vec<PointStruct> = points
            .into_iter()
            .map(|p| {
                let payload = payload_to_qdrant(&p.payload)?;
                Ok(PointStruct::new(p.id, p.vector, payload))
            })
            .collect::<Result<_>>()?;

        self.with_retries("upsert", || {
            self.client
                .upsert_points(UpsertPointsBuilder::new(group, qdrant_points.clone()).wait(true))
        })
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        group: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPayload>> {
        let qdrant_filter = to_qdrant_filter(filter);
        let result = self
            .with_retries("search", || {
                let mut builder =
                    SearchPointsBuilder::new(group, vector.to_vec(), limit as u64).with_payload(true);
                if !filter.is_empty() {
                    builder = builder.filter(qdrant_filter.clone());
                }
                self.client.search_points(builder)
            })
            .await;

        let response = match result {
            Ok(r) => r,
            // Collection-not-found is an expected state before first index.
            Err(Error::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        response
            .result
            .into_iter()
            .map(|scored| {
                let payload = payload_from_qdrant(scored.payload)?;
                Ok(ScoredPayload {
                    score: scored.score,
                    payload,
                })
            })
            .collect()
    }

    async fn delete_by_filter(&self, group: &str, filter: &SearchFilter) -> Result<()> {
        let selector = PointsSelectorOneOf::Filter(to_qdrant_filter(filter));
        self.with_retries("delete_by_filter", || {
            self.client.delete_points(
                qdrant_client::qdrant::DeletePointsBuilder::new(group)
                    .points(selector.clone())
                    .wait(true),
            )
        })
        .await?;
        Ok(())
    }

    async fn scroll_by_filter(
        &self,
        group: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkPayload>> {
        let qdrant_filter = to_qdrant_filter(filter);
        let mut payloads = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let offset_clone = offset.clone();
            let result = self
                .with_retries("scroll", || {
                    let mut builder = ScrollPointsBuilder::new(group)
                        .limit(256)
                        .with_payload(true);
                    if !filter.is_empty() {
                        builder = builder.filter(qdrant_filter.clone());
                    }
                    if let Some(o) = offset_clone.clone() {
                        builder = builder.offset(o);
                    }
                    self.client.scroll(builder)
                })
                .await;

            let response = match result {
                Ok(r) => r,
                Err(Error::NotFound(_)) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };

            for point in response.result {
                payloads.push(payload_from_qdrant(point.payload)?);
            }
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(payloads)
    }

    async fn set_payload(
        &self,
        group: &str,
        point_id: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        let payload = Payload::try_from(patch)
            .map_err(|e| Error::Internal(format!("payload patch must be an object: {e}")))?;
        let selector = PointsSelectorOneOf::Points(PointsIdsList {
            ids: vec![PointId::from(point_id.to_string())],
        });
        self.with_retries("set_payload", || {
            self.client.set_payload(
                SetPayloadPointsBuilder::new(group, payload.clone())
                    .points_selector(selector.clone())
                    .wait(true),
            )
        })
        .await?;
        Ok(())
    }

    async fn delete_collection(&self, group: &str) -> Result<()> {
        self.with_retries("delete_collection", || self.client.delete_collection(group))
            .await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self
            .with_retries("list_collections", || self.client.list_collections())
            .await?;
        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn healthz(&self) -> Result<()> {
        self.with_retries("health", || self.client.health_check()).await?;
        Ok(())
    }
}

fn to_qdrant_filter(filter: &SearchFilter) -> Filter {
    let must: Vec<Condition> = filter
        .must
        .iter()
        .map(|cond| match cond {
            FilterCond::Eq { field, value } => Condition::matches(field.clone(), value.clone()),
            FilterCond::AnyOf { field, values } => Condition {
                condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                    key: field.clone(),
                    r#match: Some(Match {
                        match_value: Some(MatchValue::Keywords(RepeatedStrings {
                            strings: values.clone(),
                        })),
                    }),
                    ..Default::default()
                })),
            },
        })
        .collect();
    Filter::must(must)
}

fn payload_to_qdrant(payload: &ChunkPayload) -> Result<Payload> {
    let json = serde_json::to_value(payload)
        .map_err(|e| Error::Internal(format!("serialize payload: {e}")))?;
    Payload::try_from(json).map_err(|e| Error::Internal(format!("payload: {e}")))
}

fn payload_from_qdrant(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> Result<ChunkPayload> {
    let json = serde_json::Value::Object(
        payload
            .into_iter()
            .map(|(k, v)| (k, qdrant_value_to_json(v)))
            .collect(),
    );
    serde_json::from_value(json).map_err(|e| Error::Internal(format!("decode payload: {e}")))
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => serde_json::Value::Array(
            list.values.into_iter().map(qdrant_value_to_json).collect(),
        ),
        Some(Kind::StructValue(s)) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}

// ── In-memory implementation ────────────────────────────────────────────

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Brute-force cosine store held in process memory.
///
/// Mirrors the Qdrant contract closely enough for tests and local smoke
/// runs: per-group collections, filter semantics, and empty results for
/// unknown collections. Write counters let tests assert on traffic.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: Mutex<HashMap<String, HashMap<String, (Vec<f32>, ChunkPayload)>>>,
    pub upsert_calls: AtomicU64,
    pub delete_calls: AtomicU64,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(payload: &ChunkPayload, filter: &SearchFilter) -> bool {
        if filter.is_empty() {
            return true;
        }
        let json = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(_) => return false,
        };
        filter.must.iter().all(|cond| match cond {
            FilterCond::Eq { field, value } => field_matches(&json, field, value),
            FilterCond::AnyOf { field, values } => {
                values.iter().any(|v| field_matches(&json, field, v))
            }
        })
    }
}

fn field_matches(json: &serde_json::Value, field: &str, value: &str) -> bool {
    match json.get(field) {
        Some(serde_json::Value::String(s)) => s == value,
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().map(|s| s == value).unwrap_or(false)),
        Some(serde_json::Value::Number(n)) => n.to_string() == value,
        _ => false,
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or empty input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, group: &str, _dims: usize) -> Result<()> {
        self.collections
            .lock()
            .unwrap()
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(&self, group: &str, points: Vec<Point>) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let collection = collections.entry(group.to_string()).or_default();
        for point in points {
            collection.insert(point.id, (point.vector, point.payload));
        }
        Ok(())
    }

    async fn search(
        &self,
        group: &str,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPayload>> {
        let collections = self.collections.lock().unwrap();
        let Some(collection) = collections.get(group) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<ScoredPayload> = collection
            .values()
            .filter(|(_, payload)| Self::matches(payload, filter))
            .map(|(v, payload)| ScoredPayload {
                score: cosine_similarity(vector, v),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_filter(&self, group: &str, filter: &SearchFilter) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        if let Some(collection) = collections.get_mut(group) {
            collection.retain(|_, (_, payload)| !Self::matches(payload, filter));
        }
        Ok(())
    }

    async fn scroll_by_filter(
        &self,
        group: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkPayload>> {
        let collections = self.collections.lock().unwrap();
        let Some(collection) = collections.get(group) else {
            return Ok(Vec::new());
        };
        let mut payloads: Vec<ChunkPayload> = collection
            .values()
            .filter(|(_, payload)| Self::matches(payload, filter))
            .map(|(_, payload)| payload.clone())
            .collect();
        payloads.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        Ok(payloads)
    }

    async fn set_payload(
        &self,
        group: &str,
        point_id: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let collection = collections
            .get_mut(group)
            .ok_or_else(|| Error::NotFound(format!("collection {group}")))?;
        let (_, payload) = collection
            .get_mut(point_id)
            .ok_or_else(|| Error::NotFound(format!("point {point_id}")))?;

        let mut json = serde_json::to_value(&*payload)
            .map_err(|e| Error::Internal(e.to_string()))?;
        if let (serde_json::Value::Object(target), serde_json::Value::Object(source)) =
            (&mut json, patch)
        {
            for (k, v) in source {
                target.insert(k, v);
            }
        }
        *payload = serde_json::from_value(json).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(())
    }

    async fn delete_collection(&self, group: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.collections.lock().unwrap().remove(group);
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn healthz(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::point_id_for;

    fn payload(project: &str, file: &str, hash: &str) -> ChunkPayload {
        ChunkPayload {
            project: project.to_string(),
            file: file.to_string(),
            language: "typescript".to_string(),
            start_line: 1,
            end_line: 5,
            content: "function x() {}".to_string(),
            hash: hash.to_string(),
            chunk_id: format!("g//{project}//{file}//1-5//{hash}"),
            symbol_name: None,
            kind: None,
            service: None,
            bounded_context: None,
            tags: vec!["backend".to_string()],
            last_commit_hash: None,
            last_commit_at: None,
            last_author_email: None,
            ticket_keys: Vec::new(),
            defines_symbols: Vec::new(),
            uses_symbols: Vec::new(),
        }
    }

    fn point(project: &str, file: &str, hash: &str, vector: Vec<f32>) -> Point {
        let payload = payload(project, file, hash);
        Point {
            id: point_id_for(&payload.chunk_id),
            vector,
            payload,
        }
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_filter_canonical_form_is_order_independent() {
        let a = SearchFilter::eq("project", "p1").and(FilterCond::Eq {
            field: "file".to_string(),
            value: "f".to_string(),
        });
        let b = SearchFilter::eq("file", "f").and(FilterCond::Eq {
            field: "project".to_string(),
            value: "p1".to_string(),
        });
        assert_eq!(a.canonical_form(), b.canonical_form());
    }

    #[tokio::test]
    async fn test_memory_search_unknown_collection_is_empty() {
        let store = MemoryVectorStore::new();
        let hits = store
            .search("never-indexed", &[1.0, 0.0], 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_memory_filtered_search() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("g", 2).await.unwrap();
        store
            .upsert(
                "g",
                vec![
                    point("p1", "a.ts", "h1", vec![1.0, 0.0]),
                    point("p2", "b.ts", "h2", vec![0.9, 0.1]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("g", &[1.0, 0.0], 10, &SearchFilter::eq("project", "p1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.project, "p1");
    }

    #[tokio::test]
    async fn test_memory_any_of_and_array_contains() {
        let store = MemoryVectorStore::new();
        store
            .upsert("g", vec![point("p1", "a.ts", "h1", vec![1.0, 0.0])])
            .await
            .unwrap();

        let any_of = SearchFilter {
            must: vec![FilterCond::AnyOf {
                field: "project".to_string(),
                values: vec!["p1".to_string(), "p9".to_string()],
            }],
        };
        assert_eq!(store.search("g", &[1.0, 0.0], 10, &any_of).await.unwrap().len(), 1);

        let tag_filter = SearchFilter::eq("tags", "backend");
        assert_eq!(
            store.search("g", &[1.0, 0.0], 10, &tag_filter).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_memory_delete_by_filter() {
        let store = MemoryVectorStore::new();
        store
            .upsert(
                "g",
                vec![
                    point("p1", "a.ts", "h1", vec![1.0, 0.0]),
                    point("p1", "b.ts", "h2", vec![0.5, 0.5]),
                ],
            )
            .await
            .unwrap();

        store
            .delete_by_filter("g", &SearchFilter::eq("file", "a.ts"))
            .await
            .unwrap();
        let rest = store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].file, "b.ts");
    }

    #[tokio::test]
    async fn test_memory_set_payload_patch() {
        let store = MemoryVectorStore::new();
        let p = point("p1", "a.ts", "h1", vec![1.0]);
        let id = p.id.clone();
        store.upsert("g", vec![p]).await.unwrap();

        store
            .set_payload(
                "g",
                &id,
                serde_json::json!({"last_commit_hash": "abc123", "ticket_keys": ["OPS-1"]}),
            )
            .await
            .unwrap();

        let payloads = store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(payloads[0].last_commit_hash.as_deref(), Some("abc123"));
        assert_eq!(payloads[0].ticket_keys, vec!["OPS-1"]);
    }

    #[tokio::test]
    async fn test_payload_serde_line_field_names() {
        let p = payload("p1", "a.ts", "h1");
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("startLine").is_some());
        assert!(json.get("endLine").is_some());
        assert!(json.get("start_line").is_none());
    }

    #[test]
    fn test_is_not_found_terms() {
        assert!(is_not_found("Collection `g` doesn't exist"));
        assert!(is_not_found("Not found: collection g"));
        assert!(!is_not_found("connection refused"));
    }
}
