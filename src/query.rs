//! Query engine: similarity search with expansion, filtering, and caching.
//!
//! Three entry points share one pipeline:
//!
//! - [`QueryEngine::search`] — embed the query, vector-search with an
//!   optional project filter, map hits into results.
//! - [`QueryEngine::expanded_search`] — generate up to three query
//!   variations, fan out with double the limit, merge by chunk hash keeping
//!   the best score per chunk, and return the top slice.
//! - [`QueryEngine::search_with_filter`] — expanded search with a
//!   caller-supplied filter conjoined.
//!
//! Results are cached per group under a deterministic fingerprint; any
//! indexer write to a group drops that group's entries. The engine is
//! strictly read-only against the stores.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::embedding::CachedEmbedder;
use crate::error::{Error, Result};
use crate::models::validate_group;
use crate::vector_store::{ChunkPayload, FilterCond, SearchFilter, VectorStore};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 100;
const MAX_VARIATIONS: usize = 3;

/// Chars-per-token approximation used by the savings metrics.
const CHARS_PER_TOKEN: u64 = 4;
/// Assumed average chars per source line when estimating full-file cost.
const CHARS_PER_LINE: u64 = 50;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub project: Option<String>,
    pub limit: Option<usize>,
}

/// One search hit: the stored payload plus its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub score: f32,
    #[serde(flatten)]
    pub chunk: ChunkPayload,
}

/// Token-savings estimate for a result set: what the caller got versus what
/// reading every matched file whole would have cost.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SearchMetrics {
    pub tokens_returned: u64,
    pub estimated_full_file_tokens: u64,
    pub tokens_saved: u64,
    pub savings_percent: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutput {
    pub results: Vec<SearchResultItem>,
    pub total: usize,
    pub metrics: SearchMetrics,
}

// ── Query cache ─────────────────────────────────────────────────────────

/// Process-wide cache of search outputs, keyed by a deterministic
/// fingerprint and invalidated per group on every indexer write.
#[derive(Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, SearchOutput>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn fingerprint(
        group: &str,
        op: &str,
        query: &str,
        project: Option<&str>,
        limit: usize,
        filter: &SearchFilter,
    ) -> String {
        format!(
            "{group}\u{1}{op}\u{1}{query}\u{1}{}\u{1}{limit}\u{1}{}",
            project.unwrap_or(""),
            filter.canonical_form()
        )
    }

    fn get(&self, key: &str) -> Option<SearchOutput> {
        let found = self.entries.lock().unwrap().get(key).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    fn put(&self, key: String, value: SearchOutput) {
        self.entries.lock().unwrap().insert(key, value);
    }

    /// Drop every cached entry for one group.
    pub fn invalidate_group(&self, group: &str) {
        let prefix = format!("{group}\u{1}");
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            entries: self.entries.lock().unwrap().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Drop everything; used at server drain.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

// ── Engine ──────────────────────────────────────────────────────────────

pub struct QueryEngine {
    store: std::sync::Arc<dyn VectorStore>,
    embedder: std::sync::Arc<CachedEmbedder>,
    cache: std::sync::Arc<QueryCache>,
    /// Allow-list of project names; empty means unrestricted.
    allowed_projects: Vec<String>,
}

impl QueryEngine {
    pub fn new(
        store: std::sync::Arc<dyn VectorStore>,
        embedder: std::sync::Arc<CachedEmbedder>,
        cache: std::sync::Arc<QueryCache>,
        allowed_projects: Vec<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            allowed_projects,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Plain similarity search.
    pub async fn search(&self, group: &str, query: &str, opts: &SearchOptions) -> Result<SearchOutput> {
        let (group, limit) = self.validate(group, query, opts)?;
        let key = QueryCache::fingerprint(
            &group,
            "search",
            query,
            opts.project.as_deref(),
            limit,
            &SearchFilter::default(),
        );
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let Some(filter) = self.scope_filter(opts.project.as_deref()) else {
            return Ok(empty_output());
        };
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.store.search(&group, &vector, limit, &filter).await?;
        let output = into_output(hits, limit);
        self.cache.put(key, output.clone());
        Ok(output)
    }

    /// Search the original query plus up to two variations, merged by chunk
    /// hash with the best score winning.
    pub async fn expanded_search(
        &self,
        group: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SearchOutput> {
        self.expanded_with_filter(group, query, &SearchFilter::default(), "expanded", opts)
            .await
    }

    /// Expanded search with caller-supplied conditions conjoined.
    pub async fn search_with_filter(
        &self,
        group: &str,
        query: &str,
        additional: &SearchFilter,
        opts: &SearchOptions,
    ) -> Result<SearchOutput> {
        self.expanded_with_filter(group, query, additional, "filtered", opts).await
    }

    async fn expanded_with_filter(
        &self,
        group: &str,
        query: &str,
        additional: &SearchFilter,
        op_tag: &str,
        opts: &SearchOptions,
    ) -> Result<SearchOutput> {
        let (group, limit) = self.validate(group, query, opts)?;
        let key = QueryCache::fingerprint(
            &group,
            op_tag,
            query,
            opts.project.as_deref(),
            limit,
            additional,
        );
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let Some(mut filter) = self.scope_filter(opts.project.as_deref()) else {
            return Ok(empty_output());
        };
        for cond in &additional.must {
            filter = filter.and(cond.clone());
        }

        let variations = query_variations(query);
        debug!(?variations, "expanded search fan-out");

        // Merge by chunk hash, keeping the best score per chunk.
        let mut best: HashMap<String, SearchResultItem> = HashMap::new();
        for variation in &variations {
            let vector = self.embedder.embed_query(variation).await?;
            let hits = self.store.search(&group, &vector, limit * 2, &filter).await?;
            for hit in hits {
                let item = SearchResultItem {
                    score: hit.score,
                    chunk: hit.payload,
                };
                match best.get(&item.chunk.hash) {
                    Some(existing) if existing.score >= item.score => {}
                    _ => {
                        best.insert(item.chunk.hash.clone(), item);
                    }
                }
            }
        }

        let mut results: Vec<SearchResultItem> = best.into_values().collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        results.truncate(limit);

        let metrics = compute_metrics(&results);
        let output = SearchOutput {
            total: results.len(),
            results,
            metrics,
        };
        self.cache.put(key, output.clone());
        Ok(output)
    }

    // ── Read-side lookups used by the MCP tools ─────────────────────────

    pub async fn get_chunk(&self, group: &str, chunk_id: &str) -> Result<Option<ChunkPayload>> {
        let group = validate_group(group)?;
        let payloads = self
            .store
            .scroll_by_filter(&group, &SearchFilter::eq("chunk_id", chunk_id.to_string()))
            .await?;
        Ok(payloads.into_iter().next())
    }

    /// Chunks defining a symbol, and the chunks that use it.
    pub async fn find_usages(
        &self,
        group: &str,
        symbol: &str,
        project: Option<&str>,
    ) -> Result<(Vec<ChunkPayload>, Vec<ChunkPayload>)> {
        let group = validate_group(group)?;
        let scoped = |mut filter: SearchFilter| {
            if let Some(p) = project {
                filter = filter.and(FilterCond::Eq {
                    field: "project".to_string(),
                    value: p.to_string(),
                });
            }
            filter
        };
        let definitions = self
            .store
            .scroll_by_filter(&group, &scoped(SearchFilter::eq("defines_symbols", symbol)))
            .await?;
        let usages = self
            .store
            .scroll_by_filter(&group, &scoped(SearchFilter::eq("uses_symbols", symbol)))
            .await?;
        Ok((definitions, usages))
    }

    fn validate(&self, group: &str, query: &str, opts: &SearchOptions) -> Result<(String, usize)> {
        let group = validate_group(group)?;
        if query.trim().is_empty() {
            return Err(Error::Input("query must not be empty".into()));
        }
        let limit = opts.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Ok((group, limit))
    }

    /// Project scoping against the allow-list. `None` means the request is
    /// valid but can match nothing (non-allowed explicit project).
    fn scope_filter(&self, project: Option<&str>) -> Option<SearchFilter> {
        let explicit = project.filter(|p| !p.is_empty() && *p != "all");

        if self.allowed_projects.is_empty() {
            return Some(match explicit {
                Some(p) => SearchFilter::eq("project", p.to_string()),
                None => SearchFilter::default(),
            });
        }

        match explicit {
            Some(p) if self.allowed_projects.iter().any(|a| a == p) => {
                Some(SearchFilter::eq("project", p.to_string()))
            }
            Some(_) => None,
            None => Some(SearchFilter {
                must: vec![FilterCond::AnyOf {
                    field: "project".to_string(),
                    values: self.allowed_projects.clone(),
                }],
            }),
        }
    }
}

fn empty_output() -> SearchOutput {
    SearchOutput {
        results: Vec::new(),
        total: 0,
        metrics: SearchMetrics::default(),
    }
}

fn into_output(hits: Vec<crate::vector_store::ScoredPayload>, limit: usize) -> SearchOutput {
    let mut results: Vec<SearchResultItem> = hits
        .into_iter()
        .map(|h| SearchResultItem {
            score: h.score,
            chunk: h.payload,
        })
        .collect();
    results.truncate(limit);
    let metrics = compute_metrics(&results);
    SearchOutput {
        total: results.len(),
        results,
        metrics,
    }
}

/// Token-savings math over a result set.
fn compute_metrics(results: &[SearchResultItem]) -> SearchMetrics {
    let tokens_returned: u64 = results
        .iter()
        .map(|r| (r.chunk.content.len() as u64).div_ceil(CHARS_PER_TOKEN))
        .sum();

    // One full-file estimate per distinct file, from its deepest hit.
    let mut max_end_by_file: HashMap<(&str, &str), u64> = HashMap::new();
    for r in results {
        let key = (r.chunk.project.as_str(), r.chunk.file.as_str());
        let entry = max_end_by_file.entry(key).or_insert(0);
        *entry = (*entry).max(r.chunk.end_line as u64);
    }
    let estimated_full_file_tokens: u64 = max_end_by_file
        .values()
        .map(|max_end| (max_end * CHARS_PER_LINE).div_ceil(CHARS_PER_TOKEN))
        .sum();

    let tokens_saved = estimated_full_file_tokens.saturating_sub(tokens_returned);
    let savings_percent = if estimated_full_file_tokens == 0 {
        0
    } else {
        ((tokens_saved as f64 / estimated_full_file_tokens as f64) * 100.0).round() as u64
    };

    SearchMetrics {
        tokens_returned,
        estimated_full_file_tokens,
        tokens_saved,
        savings_percent,
    }
}

// ── Query expansion ─────────────────────────────────────────────────────

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("auth", "authentication"),
    ("authz", "authorization"),
    ("db", "database"),
    ("config", "configuration"),
    ("repo", "repository"),
    ("impl", "implementation"),
    ("func", "function"),
    ("fn", "function"),
    ("msg", "message"),
    ("idx", "index"),
    ("param", "parameter"),
    ("util", "utility"),
    ("env", "environment"),
    ("init", "initialization"),
];

const FILLER_WORDS: &[&str] = &[
    "how", "what", "where", "when", "why", "which", "do", "does", "did", "is", "are", "can",
    "could", "should", "would", "the", "a", "an", "i", "we", "you", "my", "our", "in", "to", "of",
    "for", "it", "this", "that",
];

/// Generate the search variations for a query: the original first, then up
/// to two rewrites, unique, capped at three total.
pub fn query_variations(query: &str) -> Vec<String> {
    let original = query.trim().to_string();
    let mut variations = vec![original.clone()];
    let mut push = |candidate: String| {
        let candidate = candidate.trim().to_string();
        if !candidate.is_empty()
            && variations.len() < MAX_VARIATIONS
            && !variations.contains(&candidate)
        {
            variations.push(candidate);
        }
    };

    push(swap_abbreviations(&original));
    push(rewrite_camel_case(&original));
    push(strip_filler_words(&original));
    push(normalize_plurals(&original));

    variations
}

/// Expand known abbreviations, or contract known long forms.
fn swap_abbreviations(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let lowered = word.to_lowercase();
            for (short, long) in ABBREVIATIONS {
                if lowered == *short {
                    return (*long).to_string();
                }
                if lowered == *long {
                    return (*short).to_string();
                }
            }
            word.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// camelCase words become space-separated; multiword lowercase queries
/// become camelCase.
fn rewrite_camel_case(query: &str) -> String {
    let has_camel = query
        .chars()
        .zip(query.chars().skip(1))
        .any(|(a, b)| a.is_lowercase() && b.is_uppercase());

    if has_camel {
        let mut out = String::with_capacity(query.len() + 4);
        for (i, c) in query.chars().enumerate() {
            if c.is_uppercase() && i > 0 {
                out.push(' ');
            }
            out.push(c.to_ascii_lowercase());
        }
        return out;
    }

    let words: Vec<&str> = query.split_whitespace().collect();
    if words.len() < 2 {
        return query.to_string();
    }
    let mut out = words[0].to_lowercase();
    for word in &words[1..] {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    out
}

/// Drop question filler, keeping the content words.
fn strip_filler_words(query: &str) -> String {
    let looks_like_question = query.trim_end().ends_with('?')
        || query
            .split_whitespace()
            .next()
            .map(|w| FILLER_WORDS.contains(&w.to_lowercase().as_str()))
            .unwrap_or(false);
    if !looks_like_question {
        return query.to_string();
    }
    query
        .trim_end_matches('?')
        .split_whitespace()
        .filter(|w| !FILLER_WORDS.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Naive singularization of trailing plurals.
fn normalize_plurals(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
                &word[..word.len() - 1]
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed_cache::EmbeddingCache;
    use crate::embedding::Embedder;
    use crate::models::point_id_for;
    use crate::vector_store::{MemoryVectorStore, Point};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 8];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % 8] += b as f32 / 255.0;
                    }
                    v
                })
                .collect())
        }
        fn model_name(&self) -> &str {
            "hash"
        }
        fn dims(&self) -> usize {
            8
        }
    }

    fn payload(project: &str, file: &str, hash: &str, content: &str, end_line: u32) -> ChunkPayload {
        ChunkPayload {
            project: project.to_string(),
            file: file.to_string(),
            language: "typescript".to_string(),
            start_line: 1,
            end_line,
            content: content.to_string(),
            hash: hash.to_string(),
            chunk_id: format!("g//{project}//{file}//1-{end_line}//{hash}"),
            symbol_name: None,
            kind: None,
            service: None,
            bounded_context: None,
            tags: Vec::new(),
            last_commit_hash: None,
            last_commit_at: None,
            last_author_email: None,
            ticket_keys: Vec::new(),
            defines_symbols: Vec::new(),
            uses_symbols: Vec::new(),
        }
    }

    struct Fixture {
        _tmp: TempDir,
        engine: QueryEngine,
        store: Arc<MemoryVectorStore>,
        cache: Arc<QueryCache>,
    }

    async fn fixture(allowed: Vec<String>) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryVectorStore::new());
        let embed_cache = EmbeddingCache::open(&tmp.path().join("cache.sqlite"), 1000)
            .await
            .unwrap();
        let embedder = Arc::new(crate::embedding::CachedEmbedder::new(
            Box::new(HashEmbedder),
            embed_cache,
        ));
        let cache = Arc::new(QueryCache::new());
        let engine = QueryEngine::new(store.clone(), embedder, cache.clone(), allowed);
        Fixture {
            _tmp: tmp,
            engine,
            store,
            cache,
        }
    }

    async fn seed(store: &MemoryVectorStore, project: &str, file: &str, hash: &str, content: &str) {
        let p = payload(project, file, hash, content, 10);
        let point = Point {
            id: point_id_for(&p.chunk_id),
            vector: {
                let mut v = vec![0.0f32; 8];
                for (i, b) in content.bytes().enumerate() {
                    v[i % 8] += b as f32 / 255.0;
                }
                v
            },
            payload: p,
        };
        store.upsert("g", vec![point]).await.unwrap();
    }

    #[tokio::test]
    async fn test_search_unknown_group_is_empty_with_zero_metrics() {
        let f = fixture(Vec::new()).await;
        let out = f
            .engine
            .search("never-indexed", "login", &SearchOptions::default())
            .await
            .unwrap();
        assert!(out.results.is_empty());
        assert_eq!(out.total, 0);
        assert_eq!(out.metrics.tokens_returned, 0);
        assert_eq!(out.metrics.tokens_saved, 0);
        assert_eq!(out.metrics.savings_percent, 0);
    }

    #[tokio::test]
    async fn test_search_rejects_empty_inputs() {
        let f = fixture(Vec::new()).await;
        assert!(f.engine.search("g", "  ", &SearchOptions::default()).await.is_err());
        assert!(f.engine.search(" ", "query", &SearchOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_project_filter_limits_results() {
        let f = fixture(Vec::new()).await;
        seed(&f.store, "p1", "a.ts", "h1", "login handler one").await;
        seed(&f.store, "p2", "b.ts", "h2", "login handler two").await;

        let out = f
            .engine
            .search(
                "g",
                "login",
                &SearchOptions {
                    project: Some("p1".to_string()),
                    limit: Some(3),
                },
            )
            .await
            .unwrap();
        assert!(out.total <= 3);
        assert!(out.results.iter().all(|r| r.chunk.project == "p1"));
        assert!(out.metrics.tokens_saved as i64 >= 0);
    }

    #[tokio::test]
    async fn test_limit_clamped() {
        let f = fixture(Vec::new()).await;
        for i in 0..5 {
            seed(&f.store, "p1", &format!("f{i}.ts"), &format!("h{i}"), "same content").await;
        }
        let out = f
            .engine
            .search(
                "g",
                "content",
                &SearchOptions {
                    project: None,
                    limit: Some(100_000),
                },
            )
            .await
            .unwrap();
        assert!(out.total <= MAX_LIMIT);

        let out = f
            .engine
            .search(
                "g",
                "content",
                &SearchOptions {
                    project: None,
                    limit: Some(0),
                },
            )
            .await
            .unwrap();
        assert_eq!(out.total, 1);
    }

    #[tokio::test]
    async fn test_expanded_search_unique_chunks_sorted() {
        let f = fixture(Vec::new()).await;
        seed(&f.store, "p1", "auth.ts", "h1", "auth middleware handler").await;
        seed(&f.store, "p1", "other.ts", "h2", "authentication middleware chain").await;

        let out = f
            .engine
            .expanded_search(
                "g",
                "auth middleware",
                &SearchOptions {
                    project: None,
                    limit: Some(5),
                },
            )
            .await
            .unwrap();

        assert!(out.total <= 5);
        let mut hashes: Vec<&str> = out.results.iter().map(|r| r.chunk.hash.as_str()).collect();
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(hashes.len(), out.results.len(), "chunks must be unique");
        for pair in out.results.windows(2) {
            assert!(pair[0].score >= pair[1].score, "sorted by score desc");
        }
    }

    #[tokio::test]
    async fn test_search_with_filter_conjoins() {
        let f = fixture(Vec::new()).await;
        seed(&f.store, "p1", "a.ts", "h1", "payment processing").await;
        seed(&f.store, "p1", "b.ts", "h2", "payment processing backup").await;

        let additional = SearchFilter::eq("file", "a.ts");
        let out = f
            .engine
            .search_with_filter("g", "payment", &additional, &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(out.total, 1);
        assert_eq!(out.results[0].chunk.file, "a.ts");
    }

    #[tokio::test]
    async fn test_cache_hit_and_group_invalidation() {
        let f = fixture(Vec::new()).await;
        seed(&f.store, "p1", "a.ts", "h1", "cache target").await;

        let opts = SearchOptions::default();
        f.engine.search("g", "cache", &opts).await.unwrap();
        let miss_stats = f.cache.stats();
        assert_eq!(miss_stats.misses, 1);

        f.engine.search("g", "cache", &opts).await.unwrap();
        assert_eq!(f.cache.stats().hits, 1);

        f.cache.invalidate_group("g");
        f.engine.search("g", "cache", &opts).await.unwrap();
        assert_eq!(f.cache.stats().misses, 2, "invalidation forces repopulation");
    }

    #[tokio::test]
    async fn test_invalidation_is_per_group() {
        let f = fixture(Vec::new()).await;
        seed(&f.store, "p1", "a.ts", "h1", "content").await;

        f.engine.search("g", "content", &SearchOptions::default()).await.unwrap();
        f.cache.invalidate_group("other");
        f.engine.search("g", "content", &SearchOptions::default()).await.unwrap();
        assert_eq!(f.cache.stats().hits, 1, "other-group invalidation must not evict");
    }

    #[tokio::test]
    async fn test_allow_list_scoping() {
        let f = fixture(vec!["p1".to_string()]).await;
        seed(&f.store, "p1", "a.ts", "h1", "scoped content").await;
        seed(&f.store, "p2", "b.ts", "h2", "scoped content").await;

        // project=all intersects with the allow-list.
        let out = f
            .engine
            .search(
                "g",
                "scoped",
                &SearchOptions {
                    project: Some("all".to_string()),
                    limit: None,
                },
            )
            .await
            .unwrap();
        assert!(out.results.iter().all(|r| r.chunk.project == "p1"));

        // A non-allowed project yields empty, not an error.
        let out = f
            .engine
            .search(
                "g",
                "scoped",
                &SearchOptions {
                    project: Some("p2".to_string()),
                    limit: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.total, 0);
    }

    #[tokio::test]
    async fn test_find_usages() {
        let f = fixture(Vec::new()).await;
        let mut def = payload("p1", "lib.ts", "h1", "function helper() {}", 3);
        def.defines_symbols = vec!["helper".to_string()];
        let mut usage = payload("p1", "app.ts", "h2", "helper()", 3);
        usage.uses_symbols = vec!["helper".to_string()];
        for p in [def, usage] {
            let point = Point {
                id: point_id_for(&p.chunk_id),
                vector: vec![1.0; 8],
                payload: p,
            };
            f.store.upsert("g", vec![point]).await.unwrap();
        }

        let (defs, uses) = f.engine.find_usages("g", "helper", None).await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].file, "lib.ts");
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].file, "app.ts");
    }

    #[test]
    fn test_variations_cap_and_original_first() {
        let variations = query_variations("how do I configure the auth tokens?");
        assert!(variations.len() <= MAX_VARIATIONS);
        assert_eq!(variations[0], "how do I configure the auth tokens?");
        let unique: std::collections::HashSet<&String> = variations.iter().collect();
        assert_eq!(unique.len(), variations.len());
    }

    #[test]
    fn test_variation_abbreviation_expansion() {
        let variations = query_variations("auth middleware");
        assert!(variations.contains(&"authentication middleware".to_string()));
    }

    #[test]
    fn test_variation_camel_case_both_ways() {
        assert_eq!(rewrite_camel_case("authMiddleware"), "auth middleware");
        assert_eq!(rewrite_camel_case("auth middleware"), "authMiddleware");
    }

    #[test]
    fn test_variation_filler_stripping() {
        assert_eq!(
            strip_filler_words("how does the login session work?"),
            "login session work"
        );
        assert_eq!(strip_filler_words("login session"), "login session");
    }

    #[test]
    fn test_variation_plural_normalization() {
        assert_eq!(normalize_plurals("user sessions"), "user session");
        assert_eq!(normalize_plurals("class"), "class");
    }

    #[test]
    fn test_metrics_math() {
        let results = vec![
            SearchResultItem {
                score: 1.0,
                chunk: payload("p", "a.ts", "h1", &"x".repeat(400), 100),
            },
            SearchResultItem {
                score: 0.9,
                chunk: payload("p", "a.ts", "h2", &"y".repeat(400), 40),
            },
        ];
        let metrics = compute_metrics(&results);
        assert_eq!(metrics.tokens_returned, 200);
        // One file, deepest hit ends at line 100: 100*50/4 = 1250.
        assert_eq!(metrics.estimated_full_file_tokens, 1250);
        assert_eq!(metrics.tokens_saved, 1050);
        assert_eq!(metrics.savings_percent, 84);
    }

    #[test]
    fn test_metrics_empty() {
        let metrics = compute_metrics(&[]);
        assert_eq!(metrics.savings_percent, 0);
        assert_eq!(metrics.tokens_saved, 0);
    }
}
