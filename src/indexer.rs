//! Indexing orchestration.
//!
//! Coordinates the full pipeline: enumerate → chunk → extract symbols →
//! embed (cache-first) → upsert → link symbol edges → git metadata. Owns all
//! writes to the vector store and the metadata store; the watcher calls in
//! here, and the query engine only ever reads.
//!
//! # Idempotence
//!
//! Re-indexing a file whose chunk-hash multiset matches what is already
//! stored is a no-op that only bumps the `skipped` counter. Otherwise the
//! file's points are deleted before the new chunks are upserted, both under
//! a per-`(group, project, file)` lock so concurrent writes to one file
//! cannot interleave.
//!
//! # Failure semantics
//!
//! Per-file faults (unreadable, guard-skipped) are logged and counted;
//! the run continues. A vector-store batch that still fails after retries
//! aborts the whole run with an index error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::ResolvedProject;
use crate::embedding::CachedEmbedder;
use crate::error::{Error, Result};
use crate::git_meta::GitMetaExtractor;
use crate::language;
use crate::meta_store::MetaStore;
use crate::models::{Chunk, IndexStats};
use crate::query::QueryCache;
use crate::scan;
use crate::symbols;
use crate::vector_store::{FilterCond, Point, SearchFilter, VectorStore};

/// Result of indexing one file.
pub struct FileOutcome {
    /// The file's current chunks (written or already present).
    pub chunks: Vec<Chunk>,
    /// True when the content matched what was stored and nothing was written.
    pub skipped: bool,
}

pub struct Indexer {
    store: Arc<dyn VectorStore>,
    meta: MetaStore,
    embedder: Arc<CachedEmbedder>,
    query_cache: Arc<QueryCache>,
    totals: Mutex<IndexStats>,
    file_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        meta: MetaStore,
        embedder: Arc<CachedEmbedder>,
        query_cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            store,
            meta,
            embedder,
            query_cache,
            totals: Mutex::new(IndexStats::default()),
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process-lifetime counters across all runs.
    pub fn stats(&self) -> IndexStats {
        *self.totals.lock().unwrap()
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn embed_cache_stats(&self) -> Result<crate::embed_cache::CacheStats> {
        self.embedder.cache().stats().await
    }

    /// Full project build from its filesystem root. Returns run counters;
    /// the number of chunks written is `stats.chunks`.
    pub async fn index_project(&self, project: &ResolvedProject) -> Result<IndexStats> {
        let root = project
            .root
            .as_deref()
            .ok_or_else(|| Error::Config(format!("project {}: root required for indexing", project.project)))?;

        let files = scan::enumerate_files(root, project)?;
        info!(
            group = %project.group,
            project = %project.project,
            files = files.len(),
            "indexing project"
        );

        self.store
            .ensure_collection(&project.group, self.embedder.dims())
            .await?;

        let run = Mutex::new(IndexStats::default());
        let all_chunks: Mutex<Vec<Chunk>> = Mutex::new(Vec::new());

        let results: Vec<Result<()>> = stream::iter(files.into_iter())
            .map(|path: PathBuf| self.index_one_tracked(project, root, path, &run, &all_chunks))
            .buffer_unordered(project.indexing.concurrency)
            .collect()
            .await;

        for result in results {
            result?;
        }

        let chunks = all_chunks.into_inner().unwrap();

        // Symbol edges link across the whole run scope, so they go in after
        // every chunk upsert has landed.
        let edges = symbols::link_chunks(&chunks);
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        self.meta.replace_edges_for_chunks(&chunk_ids, &edges).await?;

        if project.metadata.git.enabled && GitMetaExtractor::is_repo(root) {
            let extractor = GitMetaExtractor::new(&project.metadata.git.ticket_patterns)?;
            extractor
                .annotate_chunks(
                    root,
                    &project.group,
                    &chunks,
                    project.metadata.git.max_commits_per_file,
                    &self.meta,
                    self.store.as_ref(),
                )
                .await?;
        }

        self.query_cache.invalidate_group(&project.group);

        let run_stats = *run.lock().unwrap();
        self.accumulate(run_stats);
        info!(
            group = %project.group,
            project = %project.project,
            files = run_stats.files,
            chunks = run_stats.chunks,
            skipped = run_stats.skipped,
            errors = run_stats.errors,
            "project indexed"
        );
        Ok(run_stats)
    }

    /// Indexes one file during a full project build, tracking run counters
    /// and accumulated chunks in the shared state passed by the caller.
    async fn index_one_tracked(
        &self,
        project: &ResolvedProject,
        root: &Path,
        path: PathBuf,
        run: &Mutex<IndexStats>,
        all_chunks: &Mutex<Vec<Chunk>>,
    ) -> Result<()> {
        let rel = scan::to_forward_slashes(path.strip_prefix(root).unwrap_or(path.as_path()));
        let content = match scan::read_source_file(&path) {
            Ok(Some(content)) => content,
            Ok(None) => {
                debug!(file = %rel, "skipping binary or non-utf8 file");
                return Ok(());
            }
            Err(e) => {
                warn!(file = %rel, error = %e, "read failed");
                run.lock().unwrap().errors += 1;
                return Ok(());
            }
        };

        match self.index_one(project, &rel, &content, false).await {
            Ok(outcome) => {
                let mut stats = run.lock().unwrap();
                stats.files += 1;
                if outcome.skipped {
                    stats.skipped += 1;
                } else {
                    stats.chunks += outcome.chunks.len() as u64;
                }
                drop(stats);
                all_chunks.lock().unwrap().extend(outcome.chunks);
                Ok(())
            }
            // Store-write failures abort the run; anything else
            // is a per-file fault.
            Err(e @ Error::Index(_)) => Err(e),
            Err(e) => {
                warn!(file = %rel, error = %e, "file failed");
                run.lock().unwrap().errors += 1;
                Ok(())
            }
        }
    }

    /// Incremental single-file index from disk.
    pub async fn index_file(&self, project: &ResolvedProject, abs_path: &Path) -> Result<FileOutcome> {
        let root = project
            .root
            .as_deref()
            .ok_or_else(|| Error::Config(format!("project {}: root required", project.project)))?;
        let rel = scan::to_forward_slashes(abs_path.strip_prefix(root).unwrap_or(abs_path));
        let content = match scan::read_source_file(abs_path) {
            Ok(Some(content)) => content,
            Ok(None) => {
                return Ok(FileOutcome {
                    chunks: Vec::new(),
                    skipped: false,
                })
            }
            Err(e) => return Err(Error::Input(format!("read {rel}: {e}"))),
        };
        self.index_file_content(project, &rel, &content).await
    }

    /// Incremental single-file index from submitted content.
    pub async fn index_file_content(
        &self,
        project: &ResolvedProject,
        rel_path: &str,
        content: &str,
    ) -> Result<FileOutcome> {
        self.store
            .ensure_collection(&project.group, self.embedder.dims())
            .await?;
        let outcome = self.index_one(project, rel_path, content, true).await?;

        let mut totals = self.totals.lock().unwrap();
        totals.files += 1;
        if outcome.skipped {
            totals.skipped += 1;
        } else {
            totals.chunks += outcome.chunks.len() as u64;
        }
        drop(totals);

        if !outcome.skipped {
            self.query_cache.invalidate_group(&project.group);
        }
        Ok(outcome)
    }

    /// Shared file pipeline. With `link` set, symbol edges for the file are
    /// rewritten against the rest of the project.
    async fn index_one(
        &self,
        project: &ResolvedProject,
        rel_path: &str,
        content: &str,
        link: bool,
    ) -> Result<FileOutcome> {
        let key = format!("{}//{}//{}", project.group, project.project, rel_path);
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let language = self.language_for_file(project, rel_path);
        let mut chunks = crate::chunker::chunk_file(
            &project.group,
            &project.project,
            rel_path,
            &language,
            content,
            project.indexing.chunk_size,
            project.max_chunk_size(),
        );

        for chunk in &mut chunks {
            let sets = symbols::extract_symbols(&language, &chunk.content);
            chunk.defines_symbols = sets.defines;
            chunk.uses_symbols = sets.uses;
            self.apply_metadata_defaults(project, chunk);
        }

        let file_filter = SearchFilter::eq("project", project.project.clone()).and(FilterCond::Eq {
            field: "file".to_string(),
            value: rel_path.to_string(),
        });

        // Idempotence check: identical chunk-hash multisets mean nothing to do.
        let existing = self.store.scroll_by_filter(&project.group, &file_filter).await?;
        let mut existing_hashes: Vec<&str> = existing.iter().map(|p| p.hash.as_str()).collect();
        let mut new_hashes: Vec<&str> = chunks.iter().map(|c| c.hash.as_str()).collect();
        existing_hashes.sort_unstable();
        new_hashes.sort_unstable();
        if !existing.is_empty() && existing_hashes == new_hashes {
            debug!(file = rel_path, "unchanged, skipping");
            let cached = self.rebuild_from_payloads(existing);
            return Ok(FileOutcome {
                chunks: cached,
                skipped: true,
            });
        }

        // Delete-before-upsert, all under the per-file lock.
        if !existing.is_empty() {
            self.store.delete_by_filter(&project.group, &file_filter).await?;
            for payload in &existing {
                self.meta.delete_chunk(&payload.chunk_id).await?;
            }
        }

        if chunks.is_empty() {
            return Ok(FileOutcome {
                chunks,
                skipped: false,
            });
        }

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let outcome = self.embedder.embed_passages(&contents).await?;
        self.totals.lock().unwrap().cached += outcome.cache_hits;

        let points: Vec<Point> = chunks
            .iter()
            .zip(outcome.vectors.into_iter())
            .map(|(chunk, vector)| Point {
                id: chunk.point_id(),
                vector,
                payload: chunk.into(),
            })
            .collect();

        for batch in points.chunks(project.indexing.batch_size) {
            self.store
                .upsert(&project.group, batch.to_vec())
                .await
                .map_err(|e| Error::Index(format!("upsert batch: {e}")))?;
        }

        if link {
            self.link_file(project, &chunks).await?;
        }

        Ok(FileOutcome {
            chunks,
            skipped: false,
        })
    }

    /// Rewrite the file's symbol edges against the project's current chunks.
    async fn link_file(&self, project: &ResolvedProject, new_chunks: &[Chunk]) -> Result<()> {
        let project_filter = SearchFilter::eq("project", project.project.clone());
        let payloads = self.store.scroll_by_filter(&project.group, &project_filter).await?;

        let mut scope = self.rebuild_from_payloads(payloads);
        // The freshly upserted chunks are in the scroll already; replace them
        // with the richer in-memory copies.
        let new_ids: Vec<String> = new_chunks.iter().map(|c| c.chunk_id.clone()).collect();
        scope.retain(|c| !new_ids.contains(&c.chunk_id));
        scope.extend(new_chunks.iter().cloned());

        let edges: Vec<_> = symbols::link_chunks(&scope)
            .into_iter()
            .filter(|e| new_ids.contains(&e.from_chunk_id) || new_ids.contains(&e.to_chunk_id))
            .collect();
        self.meta.replace_edges_for_chunks(&new_ids, &edges).await
    }

    /// Remove one file from the index: vector points plus cascaded metadata.
    pub async fn delete_file(&self, group: &str, project_name: &str, file: &str) -> Result<()> {
        let key = format!("{group}//{project_name}//{file}");
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let filter = SearchFilter::eq("project", project_name.to_string()).and(FilterCond::Eq {
            field: "file".to_string(),
            value: file.to_string(),
        });
        self.store.delete_by_filter(group, &filter).await?;
        self.meta.delete_by_file(group, project_name, file).await?;
        self.query_cache.invalidate_group(group);
        Ok(())
    }

    pub async fn delete_project(&self, group: &str, project_name: &str) -> Result<()> {
        let filter = SearchFilter::eq("project", project_name.to_string());
        self.store.delete_by_filter(group, &filter).await?;
        self.meta.delete_by_project(group, project_name).await?;
        self.query_cache.invalidate_group(group);
        Ok(())
    }

    /// Drop the group's collection and rebuild every project in it.
    pub async fn reindex_group(
        &self,
        group: &str,
        projects: &[ResolvedProject],
    ) -> Result<IndexStats> {
        if let Err(e) = self.store.delete_collection(group).await {
            // A collection that never existed is fine to "delete".
            if !matches!(e, Error::NotFound(_)) {
                return Err(e);
            }
        }
        for project in projects {
            self.meta.delete_by_project(group, &project.project).await?;
        }
        self.query_cache.invalidate_group(group);

        let mut combined = IndexStats::default();
        for project in projects.iter().filter(|p| p.group == group) {
            let stats = self.index_project(project).await?;
            combined.files += stats.files;
            combined.chunks += stats.chunks;
            combined.cached += stats.cached;
            combined.errors += stats.errors;
            combined.skipped += stats.skipped;
        }
        Ok(combined)
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.file_locks
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn language_for_file(&self, project: &ResolvedProject, rel_path: &str) -> String {
        let ext = Path::new(rel_path)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        match language::language_for_extension(&ext) {
            Some(lang) => lang.to_string(),
            None => project
                .languages
                .first()
                .cloned()
                .unwrap_or_else(|| "generic".to_string()),
        }
    }

    fn apply_metadata_defaults(&self, project: &ResolvedProject, chunk: &mut Chunk) {
        chunk.service = project.metadata.service.clone();
        chunk.bounded_context = project.metadata.bounded_context.clone();
        let mut tags = project.metadata.tags.clone();
        for (prefix, extra) in &project.metadata.directory_tags {
            if chunk.file.starts_with(prefix.trim_end_matches('/')) {
                for tag in extra {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
            }
        }
        chunk.tags = tags;
    }

    /// Lift scrolled payloads back into chunk records (payload carries every
    /// field the linker and git extractor need).
    fn rebuild_from_payloads(&self, payloads: Vec<crate::vector_store::ChunkPayload>) -> Vec<Chunk> {
        payloads
            .into_iter()
            .map(|p| Chunk {
                group: String::new(),
                project: p.project,
                file: p.file,
                language: p.language,
                start_line: p.start_line,
                end_line: p.end_line,
                content: p.content,
                hash: p.hash,
                chunk_id: p.chunk_id,
                symbol_name: p.symbol_name,
                kind: p.kind,
                service: p.service,
                bounded_context: p.bounded_context,
                tags: p.tags,
                defines_symbols: p.defines_symbols,
                uses_symbols: p.uses_symbols,
                last_commit_hash: p.last_commit_hash,
                last_commit_at: p.last_commit_at,
                last_author_email: p.last_author_email,
                ticket_keys: p.ticket_keys,
            })
            .collect()
    }

    fn accumulate(&self, run: IndexStats) {
        let mut totals = self.totals.lock().unwrap();
        totals.files += run.files;
        totals.chunks += run.chunks;
        totals.cached += run.cached;
        totals.errors += run.errors;
        totals.skipped += run.skipped;
    }
}

#[async_trait::async_trait]
impl crate::watcher::WatchHandler for Indexer {
    async fn on_file_changed(&self, project: &ResolvedProject, path: &Path) -> Result<()> {
        self.index_file(project, path).await.map(|_| ())
    }

    async fn on_file_deleted(&self, project: &ResolvedProject, rel_path: &str) -> Result<()> {
        self.delete_file(&project.group, &project.project, rel_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_project_config;
    use crate::embed_cache::EmbeddingCache;
    use crate::embedding::{Embedder, CachedEmbedder};
    use crate::vector_store::MemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    /// Deterministic embedder: vector derives from byte histogram.
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
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

    struct Fixture {
        _tmp: TempDir,
        indexer: Indexer,
        store: Arc<MemoryVectorStore>,
        project: ResolvedProject,
        root: std::path::PathBuf,
    }

    async fn fixture(config: &str) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();

        let doc = format!("{config}root: {}\n", root.display());
        let project = parse_project_config(&doc).unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        let meta = MetaStore::open(&tmp.path().join("meta.sqlite")).await.unwrap();
        let cache = EmbeddingCache::open(&tmp.path().join("cache.sqlite"), 10_000)
            .await
            .unwrap();
        let embedder = Arc::new(CachedEmbedder::new(Box::new(HashEmbedder), cache));
        let indexer = Indexer::new(
            store.clone(),
            meta,
            embedder,
            Arc::new(QueryCache::new()),
        );
        Fixture {
            _tmp: tmp,
            indexer,
            store,
            project,
            root,
        }
    }

    const TS_PROJECT: &str = "group: g\nproject: p\nlanguage: typescript\nmetadata:\n  git:\n    enabled: false\n";

    #[tokio::test]
    async fn test_index_project_counts_chunks() {
        let f = fixture(TS_PROJECT).await;
        std::fs::write(
            f.root.join("a.ts"),
            "function one() { return 1; }\nfunction two() { return 2; }\n",
        )
        .unwrap();
        std::fs::write(f.root.join("b.ts"), "function three() { return 3; }\n").unwrap();

        let stats = f.indexer.index_project(&f.project).await.unwrap();
        assert_eq!(stats.files, 2);
        assert!(stats.chunks >= 2);
        assert_eq!(stats.errors, 0);

        let stored = f
            .store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len() as u64, stats.chunks);
    }

    #[tokio::test]
    async fn test_reindex_unchanged_project_skips_all_files() {
        let f = fixture(TS_PROJECT).await;
        std::fs::write(f.root.join("a.ts"), "function one() { return 1; }\n").unwrap();
        std::fs::write(f.root.join("b.ts"), "function two() { return 2; }\n").unwrap();

        let first = f.indexer.index_project(&f.project).await.unwrap();
        assert_eq!(first.skipped, 0);
        assert!(first.chunks > 0);

        let second = f.indexer.index_project(&f.project).await.unwrap();
        assert_eq!(second.chunks, 0);
        assert_eq!(second.skipped, 2);
    }

    #[tokio::test]
    async fn test_index_file_content_idempotent_no_write() {
        let f = fixture(TS_PROJECT).await;
        let content = "function stable() { return 7; }\n";

        f.indexer
            .index_file_content(&f.project, "src/x.ts", content)
            .await
            .unwrap();
        let upserts_before = f.store.upsert_calls.load(Ordering::SeqCst);
        let deletes_before = f.store.delete_calls.load(Ordering::SeqCst);
        let skipped_before = f.indexer.stats().skipped;

        let outcome = f
            .indexer
            .index_file_content(&f.project, "src/x.ts", content)
            .await
            .unwrap();
        assert!(outcome.skipped);
        assert_eq!(f.store.upsert_calls.load(Ordering::SeqCst), upserts_before);
        assert_eq!(f.store.delete_calls.load(Ordering::SeqCst), deletes_before);
        assert_eq!(f.indexer.stats().skipped, skipped_before + 1);
    }

    #[tokio::test]
    async fn test_changed_file_deletes_before_upsert() {
        let f = fixture(TS_PROJECT).await;
        f.indexer
            .index_file_content(&f.project, "x.ts", "function a() { return 1; }\n")
            .await
            .unwrap();
        f.indexer
            .index_file_content(&f.project, "x.ts", "function b() { return 2; }\n")
            .await
            .unwrap();

        let stored = f
            .store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1, "old chunks must be gone");
        assert!(stored[0].content.contains("function b"));
    }

    #[tokio::test]
    async fn test_symbol_edges_cross_file() {
        let f = fixture(TS_PROJECT).await;
        std::fs::write(f.root.join("caller.ts"), "function caller() { return helper(); }\n")
            .unwrap();
        std::fs::write(f.root.join("lib.ts"), "function helper() { return 1; }\n").unwrap();

        f.indexer.index_project(&f.project).await.unwrap();

        let stored = f
            .store
            .scroll_by_filter("g", &SearchFilter::eq("file", "caller.ts"))
            .await
            .unwrap();
        let caller_id = &stored[0].chunk_id;
        let edges = f.indexer.meta().get_edges_from(caller_id).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].symbol_name, "helper");
    }

    #[tokio::test]
    async fn test_reindexed_file_rewrites_edges() {
        let f = fixture(TS_PROJECT).await;
        f.indexer
            .index_file_content(&f.project, "lib.ts", "function helper() { return 1; }\n")
            .await
            .unwrap();
        f.indexer
            .index_file_content(&f.project, "caller.ts", "function caller() { return helper(); }\n")
            .await
            .unwrap();

        let stored = f
            .store
            .scroll_by_filter("g", &SearchFilter::eq("file", "caller.ts"))
            .await
            .unwrap();
        let old_id = stored[0].chunk_id.clone();
        assert_eq!(f.indexer.meta().get_edges_from(&old_id).await.unwrap().len(), 1);

        // The rewrite no longer calls helper; the old edge must be gone.
        f.indexer
            .index_file_content(&f.project, "caller.ts", "function caller() { return 2; }\n")
            .await
            .unwrap();
        assert!(f.indexer.meta().get_edges_from(&old_id).await.unwrap().is_empty());
        let restored = f
            .store
            .scroll_by_filter("g", &SearchFilter::eq("file", "caller.ts"))
            .await
            .unwrap();
        assert!(f
            .indexer
            .meta()
            .get_edges_from(&restored[0].chunk_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_file_cascades() {
        let f = fixture(TS_PROJECT).await;
        f.indexer
            .index_file_content(&f.project, "x.ts", "function gone() { return 1; }\n")
            .await
            .unwrap();
        let stored = f
            .store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap();
        let chunk_id = stored[0].chunk_id.clone();

        f.indexer.delete_file("g", "p", "x.ts").await.unwrap();

        assert!(f
            .store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(f.indexer.meta().get_commits(&chunk_id, None).await.unwrap().is_empty());
        assert!(f.indexer.meta().get_edges_from(&chunk_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_then_reindex_restores_same_chunk_ids() {
        let f = fixture(TS_PROJECT).await;
        std::fs::write(f.root.join("a.ts"), "function alpha() { return 1; }\n").unwrap();

        f.indexer.index_project(&f.project).await.unwrap();
        let before: Vec<String> = f
            .store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.chunk_id)
            .collect();

        f.indexer.delete_project("g", "p").await.unwrap();
        f.indexer.index_project(&f.project).await.unwrap();
        let after: Vec<String> = f
            .store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.chunk_id)
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_metadata_defaults_and_directory_tags() {
        let config = "group: g\nproject: p\nlanguage: typescript\nmetadata:\n  service: billing\n  bounded_context: payments\n  tags: [backend]\n  directory_tags:\n    src/routes: [http]\n  git:\n    enabled: false\n";
        let f = fixture(config).await;
        f.indexer
            .index_file_content(&f.project, "src/routes/pay.ts", "function pay() { return 1; }\n")
            .await
            .unwrap();

        let stored = f
            .store
            .scroll_by_filter("g", &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(stored[0].service.as_deref(), Some("billing"));
        assert_eq!(stored[0].bounded_context.as_deref(), Some("payments"));
        assert!(stored[0].tags.contains(&"backend".to_string()));
        assert!(stored[0].tags.contains(&"http".to_string()));
    }

    #[tokio::test]
    async fn test_embedding_cache_counts_cached() {
        let f = fixture(TS_PROJECT).await;
        let content = "function cached() { return 1; }\n";
        f.indexer
            .index_file_content(&f.project, "a.ts", content)
            .await
            .unwrap();
        // Same content under a different file misses the idempotence check
        // but hits the embedding cache.
        f.indexer
            .index_file_content(&f.project, "b.ts", content)
            .await
            .unwrap();
        assert!(f.indexer.stats().cached >= 1);
    }
}
