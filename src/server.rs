//! JSON/HTTP admin API.
//!
//! A thin translation layer over the indexer and query engine. Its own
//! responsibilities are request validation (400), shutdown gating (503 while
//! draining), and a per-endpoint timeout race (504).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/search` | Similarity search within a group |
//! | `POST` | `/api/index` | Index submitted file contents |
//! | `POST` | `/api/file-changed` | Reindex one file of a registered project |
//! | `POST` | `/api/file-deleted` | Remove one file from the index |
//! | `GET`  | `/health` | Liveness + vector-store reachability |
//! | `GET`  | `/api/stats` | Counters: projects, caches, watchers, memory |
//!
//! Error responses carry a short machine-readable `error` code; verbose
//! detail stays in the logs.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::{parse_project_config, ResolvedProject};
use crate::error::Error;
use crate::indexer::Indexer;
use crate::language;
use crate::models::validate_group;
use crate::query::{QueryEngine, SearchOptions};
use crate::watcher::{ProjectWatcher, WatcherStats};

/// Registered projects, keyed by `(group, project)`. `/api/file-changed`
/// refuses unknown pairs; the watcher and reindex tools iterate this.
#[derive(Default)]
pub struct ProjectRegistry {
    projects: Mutex<HashMap<(String, String), Arc<ResolvedProject>>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, project: ResolvedProject) {
        let key = (project.group.clone(), project.project.clone());
        self.projects.lock().unwrap().insert(key, Arc::new(project));
    }

    pub fn get(&self, group: &str, project: &str) -> Option<Arc<ResolvedProject>> {
        self.projects
            .lock()
            .unwrap()
            .get(&(group.to_string(), project.to_string()))
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<ResolvedProject>> {
        let mut all: Vec<_> = self.projects.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| (&a.group, &a.project).cmp(&(&b.group, &b.project)));
        all
    }

    pub fn by_group(&self, group: &str) -> Vec<Arc<ResolvedProject>> {
        self.list().into_iter().filter(|p| p.group == group).collect()
    }
}

/// Everything the HTTP and MCP surfaces share.
pub struct AppContext {
    pub engine: Arc<QueryEngine>,
    pub indexer: Arc<Indexer>,
    pub registry: Arc<ProjectRegistry>,
    pub watchers: Mutex<Vec<Arc<ProjectWatcher>>>,
    pub shutting_down: AtomicBool,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(
        engine: Arc<QueryEngine>,
        indexer: Arc<Indexer>,
        registry: Arc<ProjectRegistry>,
    ) -> Self {
        Self {
            engine,
            indexer,
            registry,
            watchers: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Flip into drain mode and stop the watchers (bounded).
    pub async fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let watchers: Vec<_> = self.watchers.lock().unwrap().drain(..).collect();
        for watcher in watchers {
            watcher.shutdown().await;
        }
        self.engine.cache().clear();
        info!("drain complete");
    }

    pub fn watcher_stats(&self) -> Vec<WatcherStats> {
        self.watchers.lock().unwrap().iter().map(|w| w.stats()).collect()
    }
}

type SharedContext = Arc<AppContext>;

/// Build the admin router. MCP routes are merged in by the caller.
pub fn build_router(ctx: SharedContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/search", post(handle_search))
        .route("/api/index", post(handle_index))
        .route("/api/file-changed", post(handle_file_changed))
        .route("/api/file-deleted", post(handle_file_deleted))
        .route("/health", get(handle_health))
        .route("/api/stats", get(handle_stats))
        .layer(cors)
        .with_state(ctx)
}

// ── Error plumbing ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        // Full detail goes to the log; the response carries the short form.
        if e.http_status() >= 500 {
            tracing::warn!(code = e.code(), error = %e, "request failed");
        }
        AppError {
            status: StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "shutting_down".to_string(),
        message: message.into(),
    }
}

/// Race a handler body against its deadline; expired requests get a 504.
async fn with_timeout<T, F>(ctx: &AppContext, limit: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    if ctx.is_draining() {
        return Err(unavailable("server is shutting down"));
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::from(Error::Timeout("request deadline exceeded".into()))),
    }
}

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
const INDEX_TIMEOUT: Duration = Duration::from_secs(300);

// ── POST /api/search ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchRequest {
    group: Option<String>,
    query: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_search(
    State(ctx): State<SharedContext>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<crate::query::SearchOutput>, AppError> {
    let group = req.group.ok_or_else(|| bad_request("group is required"))?;
    let query = req.query.ok_or_else(|| bad_request("query is required"))?;

    let output = with_timeout(&ctx, SEARCH_TIMEOUT, async {
        ctx.engine
            .search(
                &group,
                &query,
                &SearchOptions {
                    project: req.project.clone(),
                    limit: req.limit,
                },
            )
            .await
            .map_err(AppError::from)
    })
    .await?;

    Ok(Json(output))
}

// ── POST /api/index ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct IndexRequest {
    group: Option<String>,
    project: Option<String>,
    #[serde(default)]
    files: Vec<IndexFileEntry>,
}

#[derive(Deserialize)]
struct IndexFileEntry {
    path: String,
    content: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Serialize)]
struct IndexResponse {
    status: &'static str,
    group: String,
    project: String,
    chunks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<u64>,
}

async fn handle_index(
    State(ctx): State<SharedContext>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    let group = req.group.ok_or_else(|| bad_request("group is required"))?;
    let project_name = req.project.ok_or_else(|| bad_request("project is required"))?;
    if req.files.is_empty() {
        return Err(bad_request("files must not be empty"));
    }
    let group = validate_group(&group).map_err(AppError::from)?;

    let project = match ctx.registry.get(&group, &project_name) {
        Some(p) => p,
        None => Arc::new(inline_project(&group, &project_name, &req.files)?),
    };

    let response = with_timeout(&ctx, INDEX_TIMEOUT, async {
        let mut chunks = 0u64;
        let mut skipped = 0u64;
        let mut errors = 0u64;
        for file in &req.files {
            match ctx
                .indexer
                .index_file_content(&project, &file.path, &file.content)
                .await
            {
                Ok(outcome) if outcome.skipped => skipped += 1,
                Ok(outcome) => chunks += outcome.chunks.len() as u64,
                Err(e) => {
                    tracing::warn!(file = %file.path, error = %e, "inline index failed");
                    errors += 1;
                }
            }
        }
        Ok(IndexResponse {
            status: "ok",
            group: group.clone(),
            project: project_name.clone(),
            chunks,
            skipped: (skipped > 0).then_some(skipped),
            errors: (errors > 0).then_some(errors),
        })
    })
    .await?;

    Ok(Json(response))
}

/// Build a transient project config for inline submissions: language from
/// the request or file extensions, defaults everywhere else.
fn inline_project(
    group: &str,
    project: &str,
    files: &[IndexFileEntry],
) -> Result<ResolvedProject, AppError> {
    let mut languages: Vec<String> = files
        .iter()
        .filter_map(|f| {
            f.language.clone().or_else(|| {
                std::path::Path::new(&f.path)
                    .extension()
                    .and_then(|e| language::language_for_extension(&e.to_string_lossy()))
                    .map(str::to_string)
            })
        })
        .collect();
    languages.sort();
    languages.dedup();
    if languages.is_empty() {
        languages.push("generic".to_string());
    }

    let doc = format!(
        "group: {group}\nproject: {project}\nlanguage: [{}]\n",
        languages.join(", ")
    );
    parse_project_config(&doc).map_err(AppError::from)
}

// ── POST /api/file-changed ──────────────────────────────────────────────

#[derive(Deserialize)]
struct FileChangedRequest {
    group: Option<String>,
    project: Option<String>,
    path: Option<String>,
    content: Option<String>,
}

#[derive(Serialize)]
struct OkMessage {
    status: &'static str,
    message: &'static str,
}

async fn handle_file_changed(
    State(ctx): State<SharedContext>,
    Json(req): Json<FileChangedRequest>,
) -> Result<Json<OkMessage>, AppError> {
    let group = req.group.ok_or_else(|| bad_request("group is required"))?;
    let project_name = req.project.ok_or_else(|| bad_request("project is required"))?;
    let path = req.path.ok_or_else(|| bad_request("path is required"))?;
    let content = req.content.ok_or_else(|| bad_request("content is required"))?;
    let group = validate_group(&group).map_err(AppError::from)?;

    let Some(project) = ctx.registry.get(&group, &project_name) else {
        return Err(bad_request(format!(
            "project {project_name:?} is not registered in group {group:?}"
        )));
    };

    with_timeout(&ctx, INDEX_TIMEOUT, async {
        ctx.indexer
            .index_file_content(&project, &path, &content)
            .await
            .map_err(AppError::from)
    })
    .await?;

    Ok(Json(OkMessage {
        status: "ok",
        message: "File reindexed",
    }))
}

// ── POST /api/file-deleted ──────────────────────────────────────────────

#[derive(Deserialize)]
struct FileDeletedRequest {
    group: Option<String>,
    project: Option<String>,
    path: Option<String>,
}

async fn handle_file_deleted(
    State(ctx): State<SharedContext>,
    Json(req): Json<FileDeletedRequest>,
) -> Result<Json<OkMessage>, AppError> {
    let group = req.group.ok_or_else(|| bad_request("group is required"))?;
    let project = req.project.ok_or_else(|| bad_request("project is required"))?;
    let path = req.path.ok_or_else(|| bad_request("path is required"))?;
    let group = validate_group(&group).map_err(AppError::from)?;

    with_timeout(&ctx, INDEX_TIMEOUT, async {
        ctx.indexer
            .delete_file(&group, &project, &path)
            .await
            .map_err(AppError::from)
    })
    .await?;

    Ok(Json(OkMessage {
        status: "ok",
        message: "File removed from index",
    }))
}

// ── GET /health ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    groups: usize,
    uptime: u64,
    memory: MemoryStats,
}

async fn handle_health(State(ctx): State<SharedContext>) -> Response {
    if ctx.is_draining() {
        return unavailable("server is shutting down").into_response();
    }

    let probe = tokio::time::timeout(Duration::from_secs(3), async {
        ctx.indexer.store().healthz().await?;
        ctx.indexer.store().list_collections().await
    })
    .await;

    match probe {
        Ok(Ok(collections)) => Json(HealthResponse {
            status: "ok",
            groups: collections.len(),
            uptime: ctx.started_at.elapsed().as_secs(),
            memory: memory_stats(),
        })
        .into_response(),
        Ok(Err(e)) => AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "upstream_error".to_string(),
            message: e.to_string(),
        }
        .into_response(),
        Err(_) => AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "timeout".to_string(),
            message: "vector store health check timed out".to_string(),
        }
        .into_response(),
    }
}

// ── GET /api/stats ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatsResponse {
    groups: Vec<String>,
    #[serde(rename = "registeredProjects")]
    registered_projects: Vec<String>,
    cache: CacheSection,
    watcher: Vec<WatcherStats>,
    usage: crate::models::IndexStats,
    memory: MemoryStats,
}

#[derive(Serialize)]
struct CacheSection {
    embeddings: crate::embed_cache::CacheStats,
    queries: crate::query::QueryCacheStats,
}

async fn handle_stats(State(ctx): State<SharedContext>) -> Result<Json<StatsResponse>, AppError> {
    with_timeout(&ctx, SEARCH_TIMEOUT, async {
        let groups = ctx
            .indexer
            .store()
            .list_collections()
            .await
            .unwrap_or_default();
        let registered = ctx
            .registry
            .list()
            .iter()
            .map(|p| format!("{}/{}", p.group, p.project))
            .collect();

        Ok(Json(StatsResponse {
            groups,
            registered_projects: registered,
            cache: CacheSection {
                embeddings: ctx
                    .indexer
                    .embed_cache_stats()
                    .await
                    .map_err(AppError::from)?,
                queries: ctx.engine.cache().stats(),
            },
            watcher: ctx.watcher_stats(),
            usage: ctx.indexer.stats(),
            memory: memory_stats(),
        }))
    })
    .await
}

// ── Memory probe ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStats {
    #[serde(rename = "heapUsed")]
    pub heap_used: u64,
    #[serde(rename = "heapTotal")]
    pub heap_total: u64,
    pub percent: u64,
}

/// Resident/virtual sizes from procfs; zeros where unavailable.
fn memory_stats() -> MemoryStats {
    let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
    let field = |name: &str| -> u64 {
        status
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };
    let heap_used = field("VmRSS:");
    let heap_total = field("VmSize:");
    let percent = if heap_total == 0 {
        0
    } else {
        heap_used * 100 / heap_total
    };
    MemoryStats {
        heap_used,
        heap_total,
        percent,
    }
}
