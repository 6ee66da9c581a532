//! MCP tool server.
//!
//! Two endpoints share one handler type: the *coding* surface exposes
//! `search_code`, `get_chunk`, `find_usages`, `health_check`, and `reindex`;
//! the *support* surface adds `get_chunk_meta`, `search_changes`,
//! `explain_feature`, `recent_changes`, and `impact_analysis`. Orchestration
//! tools compose query-engine calls and metadata lookups into markdown with
//! location tables, timelines, and dependency sections.
//!
//! Sessions are owned by the transport: the streamable-HTTP service mints an
//! opaque id in the `mcp-session-id` response header, accepts unknown ids as
//! new sessions, and reaps idle ones. The handler itself is stateless per
//! request; everything it needs is behind `Arc`.
//!
//! `reindex` returns immediately with a job id and does the work in the
//! background; job status lives in an in-process registry.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::query::{SearchOptions, SearchOutput};
use crate::server::AppContext;
use crate::vector_store::ChunkPayload;

/// Which tool surface an endpoint exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSet {
    Coding,
    Support,
}

/// Background reindex job states.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done { chunks: u64, files: u64 },
    Failed { error: String },
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.jobs.lock().unwrap().insert(id.clone(), JobStatus::Queued);
        id
    }

    fn set(&self, id: &str, status: JobStatus) {
        self.jobs.lock().unwrap().insert(id.to_string(), status);
    }

    pub fn get(&self, id: &str) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(id).cloned()
    }
}

/// The MCP handler; cloned per session by the transport.
#[derive(Clone)]
pub struct McpServer {
    ctx: Arc<AppContext>,
    jobs: Arc<JobRegistry>,
    toolset: ToolSet,
}

impl McpServer {
    pub fn new(ctx: Arc<AppContext>, jobs: Arc<JobRegistry>, toolset: ToolSet) -> Self {
        Self { ctx, jobs, toolset }
    }

    fn tool(name: &str, description: &str, schema: serde_json::Value) -> Tool {
        let input_schema = match schema {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };
        Tool {
            name: Cow::Owned(name.to_string()),
            title: None,
            description: Some(Cow::Owned(description.to_string())),
            input_schema,
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        }
    }

    fn tool_descriptors(&self) -> Vec<Tool> {
        let mut tools = vec![
            Self::tool(
                "search_code",
                "Semantic code search with query expansion. Returns matching chunks with locations and scores.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "group": {"type": "string", "description": "Tenant group to search"},
                        "query": {"type": "string", "description": "Natural language, question, or code query"},
                        "project": {"type": "string", "description": "Optional project filter; 'all' for every allowed project"},
                        "limit": {"type": "integer", "description": "Max results (1-100, default 5)"}
                    },
                    "required": ["group", "query"]
                }),
            ),
            Self::tool(
                "get_chunk",
                "Fetch one indexed chunk by its chunk id.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "group": {"type": "string"},
                        "chunk_id": {"type": "string"}
                    },
                    "required": ["group", "chunk_id"]
                }),
            ),
            Self::tool(
                "find_usages",
                "Find chunks defining a symbol and the chunks using it.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "group": {"type": "string"},
                        "symbol": {"type": "string"},
                        "project": {"type": "string"}
                    },
                    "required": ["group", "symbol"]
                }),
            ),
            Self::tool(
                "health_check",
                "Check the index service and its vector store.",
                serde_json::json!({"type": "object", "properties": {}}),
            ),
            Self::tool(
                "reindex",
                "Rebuild a group's index in the background. Returns a job id immediately.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "group": {"type": "string"},
                        "job_id": {"type": "string", "description": "Poll a previously started job instead of starting a new one"}
                    },
                    "required": []
                }),
            ),
        ];

        if self.toolset == ToolSet::Support {
            tools.extend([
                Self::tool(
                    "get_chunk_meta",
                    "Commits, tickets, and symbol edges recorded for a chunk.",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "group": {"type": "string"},
                            "chunk_id": {"type": "string"}
                        },
                        "required": ["group", "chunk_id"]
                    }),
                ),
                Self::tool(
                    "search_changes",
                    "Find code touched by a ticket, or search code and report its change history.",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "group": {"type": "string"},
                            "query": {"type": "string"},
                            "ticket": {"type": "string", "description": "Ticket key, e.g. PAY-123 or #42"}
                        },
                        "required": ["group"]
                    }),
                ),
                Self::tool(
                    "explain_feature",
                    "Explain where a feature lives: locations, change timeline, and dependencies.",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "group": {"type": "string"},
                            "query": {"type": "string"},
                            "project": {"type": "string"}
                        },
                        "required": ["group", "query"]
                    }),
                ),
                Self::tool(
                    "recent_changes",
                    "Most recent commits across a group or project.",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "group": {"type": "string"},
                            "project": {"type": "string"},
                            "limit": {"type": "integer"}
                        },
                        "required": ["group"]
                    }),
                ),
                Self::tool(
                    "impact_analysis",
                    "What would break: walk incoming call edges from a chunk or symbol.",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "group": {"type": "string"},
                            "chunk_id": {"type": "string"},
                            "symbol": {"type": "string"}
                        },
                        "required": ["group"]
                    }),
                ),
            ]);
        }
        tools
    }

    /// Tool dispatch; returns the response text.
    async fn run_tool(&self, name: &str, args: &serde_json::Value) -> Result<String> {
        match (name, self.toolset) {
            ("search_code", _) => self.tool_search_code(args).await,
            ("get_chunk", _) => self.tool_get_chunk(args).await,
            ("find_usages", _) => self.tool_find_usages(args).await,
            ("health_check", _) => self.tool_health_check().await,
            ("reindex", _) => self.tool_reindex(args).await,
            ("get_chunk_meta", ToolSet::Support) => self.tool_get_chunk_meta(args).await,
            ("search_changes", ToolSet::Support) => self.tool_search_changes(args).await,
            ("explain_feature", ToolSet::Support) => self.tool_explain_feature(args).await,
            ("recent_changes", ToolSet::Support) => self.tool_recent_changes(args).await,
            ("impact_analysis", ToolSet::Support) => self.tool_impact_analysis(args).await,
            _ => Err(Error::NotFound(format!("no tool named {name:?}"))),
        }
    }

    // ── Coding tools ────────────────────────────────────────────────────

    async fn tool_search_code(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let query = required_str(args, "query")?;
        let opts = SearchOptions {
            project: optional_str(args, "project"),
            limit: args.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize),
        };
        let output = self.ctx.engine.expanded_search(&group, &query, &opts).await?;
        Ok(format_search_output(&query, &output))
    }

    async fn tool_get_chunk(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let chunk_id = required_str(args, "chunk_id")?;
        let chunk = self
            .ctx
            .engine
            .get_chunk(&group, &chunk_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chunk {chunk_id}")))?;
        Ok(format_chunk(&chunk))
    }

    async fn tool_find_usages(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let symbol = required_str(args, "symbol")?;
        let project = optional_str(args, "project");
        let (definitions, usages) = self
            .ctx
            .engine
            .find_usages(&group, &symbol, project.as_deref())
            .await?;

        let mut out = format!("# Usages of `{symbol}`\n\n## Defined in\n\n");
        if definitions.is_empty() {
            out.push_str("_No definitions found._\n");
        } else {
            out.push_str(&location_table(&definitions));
        }
        out.push_str("\n## Used by\n\n");
        if usages.is_empty() {
            out.push_str("_No usages found._\n");
        } else {
            out.push_str(&location_table(&usages));
        }
        Ok(out)
    }

    async fn tool_health_check(&self) -> Result<String> {
        match self.ctx.indexer.store().healthz().await {
            Ok(()) => {
                let groups = self.ctx.indexer.store().list_collections().await?;
                Ok(format!(
                    "Service healthy. {} group(s) indexed: {}",
                    groups.len(),
                    if groups.is_empty() {
                        "-".to_string()
                    } else {
                        groups.join(", ")
                    }
                ))
            }
            Err(e) => Ok(format!("Service degraded: vector store unreachable ({e})")),
        }
    }

    async fn tool_reindex(&self, args: &serde_json::Value) -> Result<String> {
        // Polling mode: report an existing job.
        if let Some(job_id) = optional_str(args, "job_id") {
            return match self.jobs.get(&job_id) {
                Some(status) => Ok(format!(
                    "Job {job_id}: {}",
                    serde_json::to_string(&status).unwrap_or_default()
                )),
                None => Err(Error::NotFound(format!("job {job_id}"))),
            };
        }

        let group = required_str(args, "group")?;
        let group = crate::models::validate_group(&group)?;
        let projects: Vec<_> = self
            .ctx
            .registry
            .by_group(&group)
            .iter()
            .map(|p| (**p).clone())
            .collect();
        if projects.is_empty() {
            return Err(Error::NotFound(format!("no registered projects in group {group:?}")));
        }

        let job_id = self.jobs.create();
        let jobs = self.jobs.clone();
        let indexer = self.ctx.indexer.clone();
        let job_for_task = job_id.clone();
        let group_for_task = group.clone();
        tokio::spawn(async move {
            jobs.set(&job_for_task, JobStatus::Running);
            info!(group = %group_for_task, job = %job_for_task, "background reindex started");
            match indexer.reindex_group(&group_for_task, &projects).await {
                Ok(stats) => jobs.set(
                    &job_for_task,
                    JobStatus::Done {
                        chunks: stats.chunks,
                        files: stats.files,
                    },
                ),
                Err(e) => {
                    error!(group = %group_for_task, job = %job_for_task, error = %e, "reindex failed");
                    jobs.set(&job_for_task, JobStatus::Failed { error: e.to_string() });
                }
            }
        });

        Ok(format!(
            "Reindex of group `{group}` started in the background. Job id: `{job_id}`. \
             Call reindex with job_id to poll."
        ))
    }

    // ── Support tools ───────────────────────────────────────────────────

    async fn tool_get_chunk_meta(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let chunk_id = required_str(args, "chunk_id")?;
        crate::models::validate_group(&group)?;

        let meta = self.ctx.indexer.meta();
        let commits = meta.get_commits(&chunk_id, None).await?;
        let tickets = meta.get_tickets(&chunk_id).await?;
        let outgoing = meta.get_edges_from(&chunk_id).await?;
        let incoming = meta.get_edges_to(&chunk_id).await?;

        let mut out = format!("# Metadata for `{chunk_id}`\n\n## Commits\n\n");
        if commits.is_empty() {
            out.push_str("_None recorded._\n");
        } else {
            out.push_str("| Commit | Date | Author | Summary |\n|---|---|---|---|\n");
            for c in &commits {
                out.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    short_hash(&c.commit_hash),
                    c.committed_at.format("%Y-%m-%d"),
                    c.author_email,
                    c.message_summary
                ));
            }
        }

        out.push_str("\n## Tickets\n\n");
        if tickets.is_empty() {
            out.push_str("_None recorded._\n");
        } else {
            for t in &tickets {
                out.push_str(&format!("- {} ({})\n", t.ticket_key, t.source.as_str()));
            }
        }

        out.push_str("\n## Edges\n\n");
        for edge in &outgoing {
            out.push_str(&format!(
                "- calls `{}` → `{}`\n",
                edge.symbol_name, edge.to_chunk_id
            ));
        }
        for edge in &incoming {
            out.push_str(&format!(
                "- called via `{}` ← `{}`\n",
                edge.symbol_name, edge.from_chunk_id
            ));
        }
        if outgoing.is_empty() && incoming.is_empty() {
            out.push_str("_No symbol edges._\n");
        }
        Ok(out)
    }

    async fn tool_search_changes(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let group = crate::models::validate_group(&group)?;

        if let Some(ticket) = optional_str(args, "ticket") {
            let chunk_ids = self.ctx.indexer.meta().chunks_for_ticket(&group, &ticket).await?;
            if chunk_ids.is_empty() {
                return Ok(format!("No indexed code references ticket `{ticket}`."));
            }
            let mut out = format!("# Code touched by `{ticket}`\n\n");
            let mut payloads = Vec::new();
            for chunk_id in &chunk_ids {
                if let Some(p) = self.ctx.engine.get_chunk(&group, chunk_id).await? {
                    payloads.push(p);
                }
            }
            out.push_str(&location_table(&payloads));
            return Ok(out);
        }

        let query = optional_str(args, "query")
            .ok_or_else(|| Error::Input("either query or ticket is required".into()))?;
        let output = self
            .ctx
            .engine
            .expanded_search(&group, &query, &SearchOptions::default())
            .await?;

        let mut out = format!("# Changes around \"{query}\"\n\n");
        if output.results.is_empty() {
            out.push_str("_No matches._\n");
            return Ok(out);
        }
        out.push_str("| Location | Last commit | When | Author | Tickets |\n|---|---|---|---|---|\n");
        for item in &output.results {
            let latest = self
                .ctx
                .indexer
                .meta()
                .get_latest_commit(&item.chunk.chunk_id)
                .await?;
            let (hash, when, author) = match &latest {
                Some(c) => (
                    short_hash(&c.commit_hash),
                    c.committed_at.format("%Y-%m-%d").to_string(),
                    c.author_email.clone(),
                ),
                None => ("-".to_string(), "-".to_string(), "-".to_string()),
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                location(&item.chunk),
                hash,
                when,
                author,
                if item.chunk.ticket_keys.is_empty() {
                    "-".to_string()
                } else {
                    item.chunk.ticket_keys.join(", ")
                }
            ));
        }
        Ok(out)
    }

    async fn tool_explain_feature(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let query = required_str(args, "query")?;
        let opts = SearchOptions {
            project: optional_str(args, "project"),
            limit: Some(8),
        };
        let output = self.ctx.engine.expanded_search(&group, &query, &opts).await?;
        if output.results.is_empty() {
            return Ok(format!("No indexed code matches \"{query}\"."));
        }

        let mut out = format!("# Feature: {query}\n\n## Locations\n\n");
        let payloads: Vec<ChunkPayload> =
            output.results.iter().map(|r| r.chunk.clone()).collect();
        out.push_str(&location_table(&payloads));

        // Timeline across all matched chunks, newest first.
        let meta = self.ctx.indexer.meta();
        let mut timeline = Vec::new();
        for item in &output.results {
            timeline.extend(meta.get_commits(&item.chunk.chunk_id, Some(5)).await?);
        }
        timeline.sort_by(|a, b| b.committed_at.cmp(&a.committed_at));
        timeline.dedup_by(|a, b| a.commit_hash == b.commit_hash);
        out.push_str("\n## Timeline\n\n");
        if timeline.is_empty() {
            out.push_str("_No commit history recorded._\n");
        } else {
            for c in timeline.iter().take(10) {
                out.push_str(&format!(
                    "- {} — {} ({}): {}\n",
                    c.committed_at.format("%Y-%m-%d"),
                    short_hash(&c.commit_hash),
                    c.author_email,
                    c.message_summary
                ));
            }
        }

        // Dependency edges touching the matched chunks.
        out.push_str("\n## Dependencies\n\n");
        let mut edge_lines = Vec::new();
        for item in output.results.iter().take(5) {
            for edge in meta.get_edges_from(&item.chunk.chunk_id).await? {
                edge_lines.push(format!(
                    "- `{}` calls `{}` ({})",
                    location(&item.chunk),
                    edge.to_chunk_id,
                    edge.symbol_name
                ));
            }
            for edge in meta.get_edges_to(&item.chunk.chunk_id).await? {
                edge_lines.push(format!(
                    "- `{}` is called from `{}` ({})",
                    location(&item.chunk),
                    edge.from_chunk_id,
                    edge.symbol_name
                ));
            }
        }
        edge_lines.dedup();
        if edge_lines.is_empty() {
            out.push_str("_No symbol edges recorded._\n");
        } else {
            for line in edge_lines.iter().take(20) {
                out.push_str(line);
                out.push('\n');
            }
        }

        out.push_str(&format!(
            "\n_{} tokens returned, ~{}% saved versus reading whole files._\n",
            output.metrics.tokens_returned, output.metrics.savings_percent
        ));
        Ok(out)
    }

    async fn tool_recent_changes(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let group = crate::models::validate_group(&group)?;
        let project = optional_str(args, "project");
        let limit = args
            .get("limit")
            .and_then(|v| v.as_i64())
            .unwrap_or(20)
            .clamp(1, 100);

        let commits = self
            .ctx
            .indexer
            .meta()
            .recent_commits(&group, project.as_deref(), limit)
            .await?;
        if commits.is_empty() {
            return Ok("No commit history recorded for this scope.".to_string());
        }

        let mut out = String::from("# Recent changes\n\n");
        for c in &commits {
            out.push_str(&format!(
                "- {} — {} ({}): {}\n",
                c.committed_at.format("%Y-%m-%d %H:%M"),
                short_hash(&c.commit_hash),
                c.author_email,
                c.message_summary
            ));
        }
        Ok(out)
    }

    async fn tool_impact_analysis(&self, args: &serde_json::Value) -> Result<String> {
        let group = required_str(args, "group")?;
        let group = crate::models::validate_group(&group)?;

        // Seed set: an explicit chunk, or every definition of a symbol.
        let mut seeds: Vec<String> = Vec::new();
        let mut title = String::new();
        if let Some(chunk_id) = optional_str(args, "chunk_id") {
            title = format!("`{chunk_id}`");
            seeds.push(chunk_id);
        } else if let Some(symbol) = optional_str(args, "symbol") {
            title = format!("symbol `{symbol}`");
            let (definitions, _) = self.ctx.engine.find_usages(&group, &symbol, None).await?;
            seeds.extend(definitions.into_iter().map(|p| p.chunk_id));
        }
        if seeds.is_empty() {
            return Err(Error::Input("chunk_id or symbol is required".into()));
        }

        // Walk incoming edges breadth-first; the graph is cyclic, so track
        // visited chunk ids.
        let meta = self.ctx.indexer.meta();
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut queue: VecDeque<(String, usize)> =
            seeds.iter().cloned().map(|s| (s, 0)).collect();
        let mut impacted: Vec<(String, String, usize)> = Vec::new();

        while let Some((chunk_id, depth)) = queue.pop_front() {
            if depth >= 3 {
                continue;
            }
            for edge in meta.get_edges_to(&chunk_id).await? {
                if visited.insert(edge.from_chunk_id.clone()) {
                    impacted.push((edge.from_chunk_id.clone(), edge.symbol_name.clone(), depth + 1));
                    queue.push_back((edge.from_chunk_id, depth + 1));
                }
            }
        }

        let mut out = format!("# Impact analysis for {title}\n\n## Seeds\n\n");
        for seed in &seeds {
            out.push_str(&format!("- `{seed}`\n"));
        }
        out.push_str("\n## Impact\n\n");
        if impacted.is_empty() {
            out.push_str("_Nothing depends on this code via recorded edges._\n");
        } else {
            out.push_str("| Depth | Caller | Via symbol |\n|---|---|---|\n");
            for (chunk_id, symbol, depth) in &impacted {
                out.push_str(&format!("| {depth} | `{chunk_id}` | {symbol} |\n"));
            }
        }
        Ok(out)
    }
}

// ── Formatting helpers ──────────────────────────────────────────────────

fn required_str(args: &serde_json::Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::Input(format!("{key} is required")))
}

fn optional_str(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
}

fn location(chunk: &ChunkPayload) -> String {
    format!(
        "{}/{}:{}-{}",
        chunk.project, chunk.file, chunk.start_line, chunk.end_line
    )
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

fn location_table(payloads: &[ChunkPayload]) -> String {
    let mut out =
        String::from("| Location | Symbol | Kind | Language |\n|---|---|---|---|\n");
    for p in payloads {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            location(p),
            p.symbol_name.as_deref().unwrap_or("-"),
            p.kind
                .map(|k| format!("{k:?}").to_lowercase())
                .unwrap_or_else(|| "-".to_string()),
            p.language
        ));
    }
    out
}

fn format_search_output(query: &str, output: &SearchOutput) -> String {
    if output.results.is_empty() {
        return format!("No matches for \"{query}\".");
    }
    let mut out = format!("# Results for \"{query}\"\n\n");
    for (i, item) in output.results.iter().enumerate() {
        out.push_str(&format!(
            "## {}. {} (score {:.3})\n\n",
            i + 1,
            location(&item.chunk),
            item.score
        ));
        if let Some(symbol) = &item.chunk.symbol_name {
            out.push_str(&format!("`{symbol}` — "));
        }
        out.push_str(&format!("chunk `{}`\n\n", item.chunk.chunk_id));
        out.push_str(&format!("```{}\n{}\n```\n\n", item.chunk.language, item.chunk.content));
    }
    out.push_str(&format!(
        "_{} result(s); {} tokens returned, ~{}% saved._\n",
        output.total, output.metrics.tokens_returned, output.metrics.savings_percent
    ));
    out
}

fn format_chunk(chunk: &ChunkPayload) -> String {
    let mut out = format!("# {}\n\n", location(chunk));
    out.push_str(&format!("- chunk id: `{}`\n", chunk.chunk_id));
    if let Some(symbol) = &chunk.symbol_name {
        out.push_str(&format!("- symbol: `{symbol}`\n"));
    }
    if let Some(commit) = &chunk.last_commit_hash {
        out.push_str(&format!("- last commit: {}\n", short_hash(commit)));
    }
    if !chunk.ticket_keys.is_empty() {
        out.push_str(&format!("- tickets: {}\n", chunk.ticket_keys.join(", ")));
    }
    out.push_str(&format!("\n```{}\n{}\n```\n", chunk.language, chunk.content));
    out
}

// ── rmcp wiring ─────────────────────────────────────────────────────────

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "paparats-mcp".to_string(),
                title: Some("Paparats".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Semantic code search over indexed repositories. Use search_code to find \
                 relevant chunks, get_chunk to fetch one by id, and find_usages for symbol \
                 references. The support endpoint adds change-history and impact tools."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<ListToolsResult, McpError>> + Send + '_
    {
        std::future::ready(Ok(ListToolsResult::with_all_items(self.tool_descriptors())))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tool_descriptors().into_iter().find(|t| t.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        if self.ctx.is_draining() {
            return Err(McpError::new(
                ErrorCode::INTERNAL_ERROR,
                "server is shutting down".to_string(),
                None,
            ));
        }

        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

        match self.run_tool(&request.name, &args).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(Error::NotFound(msg)) if msg.starts_with("no tool named") => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                msg,
                None,
            )),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

/// Mount both tool surfaces: streamable HTTP at `/mcp` and `/support/mcp`,
/// legacy SSE at `/sse` + `/messages` and the `/support` twins.
pub fn build_mcp_router(
    ctx: Arc<AppContext>,
    jobs: Arc<JobRegistry>,
    bind: std::net::SocketAddr,
    ct: tokio_util::sync::CancellationToken,
) -> axum::Router {
    use rmcp::transport::sse_server::{SseServer, SseServerConfig};
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    };

    let coding = McpServer::new(ctx.clone(), jobs.clone(), ToolSet::Coding);
    let support = McpServer::new(ctx, jobs, ToolSet::Support);

    let coding_http = StreamableHttpService::new(
        {
            let handler = coding.clone();
            move || Ok(handler.clone())
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let support_http = StreamableHttpService::new(
        {
            let handler = support.clone();
            move || Ok(handler.clone())
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let (coding_sse, coding_sse_router) = SseServer::new(SseServerConfig {
        bind,
        sse_path: "/sse".to_string(),
        post_path: "/messages".to_string(),
        ct: ct.clone(),
        sse_keep_alive: None,
    });
    let _ = coding_sse.with_service(move || coding.clone());

    let (support_sse, support_sse_router) = SseServer::new(SseServerConfig {
        bind,
        sse_path: "/support/sse".to_string(),
        post_path: "/support/messages".to_string(),
        ct,
        sse_keep_alive: None,
    });
    let _ = support_sse.with_service(move || support.clone());

    axum::Router::new()
        .nest_service("/mcp", coding_http)
        .nest_service("/support/mcp", support_http)
        .merge(coding_sse_router)
        .merge(support_sse_router)
}
