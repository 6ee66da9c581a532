//! Durable metadata store: commits, tickets, and symbol edges per chunk.
//!
//! Backed by a single SQLite database (WAL mode) with three tables, all
//! keyed on `chunk_id`. Writes use replace-set semantics: the new list for
//! a chunk entirely replaces its prior rows, and every per-chunk write runs
//! in one transaction. Deletes cascade across all three tables; deleting a
//! chunk also removes edges pointing *at* it.
//!
//! This store is the source of truth for git-derived metadata; the denormalized
//! copies on vector-store payloads are best-effort.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::error::Result;
use crate::models::{CommitRecord, EdgeRelation, SymbolEdge, TicketRecord, TicketSource};

#[derive(Clone)]
pub struct MetaStore {
    pool: SqlitePool,
}

impl MetaStore {
    /// Open the store and create the schema when missing. Idempotent.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commits (
                chunk_id TEXT NOT NULL,
                commit_hash TEXT NOT NULL,
                committed_at INTEGER NOT NULL,
                author_email TEXT NOT NULL,
                message_summary TEXT NOT NULL,
                PRIMARY KEY (chunk_id, commit_hash)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                chunk_id TEXT NOT NULL,
                ticket_key TEXT NOT NULL,
                source TEXT NOT NULL,
                PRIMARY KEY (chunk_id, ticket_key, source)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS symbol_edges (
                from_chunk_id TEXT NOT NULL,
                to_chunk_id TEXT NOT NULL,
                relation TEXT NOT NULL,
                symbol_name TEXT NOT NULL,
                PRIMARY KEY (from_chunk_id, to_chunk_id, relation, symbol_name)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_commits_committed_at ON commits(committed_at DESC)",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_key ON tickets(ticket_key)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_to ON symbol_edges(to_chunk_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── Commits ─────────────────────────────────────────────────────────

    /// Replace the commit set for one chunk.
    pub async fn upsert_commits_for_chunk(
        &self,
        chunk_id: &str,
        commits: &[CommitRecord],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM commits WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;
        for commit in commits {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO commits
                    (chunk_id, commit_hash, committed_at, author_email, message_summary)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk_id)
            .bind(&commit.commit_hash)
            .bind(commit.committed_at.timestamp())
            .bind(&commit.author_email)
            .bind(&commit.message_summary)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Commits for a chunk, newest first. Ordering is stable: ties on
    /// `committed_at` break by commit hash.
    pub async fn get_commits(&self, chunk_id: &str, limit: Option<i64>) -> Result<Vec<CommitRecord>> {
        let limit = limit.unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, commit_hash, committed_at, author_email, message_summary
            FROM commits WHERE chunk_id = ?
            ORDER BY committed_at DESC, commit_hash ASC
            LIMIT ?
            "#,
        )
        .bind(chunk_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_commit).collect())
    }

    pub async fn get_latest_commit(&self, chunk_id: &str) -> Result<Option<CommitRecord>> {
        Ok(self.get_commits(chunk_id, Some(1)).await?.into_iter().next())
    }

    /// Most recent commits across a project scope (`group//project//` prefix)
    /// or a whole group, newest first, deduplicated by commit hash.
    pub async fn recent_commits(
        &self,
        group: &str,
        project: Option<&str>,
        limit: i64,
    ) -> Result<Vec<CommitRecord>> {
        let prefix = match project {
            Some(p) => format!("{group}//{p}//"),
            None => format!("{group}//"),
        };
        let pattern = format!("{}%", escape_like(&prefix));
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, commit_hash, MAX(committed_at) AS committed_at,
                   author_email, message_summary
            FROM commits
            WHERE chunk_id LIKE ? ESCAPE '\'
            GROUP BY commit_hash
            ORDER BY committed_at DESC, commit_hash ASC
            LIMIT ?
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_commit).collect())
    }

    // ── Tickets ─────────────────────────────────────────────────────────

    /// Replace the ticket set for one chunk.
    pub async fn upsert_tickets_for_chunk(
        &self,
        chunk_id: &str,
        tickets: &[TicketRecord],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tickets WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;
        for ticket in tickets {
            sqlx::query(
                "INSERT OR REPLACE INTO tickets (chunk_id, ticket_key, source) VALUES (?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(&ticket.ticket_key)
            .bind(ticket.source.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_tickets(&self, chunk_id: &str) -> Result<Vec<TicketRecord>> {
        let rows = sqlx::query(
            "SELECT chunk_id, ticket_key, source FROM tickets WHERE chunk_id = ? ORDER BY ticket_key",
        )
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TicketRecord {
                chunk_id: row.get("chunk_id"),
                ticket_key: row.get("ticket_key"),
                source: TicketSource::parse(row.get::<String, _>("source").as_str()),
            })
            .collect())
    }

    /// Chunk ids whose ticket set contains `ticket_key`, scoped to a group.
    pub async fn chunks_for_ticket(&self, group: &str, ticket_key: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", escape_like(&format!("{group}//")));
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT chunk_id FROM tickets
            WHERE ticket_key = ? AND chunk_id LIKE ? ESCAPE '\'
            ORDER BY chunk_id
            "#,
        )
        .bind(ticket_key)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("chunk_id")).collect())
    }

    // ── Symbol edges ────────────────────────────────────────────────────

    /// Replace all edges touching the given chunks (both directions), then
    /// insert the new set. Used when re-indexing a file.
    pub async fn replace_edges_for_chunks(
        &self,
        chunk_ids: &[String],
        edges: &[SymbolEdge],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk_id in chunk_ids {
            sqlx::query("DELETE FROM symbol_edges WHERE from_chunk_id = ? OR to_chunk_id = ?")
                .bind(chunk_id)
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        for edge in edges {
            if edge.from_chunk_id == edge.to_chunk_id {
                continue;
            }
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO symbol_edges
                    (from_chunk_id, to_chunk_id, relation, symbol_name)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&edge.from_chunk_id)
            .bind(&edge.to_chunk_id)
            .bind(edge.relation.as_str())
            .bind(&edge.symbol_name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_edges_from(&self, chunk_id: &str) -> Result<Vec<SymbolEdge>> {
        let rows = sqlx::query(
            r#"
            SELECT from_chunk_id, to_chunk_id, relation, symbol_name
            FROM symbol_edges WHERE from_chunk_id = ?
            ORDER BY to_chunk_id, symbol_name
            "#,
        )
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_edge).collect())
    }

    pub async fn get_edges_to(&self, chunk_id: &str) -> Result<Vec<SymbolEdge>> {
        let rows = sqlx::query(
            r#"
            SELECT from_chunk_id, to_chunk_id, relation, symbol_name
            FROM symbol_edges WHERE to_chunk_id = ?
            ORDER BY from_chunk_id, symbol_name
            "#,
        )
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_edge).collect())
    }

    // ── Deletes ─────────────────────────────────────────────────────────

    /// Remove every trace of one chunk: commits, tickets, and edges in both
    /// directions.
    pub async fn delete_chunk(&self, chunk_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM commits WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tickets WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM symbol_edges WHERE from_chunk_id = ? OR to_chunk_id = ?")
            .bind(chunk_id)
            .bind(chunk_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_by_project(&self, group: &str, project: &str) -> Result<()> {
        let prefix = format!("{group}//{project}//");
        self.delete_by_prefix(&prefix).await
    }

    /// Delete all metadata for one file. The file path may contain LIKE
    /// wildcards, so the pattern is escaped.
    pub async fn delete_by_file(&self, group: &str, project: &str, file: &str) -> Result<()> {
        let prefix = format!("{group}//{project}//{file}//");
        self.delete_by_prefix(&prefix).await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<()> {
        let pattern = format!("{}%", escape_like(prefix));
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM commits WHERE chunk_id LIKE ? ESCAPE '\\'")
            .bind(&pattern)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tickets WHERE chunk_id LIKE ? ESCAPE '\\'")
            .bind(&pattern)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM symbol_edges WHERE from_chunk_id LIKE ? ESCAPE '\\' OR to_chunk_id LIKE ? ESCAPE '\\'",
        )
        .bind(&pattern)
        .bind(&pattern)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn row_to_commit(row: &sqlx::sqlite::SqliteRow) -> CommitRecord {
    let ts: i64 = row.get("committed_at");
    CommitRecord {
        chunk_id: row.get("chunk_id"),
        commit_hash: row.get("commit_hash"),
        committed_at: timestamp_to_utc(ts),
        author_email: row.get("author_email"),
        message_summary: row.get("message_summary"),
    }
}

fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> SymbolEdge {
    SymbolEdge {
        from_chunk_id: row.get("from_chunk_id"),
        to_chunk_id: row.get("to_chunk_id"),
        relation: EdgeRelation::parse(row.get::<String, _>("relation").as_str()),
        symbol_name: row.get("symbol_name"),
    }
}

fn timestamp_to_utc(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

/// Escape `%`, `_`, and the escape character itself for a LIKE pattern.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
