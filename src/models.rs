//! Core data models flowing through the indexing and query pipeline.
//!
//! The fundamental unit is the [`Chunk`]: a contiguous slice of a source file
//! indexed and searched as one record. Lines are 1-indexed and inclusive
//! throughout the crate. A chunk's identity is its `chunk_id`,
//! `group//project//file//startLine-endLine//hash`, which is globally unique.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Syntactic kind of a chunk's primary declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Class,
    Interface,
    Type,
    Enum,
    Constant,
    Variable,
    Method,
    Route,
    Module,
    Resource,
}

/// A contiguous slice of a source file, ready for embedding and upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub group: String,
    pub project: String,
    /// Relative path, forward-slash separated.
    pub file: String,
    pub language: String,
    /// 1-indexed, inclusive.
    pub start_line: u32,
    /// 1-indexed, inclusive.
    pub end_line: u32,
    /// Exact text of the chunk.
    pub content: String,
    /// First 16 hex chars of SHA-256 over `content`.
    pub hash: String,
    pub chunk_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChunkKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounded_context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub defines_symbols: Vec<String>,
    #[serde(default)]
    pub uses_symbols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit_hash: Option<String>,
    /// ISO-8601 UTC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_author_email: Option<String>,
    #[serde(default)]
    pub ticket_keys: Vec<String>,
}

impl Chunk {
    /// Deterministic Qdrant point id for this chunk.
    pub fn point_id(&self) -> String {
        point_id_for(&self.chunk_id)
    }
}

/// Content hash used in chunk ids: first 16 hex chars of SHA-256.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Build a chunk id from its identifying parts.
pub fn chunk_id(
    group: &str,
    project: &str,
    file: &str,
    start_line: u32,
    end_line: u32,
    hash: &str,
) -> String {
    format!("{group}//{project}//{file}//{start_line}-{end_line}//{hash}")
}

/// Deterministic UUID point id derived from a chunk id.
///
/// Qdrant point ids must be UUIDs or integers; hashing the chunk id gives a
/// stable id so re-upserting the same chunk overwrites the same point.
pub fn point_id_for(chunk_id: &str) -> String {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Validate a group name for use as a collection identifier.
///
/// Groups become Qdrant collection names, so the charset is restricted.
/// Sanitation happens once here at the boundary; everything below treats the
/// returned id as already valid.
pub fn validate_group(group: &str) -> Result<String> {
    let g = group.trim().to_lowercase();
    if g.is_empty() || g.len() > 64 {
        return Err(Error::Input(format!(
            "group must be 1-64 characters, got {} ({:?})",
            g.len(),
            group
        )));
    }
    if !g
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(Error::Input(format!(
            "group may only contain [a-z0-9_-]: {group:?}"
        )));
    }
    Ok(g)
}

/// One commit attributed to a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub chunk_id: String,
    pub commit_hash: String,
    pub committed_at: DateTime<Utc>,
    pub author_email: String,
    pub message_summary: String,
}

/// Origin of a ticket reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketSource {
    Jira,
    Github,
    Custom,
}

impl TicketSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketSource::Jira => "jira",
            TicketSource::Github => "github",
            TicketSource::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "jira" => TicketSource::Jira,
            "github" => TicketSource::Github,
            _ => TicketSource::Custom,
        }
    }
}

/// A ticket key extracted from commit messages, attributed to a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRecord {
    pub chunk_id: String,
    pub ticket_key: String,
    pub source: TicketSource,
}

/// Relation carried by a symbol edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeRelation {
    Calls,
    References,
}

impl EdgeRelation {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeRelation::Calls => "calls",
            EdgeRelation::References => "references",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "references" => EdgeRelation::References,
            _ => EdgeRelation::Calls,
        }
    }
}

/// Directed name-matched edge between two chunks. Never a self-edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEdge {
    pub from_chunk_id: String,
    pub to_chunk_id: String,
    pub relation: EdgeRelation,
    pub symbol_name: String,
}

/// Counters for one indexing run, surfaced by the API.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndexStats {
    pub files: u64,
    pub chunks: u64,
    pub cached: u64,
    pub errors: u64,
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_16_hex() {
        let h = content_hash("fn main() {}");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_hash_deterministic() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }

    #[test]
    fn test_chunk_id_format() {
        let id = chunk_id("g", "p", "src/a.ts", 1, 12, "deadbeefdeadbeef");
        assert_eq!(id, "g//p//src/a.ts//1-12//deadbeefdeadbeef");
    }

    #[test]
    fn test_point_id_deterministic_and_uuid() {
        let a = point_id_for("g//p//f//1-2//abc");
        let b = point_id_for("g//p//f//1-2//abc");
        assert_eq!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
        assert_ne!(a, point_id_for("g//p//f//1-3//abc"));
    }

    #[test]
    fn test_validate_group() {
        assert_eq!(validate_group("My-Team").unwrap(), "my-team");
        assert_eq!(validate_group("g_1").unwrap(), "g_1");
        assert!(validate_group("").is_err());
        assert!(validate_group("bad name").is_err());
        assert!(validate_group("slash/name").is_err());
        assert!(validate_group(&"x".repeat(65)).is_err());
    }
}
