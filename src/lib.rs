//! # Paparats
//!
//! **A semantic code-search service for source repositories.**
//!
//! Paparats ingests source files, partitions them into syntactically
//! meaningful chunks, embeds each chunk via an external embedding model,
//! persists the vectors in Qdrant, and serves similarity queries plus
//! higher-level analytics over two surfaces: a JSON/HTTP admin API and an
//! MCP tool endpoint for AI coding assistants.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │ Enumerator │──▶│ Chunker  │──▶│ Embedding │──▶│ Vector store │
//! │ + Watcher  │   │ + Symbols│   │ (cached)  │   │   (Qdrant)   │
//! └────────────┘   └────┬─────┘   └───────────┘   └──────┬───────┘
//!                       │                                │
//!                       ▼                                ▼
//!                 ┌───────────┐                   ┌──────────────┐
//!                 │ Metadata  │◀──────────────────│ Query engine │
//!                 │ (SQLite)  │   HTTP API / MCP  │  + caching   │
//!                 └───────────┘                   └──────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **enumerator** ([`scan`]) walks a project root, honoring language
//!    patterns, excludes, ignore files, and the binary/UTF-8 guards.
//! 2. The **chunker** ([`chunker`]) splits each file on declaration
//!    boundaries within a size budget; the **symbol extractor** ([`symbols`])
//!    captures defined and used names per chunk.
//! 3. The **embedding provider** ([`embedding`]) turns chunk text into
//!    vectors through the durable cache ([`embed_cache`]).
//! 4. The **indexer** ([`indexer`]) upserts points ([`vector_store`]), links
//!    name-matched symbol edges, and records git history ([`git_meta`]) in
//!    the metadata store ([`meta_store`]).
//! 5. The **watcher** ([`watcher`]) re-drives the indexer on debounced file
//!    events.
//! 6. The **query engine** ([`query`]) serves plain, expanded, and filtered
//!    searches with per-group result caching.
//! 7. The **HTTP API** ([`server`]) and **MCP handler** ([`mcp`]) expose it
//!    all.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | YAML project config parsing, validation, profile resolution |
//! | [`language`] | Per-language profiles: globs, grammars, symbol queries |
//! | [`scan`] | File enumeration with ignore rules and content guards |
//! | [`chunker`] | Syntax-aware chunking with budget constraints |
//! | [`symbols`] | Symbol extraction and name-matched edge construction |
//! | [`embedding`] | Remote embedder, task prefixes, batching, retries |
//! | [`embed_cache`] | Durable content-hash → vector cache |
//! | [`vector_store`] | Qdrant coordinator + in-memory store |
//! | [`meta_store`] | Commits, tickets, symbol edges (SQLite) |
//! | [`git_meta`] | Commit history and ticket extraction per chunk |
//! | [`indexer`] | Ingestion orchestration, idempotent re-indexing |
//! | [`watcher`] | Debounced per-project file watching with retries |
//! | [`query`] | Search, query expansion, caching, token metrics |
//! | [`server`] | JSON/HTTP admin API |
//! | [`mcp`] | Session-scoped MCP tool server |
//! | [`models`] | Core data types: chunks, commits, tickets, edges |
//! | [`error`] | Error taxonomy shared by all surfaces |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embed_cache;
pub mod embedding;
pub mod error;
pub mod git_meta;
pub mod indexer;
pub mod language;
pub mod mcp;
pub mod meta_store;
pub mod models;
pub mod query;
pub mod scan;
pub mod server;
pub mod symbols;
pub mod vector_store;
pub mod watcher;
