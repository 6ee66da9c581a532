//! CLI entry point for the `paparats` binary.
//!
//! Three commands: `serve` runs the HTTP + MCP server with watchers over the
//! registered projects, `index` performs a one-shot project build, and
//! `validate` checks a config document. Exit codes: 0 on success, 1 on a
//! fatal startup error, 130 when an operator interrupts a long-running
//! command.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use paparats::config::{load_project_config, EnvConfig};
use paparats::embed_cache::EmbeddingCache;
use paparats::embedding::{CachedEmbedder, RemoteEmbedder};
use paparats::indexer::Indexer;
use paparats::mcp::{build_mcp_router, JobRegistry};
use paparats::meta_store::MetaStore;
use paparats::query::{QueryCache, QueryEngine};
use paparats::server::{build_router, AppContext, ProjectRegistry};
use paparats::vector_store::QdrantStore;
use paparats::watcher::ProjectWatcher;

const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "paparats",
    about = "Paparats — semantic code search over source repositories",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP admin API and MCP endpoints
    Serve {
        /// Project config files to register and watch
        #[arg(long = "config", value_name = "FILE")]
        configs: Vec<PathBuf>,

        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8070")]
        bind: String,

        /// Index registered projects before accepting traffic
        #[arg(long)]
        index_on_start: bool,

        /// Disable file watchers
        #[arg(long)]
        no_watch: bool,
    },

    /// Index one project and exit
    Index {
        /// Project config file
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Validate a project config file
    Validate {
        /// Project config file
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "fatal");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env = EnvConfig::from_env();

    match cli.command {
        Commands::Validate { config } => {
            let resolved = load_project_config(&config)?;
            println!(
                "ok: group={} project={} languages={}",
                resolved.group,
                resolved.project,
                resolved.languages.join(",")
            );
            Ok(())
        }

        Commands::Index { config } => {
            let project = load_project_config(&config)?;
            let (indexer, _, _) = build_engine(&env, &project.embeddings).await?;

            let run = tokio::select! {
                result = indexer.index_project(&project) => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted");
                    std::process::exit(EXIT_INTERRUPTED);
                }
            };

            println!("index {}/{}", project.group, project.project);
            println!("  files: {}", run.files);
            println!("  chunks: {}", run.chunks);
            println!("  cached embeddings: {}", run.cached);
            println!("  skipped: {}", run.skipped);
            println!("  errors: {}", run.errors);
            println!("ok");
            Ok(())
        }

        Commands::Serve {
            configs,
            bind,
            index_on_start,
            no_watch,
        } => {
            let registry = Arc::new(ProjectRegistry::new());
            let mut embeddings_config = None;
            for path in &configs {
                let project = load_project_config(path)?;
                if embeddings_config.is_none() {
                    embeddings_config = Some(project.embeddings.clone());
                }
                registry.register(project);
            }
            let embeddings_config = embeddings_config.unwrap_or_default();

            let (indexer, engine, _query_cache) = build_engine(&env, &embeddings_config).await?;
            let ctx = Arc::new(AppContext::new(engine, indexer, registry.clone()));

            if index_on_start {
                for project in registry.list() {
                    if let Err(e) = ctx.indexer.index_project(&project).await {
                        warn!(project = %project.project, error = %e, "startup index failed");
                    }
                }
            }

            if !no_watch {
                for project in registry.list() {
                    match ProjectWatcher::start((*project).clone(), ctx.indexer.clone()) {
                        Ok(watcher) => ctx.watchers.lock().unwrap().push(watcher),
                        Err(e) => warn!(project = %project.project, error = %e, "watcher not started"),
                    }
                }
            }

            let addr: std::net::SocketAddr = bind.parse()?;
            let ct = tokio_util::sync::CancellationToken::new();
            let app = build_router(ctx.clone()).merge(build_mcp_router(
                ctx.clone(),
                Arc::new(JobRegistry::new()),
                addr,
                ct.clone(),
            ));

            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "listening");

            let drain_ctx = ctx.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("shutdown signal received, draining");
                    ct.cancel();
                    drain_ctx.begin_shutdown().await;
                })
                .await?;
            Ok(())
        }
    }
}

/// Wire the shared engine: Qdrant, the cached remote embedder, the metadata
/// store, and the query cache.
async fn build_engine(
    env: &EnvConfig,
    embeddings: &paparats::config::EmbeddingsConfig,
) -> anyhow::Result<(Arc<Indexer>, Arc<QueryEngine>, Arc<QueryCache>)> {
    let store = Arc::new(QdrantStore::connect(
        &env.qdrant_url,
        env.qdrant_api_key.as_deref(),
    )?);

    let cache = EmbeddingCache::open(&env.data_dir.join("embeddings.sqlite"), 100_000).await?;
    let embedder = Arc::new(CachedEmbedder::new(
        Box::new(RemoteEmbedder::new(&env.embedding_url, embeddings)?),
        cache,
    ));

    let meta = MetaStore::open(&env.data_dir.join("metadata.sqlite")).await?;
    let query_cache = Arc::new(QueryCache::new());

    let indexer = Arc::new(Indexer::new(
        store.clone(),
        meta,
        embedder.clone(),
        query_cache.clone(),
    ));
    let engine = Arc::new(QueryEngine::new(
        store,
        embedder,
        query_cache.clone(),
        env.allowed_projects.clone(),
    ));
    Ok((indexer, engine, query_cache))
}
