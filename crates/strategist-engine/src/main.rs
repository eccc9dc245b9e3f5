//! Overnight Strategist Server

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strategist_engine::{
    http, AgentExecutor, AppState, Config, FileStore, HttpExecutor, MemoryStore, RulesExecutor,
    RunStore,
};

/// Overnight strategist orchestration server.
#[derive(Parser, Debug)]
#[command(name = "strategist-server", about = "Overnight strategist orchestration server")]
struct Args {
    /// HTTP server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    http_addr: String,

    /// Runs allowed to execute at once
    #[arg(long, default_value = "4")]
    max_concurrent_runs: usize,

    /// Terminal runs kept in memory for status queries
    #[arg(long, default_value = "1000")]
    retained_runs: usize,

    /// Task attempts in flight per run (0 = unbounded)
    #[arg(long, default_value = "0")]
    task_concurrency: usize,

    /// Task catalog JSON (reference catalog if omitted)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Deliverable manifest JSON (reference manifest if omitted)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Client directory JSON (demo directory if omitted)
    #[arg(long)]
    clients: Option<PathBuf>,

    /// Directory for persisted runs and artifacts (in-memory if omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Base URL of a remote agent executor (built-in rules if omitted)
    #[arg(long)]
    executor_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("strategist=info".parse()?))
        .with_target(true)
        .init();

    let config = Config {
        http_addr: args.http_addr,
        max_concurrent_runs: args.max_concurrent_runs,
        retained_runs: args.retained_runs,
        task_concurrency: Some(args.task_concurrency).filter(|&n| n > 0),
        catalog_path: args.catalog,
        manifest_path: args.manifest,
        clients_path: args.clients,
        data_dir: args.data_dir,
        executor_url: args.executor_url,
    };

    let catalog = config.load_catalog()?;
    let manifest = config.load_manifest()?;
    let clients = Arc::new(config.load_clients()?);

    let executor: Arc<dyn AgentExecutor> = match &config.executor_url {
        Some(url) => {
            info!(url = %url, "Using remote agent executor");
            Arc::new(HttpExecutor::new(url))
        }
        None => {
            info!("Using built-in rules executor");
            Arc::new(RulesExecutor::new())
        }
    };

    let store: Arc<dyn RunStore> = match &config.data_dir {
        Some(dir) => {
            info!(data_dir = %dir.display(), "Persisting runs to disk");
            Arc::new(FileStore::open(dir.clone()).await?)
        }
        None => {
            warn!("No data directory configured, runs are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let http_addr = config.http_addr.clone();
    info!(
        tasks = catalog.len(),
        max_concurrent_runs = config.max_concurrent_runs,
        task_concurrency = ?config.task_concurrency,
        "Starting overnight strategist"
    );

    let state = AppState::new(config, catalog, manifest, clients, executor, store)?;
    let router = http::create_router(state);

    let listener = TcpListener::bind(&http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
