//! queryrelayd — the queryrelay daemon.
//!
//! Single binary that assembles every queryrelay subsystem behind the RPC
//! surface:
//! - Catalogue store (file-backed, atomic writes)
//! - Connection pool manager, backed by the `mssql` driver module
//! - Job queue, executor, progress stream, data buffer, execution history
//! - Scheduler (recurrence firing + non-overlap)
//! - Application log
//! - RPC surface
//!
//! # Usage
//!
//! ```text
//! queryrelayd standalone --port 8088 --data-dir /var/lib/queryrelay
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use queryrelay_adapters::AdapterRegistry;
use queryrelay_api::ApiState;
use queryrelay_buffer::{BufferConfig, DataBuffer};
use queryrelay_executor::{Executor, ExecutorConfig};
use queryrelay_log::Logger;
use queryrelay_pool::{PoolManager, PoolManagerConfig};
use queryrelay_queue::{JobQueue, QueueConfig};
use queryrelay_scheduler::{CatalogueStore, Scheduler};
use queryrelay_state::{ExecutionHistory, ProgressStream};

mod mssql;

use mssql::{MssqlQueryRunner, MssqlSessionFactory};

#[derive(Parser)]
#[command(name = "queryrelayd", about = "queryrelay daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (single process, all subsystems in-process).
    Standalone {
        /// Port the RPC surface listens on.
        #[arg(long, default_value = "8088")]
        port: u16,

        /// Data directory for the catalogue, checkpoints, history, and log.
        /// Defaults to a platform-appropriate user-data directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds the queue waits for in-flight runs to drain on shutdown.
        #[arg(long, default_value = "30")]
        shutdown_drain_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,queryrelayd=debug,queryrelay=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            shutdown_drain_secs,
        } => run_standalone(port, data_dir, shutdown_drain_secs).await,
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("queryrelay")
}

async fn run_standalone(port: u16, data_dir: Option<PathBuf>, shutdown_drain_secs: u64) -> anyhow::Result<()> {
    let data_dir = data_dir.unwrap_or_else(default_data_dir);
    info!(?data_dir, "queryrelay daemon starting in standalone mode");
    std::fs::create_dir_all(&data_dir)?;

    // ── Catalogue ────────────────────────────────────────────────

    let store = CatalogueStore::open(data_dir.join("catalogue.json"))?;
    info!("catalogue loaded");

    // ── Pool manager + driver ────────────────────────────────────

    let pool = Arc::new(PoolManager::new(
        MssqlSessionFactory::new(),
        PoolManagerConfig::default(),
    ));
    let query_runner = Arc::new(MssqlQueryRunner::new());
    info!("connection pool initialized");

    // ── Queue ────────────────────────────────────────────────────

    let queue = Arc::new(JobQueue::start(QueueConfig::default()));
    info!("job queue started");

    // ── Progress, buffer, history ────────────────────────────────

    let progress = ProgressStream::new(data_dir.join("checkpoints"));
    let buffer = Arc::new(DataBuffer::new(
        BufferConfig::default(),
        AdapterRegistry::default_set(),
        data_dir.join("buffer-backup"),
    ));
    let history = ExecutionHistory::open(data_dir.join("history.json"))?;

    // ── Executor + scheduler ─────────────────────────────────────

    let executor = Arc::new(Executor::new(
        pool.clone(),
        query_runner,
        progress.clone(),
        buffer,
        AdapterRegistry::default_set(),
        history,
        ExecutorConfig::default(),
    ));

    let scheduler = Scheduler::new(store, queue.clone(), executor, progress);
    scheduler.start_all().await;
    info!("scheduler initialized");

    // ── Application log ──────────────────────────────────────────

    let logger = Arc::new(Logger::open(data_dir.join("app.log"))?);

    // ── RPC surface ──────────────────────────────────────────────

    let state = ApiState::new(scheduler.clone(), logger);
    let router = queryrelay_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "RPC surface starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    });

    server.await?;

    // ── Shutdown ─────────────────────────────────────────────────
    // Three singletons, each with an explicit teardown: timers first (no
    // new work enqueued), then the queue drains in-flight runs up to the
    // configured deadline, then the pool closes every live session.

    scheduler.stop_all().await;
    queue.shutdown(Duration::from_secs(shutdown_drain_secs)).await;
    pool.destroy_all().await;

    info!("queryrelay daemon stopped");
    Ok(())
}
