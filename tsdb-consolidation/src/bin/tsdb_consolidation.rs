//! TSDB consolidation service
//!
//! Runs the consolidation scheduler against a SQLite graph store until
//! interrupted, or performs a single pass with `--once`.
//!
//! Usage:
//!   tsdb-consolidation --db-path graph.db [--config consolidation.toml]
//!   tsdb-consolidation --db-path graph.db --once [--now 2025-07-14T12:00:00Z]

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_log::LogTracer;

use tsdb_consolidation::{
    Clock, ConsolidationConfig, ConsolidationService, GraphStore, ManualClock, SqliteGraphStore,
    SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "tsdb-consolidation")]
#[command(about = "Consolidates raw telemetry into graph summaries and compacts storage")]
struct Args {
    /// SQLite database holding the graph and the correlation log
    #[arg(long, env = "TSDB_DB_PATH", default_value = "graph.db")]
    db_path: PathBuf,

    /// Configuration file (TOML format)
    #[arg(long, env = "TSDB_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Run one pass and exit
    #[arg(long)]
    once: bool,

    /// Pretend the current time is this RFC3339 timestamp (requires --once)
    #[arg(long)]
    now: Option<String>,
}

fn parse_now(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid --now timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LogTracer::init()?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tsdb_consolidation=info".parse()?),
        )
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    if args.now.is_some() && !args.once {
        bail!("--now can only be used together with --once");
    }

    let config = ConsolidationConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    let store: Arc<dyn GraphStore> = Arc::new(
        SqliteGraphStore::open(&args.db_path)
            .with_context(|| format!("failed to open {}", args.db_path.display()))?,
    );
    info!("Using graph store at {}", args.db_path.display());

    let clock: Arc<dyn Clock> = match args.now.as_deref() {
        Some(raw) => Arc::new(ManualClock::new(parse_now(raw)?)),
        None => Arc::new(SystemClock),
    };
    let service = ConsolidationService::new(store, clock, config);

    if args.once {
        let report = service.consolidate_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    service.start();
    info!("Consolidation service running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    service.stop().await;
    Ok(())
}
