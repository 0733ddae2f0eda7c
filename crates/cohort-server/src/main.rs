//! cohort-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered under
//! `COHORT_*` environment variables, opens an in-process SQLite store, starts
//! the expiration sweeper and serves the JSON API over HTTP.

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use cohort_engine::SegmentService;
use cohort_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Cohort segmentation server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = ::config::Config::builder()
    .add_source(::config::File::from(cli.config).required(false))
    .add_source(::config::Environment::with_prefix("COHORT"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Open SQLite store.
  let store = Arc::new(
    SqliteStore::open(&server_cfg.store_path)
      .await
      .with_context(|| format!("failed to open store at {:?}", server_cfg.store_path))?,
  );
  let service = Arc::new(SegmentService::new(Arc::clone(&store), store));

  // Background sweeper.
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let sweeper = service
    .sweeper()
    .with_interval(server_cfg.sweep_interval())
    .start(shutdown_rx);

  let app = cohort_api::api_router(service)
    .layer(TimeoutLayer::new(server_cfg.request_timeout()))
    .layer(TraceLayer::new_for_http());

  let address = server_cfg.address();
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  let served = axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error");

  // Stop the sweeper once the server has drained, even if serving failed.
  let _ = shutdown_tx.send(true);
  sweeper.await.context("sweeper task panicked")?;
  tracing::info!("shut down");

  served
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for ctrl-c; shutting down");
  }
  tracing::info!("shutdown signal received");
}
