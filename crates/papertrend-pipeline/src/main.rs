//! papertrend command-line binary.
//!
//! Reads `papertrend.toml` (or the path given with `--config`) layered under
//! `PAPERTREND_*` environment variables, opens the SQLite store, and runs
//! one subcommand.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use papertrend_pipeline::{
  PipelineConfig,
  import::import_file,
  runner::{Pipeline, RunOptions},
  structuring::ConflictDecision,
};
use papertrend_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Research paper trend pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "papertrend.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Append raw records from a JSON-lines file.
  Import { file: PathBuf },
  /// Structure unlinked raw records into canonical papers.
  Structure,
  /// Aggregate dirty scopes without structuring first.
  Analyze {
    #[arg(long)]
    force: bool,
  },
  /// Structure, then aggregate.
  Run {
    #[arg(long)]
    force: bool,
  },
  /// Settle a parked match conflict.
  Resolve {
    raw_id:   i64,
    /// Link the record to this paper.
    #[arg(long, conflicts_with = "distinct", required_unless_present = "distinct")]
    attach:   Option<Uuid>,
    /// Found a new paper from the record.
    #[arg(long)]
    distinct: bool,
  },
  /// Serve the read-only trend API.
  Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("PAPERTREND").separator("__"))
    .build()
    .context("failed to read config file")?;

  let cfg: PipelineConfig = settings
    .try_deserialize()
    .context("failed to deserialise PipelineConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Import { file } => {
      let report = import_file(&store, &file)
        .await
        .with_context(|| format!("failed to import {file:?}"))?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Structure => {
      let pipeline = Pipeline::from_config(store, cfg)?;
      let report = pipeline.structure().await.context("structuring failed")?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Analyze { force } => {
      let pipeline = Pipeline::from_config(store, cfg)?;
      let report = pipeline
        .run(RunOptions { force, structure: false })
        .await
        .context("analysis failed")?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Run { force } => {
      let pipeline = Pipeline::from_config(store, cfg)?;
      let report = pipeline
        .run(RunOptions { force, structure: true })
        .await
        .context("run failed")?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Resolve { raw_id, attach, distinct: _ } => {
      let decision = match attach {
        Some(paper_id) => ConflictDecision::Attach(paper_id),
        None => ConflictDecision::Distinct,
      };
      let pipeline = Pipeline::from_config(store, cfg)?;
      let link = pipeline
        .resolve(raw_id, decision)
        .await
        .with_context(|| format!("failed to resolve raw record {raw_id}"))?;
      println!("{}", serde_json::to_string_pretty(&link)?);
    }
    Command::Serve => {
      let app = papertrend_api::api_router(Arc::new(store)).layer(TraceLayer::new_for_http());
      let address = format!("{}:{}", cfg.host, cfg.port);

      tracing::info!("Listening on http://{address}");
      let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

      axum::serve(listener, app).await.context("server error")?;
    }
  }

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
