//! `vigil` — ingestion CLI for the Vigil event/annotation store.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, and feeds operations payload files to the ingestion engine in
//! order. One status line is printed per operation; the exit code is non-zero
//! as soon as any operation (or file) fails.
//!
//! Format-specific mission-file parsers live upstream; this binary consumes
//! the generic operations payload they produce.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vigil_core::{operation::OperationBatch, status::ProcessingStatus};
use vigil_engine::IngestionEngine;
use vigil_store_sqlite::VigilStore;

#[derive(Parser)]
#[command(author, version, about = "Vigil ingestion CLI")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Ingest operations payload files, in order, stopping at the first
  /// failure.
  Ingest { files: Vec<PathBuf> },
}

#[derive(Debug, Clone, Deserialize)]
struct Settings {
  store_path: PathBuf,
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
    .set_default("store_path", "vigil.db")?
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("VIGIL"))
    .build()
    .context("failed to read config file")?;
  let settings: Settings = settings
    .try_deserialize()
    .context("failed to deserialise settings")?;

  let store = VigilStore::open(&settings.store_path)
    .await
    .with_context(|| {
      format!("failed to open store at {:?}", settings.store_path)
    })?;
  let engine = IngestionEngine::new(store);

  let Command::Ingest { files } = cli.command;
  let mut failed = false;

  for file in &files {
    match load_batch(file) {
      Err(detail) => {
        // The schema boundary rejected the file; there is no payload to
        // hand to the engine.
        tracing::warn!(file = %file.display(), %detail, "file not valid");
        println!("{}: {}", file.display(), ProcessingStatus::FileNotValid);
        failed = true;
      }
      Ok(payload) => {
        let outcomes = engine
          .treat_data(&payload)
          .await
          .with_context(|| format!("ingestion of {:?} failed", file))?;
        for outcome in &outcomes {
          println!("{}: {}", outcome.source, outcome.status);
        }
        failed = outcomes.iter().any(|o| o.status.is_failure());
      }
    }
    if failed {
      break;
    }
  }

  if failed {
    std::process::exit(1);
  }
  Ok(())
}

fn load_batch(path: &Path) -> Result<OperationBatch, String> {
  let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
  serde_json::from_str(&raw).map_err(|e| e.to_string())
}
