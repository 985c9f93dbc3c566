//! # movies-etl CLI
//!
//! ## Usage
//!
//! ```bash
//! movies-etl --config ./config/movies-etl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `movies-etl run` | Poll for changes until Ctrl-C |
//! | `movies-etl once` | Run a single cycle and print what it did |
//! | `movies-etl init-index` | Create the index if it does not exist |
//! | `movies-etl checkpoint show` | Print the stored watermark |
//! | `movies-etl status` | Check both backends and show counts |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use movies_etl::config::{self, Config};
use movies_etl::elastic::IndexWriter;
use movies_etl::extract::postgres::PgSource;
use movies_etl::extract::Extractor;
use movies_etl::pipeline::{CycleMode, CycleOutcome, Pipeline};
use movies_etl::retry::RetryPolicy;
use movies_etl::{checkpoint, db, status};
use movies_etl_core::Watermark;

/// Incremental Postgres to Elasticsearch synchronizer for the movies
/// catalogue.
#[derive(Parser)]
#[command(name = "movies-etl", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(
        long,
        global = true,
        env = "MOVIES_ETL_CONFIG",
        default_value = "./config/movies-etl.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll loop until interrupted.
    ///
    /// Creates the index on first start, then runs a cycle every
    /// `etl.poll_interval_secs`. Exits non-zero when a retry budget runs out.
    Run,

    /// Run one cycle and exit.
    Once {
        /// Ignore the stored watermark and re-index every film.
        #[arg(long)]
        full: bool,

        /// Extract and transform only. Nothing is written and the
        /// watermark does not move.
        #[arg(long)]
        dry_run: bool,
    },

    /// Create the index with its schema if it does not exist.
    InitIndex,

    /// Inspect the checkpoint.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show backend health, document counts, and the watermark.
    Status,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the stored watermark.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let retry = RetryPolicy::from_config(&cfg.retry);

    match cli.command {
        Commands::Run => {
            let pipeline = build_pipeline(&cfg, &retry).await?;
            pipeline
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                })
                .await?;
        }
        Commands::Once { full, dry_run } => {
            let pipeline = build_pipeline(&cfg, &retry).await?;
            if !dry_run {
                pipeline.writer().ensure_index().await?;
            }
            let mode = if full {
                CycleMode::Full
            } else {
                CycleMode::Incremental
            };

            let report = pipeline.run_cycle(mode, dry_run).await?;
            match report.outcome {
                CycleOutcome::Idle => println!("No changes since {}.", report.watermark),
                CycleOutcome::Completed => {
                    println!(
                        "{} {} changed film(s): {} document(s) in {} page(s).",
                        if dry_run { "Would index" } else { "Indexed" },
                        report.changed,
                        report.documents,
                        report.pages
                    );
                    println!("Watermark: {}", report.watermark);
                }
            }
        }
        Commands::InitIndex => {
            let writer = build_writer(&cfg, &retry).await?;
            if writer.ensure_index().await? {
                println!("Index '{}' created.", writer.index());
            } else {
                println!("Index '{}' already exists.", writer.index());
            }
        }
        Commands::Checkpoint {
            action: CheckpointAction::Show,
        } => {
            let checkpoint = checkpoint::open(&cfg.checkpoint, &retry).await?;
            match checkpoint.stored().await? {
                Some(watermark) => println!("{} = {}", checkpoint.key(), watermark),
                None => println!(
                    "No watermark stored under '{}' ({} backend); the next run starts from {}.",
                    checkpoint.key(),
                    checkpoint.backend(),
                    Watermark::sentinel()
                ),
            }
        }
        Commands::Status => {
            let pool = db::connect_lazy(&cfg.postgres)?;
            let writer = build_writer(&cfg, &RetryPolicy::single_attempt()).await?;
            let report = status::collect(&pool, &cfg.postgres.schema, &writer).await;
            println!("{}", report);
            pool.close().await;
        }
    }

    Ok(())
}

async fn build_writer(cfg: &Config, retry: &RetryPolicy) -> Result<IndexWriter> {
    let checkpoint = checkpoint::open(&cfg.checkpoint, retry).await?;
    Ok(IndexWriter::new(&cfg.elasticsearch, retry.clone(), checkpoint)?)
}

async fn build_pipeline(cfg: &Config, retry: &RetryPolicy) -> Result<Pipeline> {
    let pool = db::connect(&cfg.postgres, retry).await?;
    let source = PgSource::new(pool, &cfg.postgres.schema, retry.clone());
    let extractor = Extractor::new(Box::new(source), cfg.etl.batch_size);
    let writer = build_writer(cfg, retry).await?;
    Ok(Pipeline::new(extractor, writer, cfg.etl.poll_interval()))
}
