//! # VIVY CLI (`vivy`)
//!
//! The `vivy` binary drives the ingestion pipeline: database setup, work
//! import, ingest runs, manual record edits, checkpoints, and the
//! raw-to-ready sort pass.
//!
//! ## Usage
//!
//! ```bash
//! vivy --config ./config/vivy.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vivy init` | Create the SQLite database and tables |
//! | `vivy import <file>` | Load a JSON dump of work documents |
//! | `vivy extract --output <file>` | Write the raw translations/links extraction |
//! | `vivy ingest` | Normalize works, download files, checkpoint the index |
//! | `vivy update <id> ...` | Change fields or files of one record |
//! | `vivy copy <file> --record <json>` | Add a record from a local file |
//! | `vivy checkpoint` | Write staged state to `index.json` and the error file |
//! | `vivy sort` | Copy or convert scores from a raw index into this one |
//! | `vivy stats` | Summarize the index |
//!
//! Logging is controlled by `RUST_LOG` and goes to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vivy_ingest::acquire::UpdateOp;
use vivy_ingest::config;
use vivy_ingest::db;
use vivy_ingest::ingest::{self, IngestOptions};
use vivy_ingest::migrate;
use vivy_ingest::models::IndexRecord;
use vivy_ingest::progress::ProgressMode;
use vivy_ingest::sort;
use vivy_ingest::source;
use vivy_ingest::stats;

/// VIVY: choral score ingestion and indexing.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vivy.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vivy",
    about = "VIVY: ingest choral works, download their scores, and keep a durable index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vivy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import a JSON dump (array of work documents) into the works table.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Write the raw extraction (id, translations, download links) of
    /// every ingestible work.
    Extract {
        #[arg(long)]
        output: PathBuf,
    },

    /// Run the ingestion pipeline.
    ///
    /// Seeds staging from the current index, processes every ingestible
    /// work with a bounded worker pool, and checkpoints periodically.
    Ingest {
        /// Maximum number of works to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Normalize only: report counts without downloading or writing.
        #[arg(long)]
        dry_run: bool,

        /// Drop staged state from earlier runs before seeding.
        #[arg(long)]
        fresh: bool,

        /// Progress output on stderr: off, human, or json.
        /// Defaults to human on a TTY, off otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Update one record.
    Update {
        /// Record id.
        id: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        composer: Option<String>,

        #[arg(long)]
        method: Option<u8>,

        /// New value of the record's `version` field.
        #[arg(long = "record-version")]
        record_version: Option<String>,

        /// JSON object of extra fields to merge into the record.
        #[arg(long)]
        additional: Option<String>,

        /// Links to download into the record directory. Requires `--add`.
        #[arg(long, num_args = 1.., requires = "add")]
        links: Vec<String>,

        /// `true` adds the links to the existing files, `false` replaces them.
        #[arg(long, requires = "links")]
        add: Option<bool>,
    },

    /// Add a record from a local file.
    Copy {
        /// File to copy into the record directory.
        file: PathBuf,

        /// Path to a JSON file holding the index record to commit.
        #[arg(long)]
        record: PathBuf,
    },

    /// Write staged state to the index and error files.
    Checkpoint,

    /// Sort a raw index into this one (see `[sort]` in the config).
    Sort,

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vivy_ingest=info,vivy_ingest_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;
            let imported = source::import_works(&pool, &file).await?;
            pool.close().await;
            println!("import {}", file.display());
            println!("  works imported: {}", imported);
            println!("ok");
        }
        Commands::Extract { output } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;
            let work_source = source::from_config(&cfg, Some(&pool))?;
            let written = source::extract_raw(work_source.as_ref(), &output).await?;
            pool.close().await;
            println!("extract {}", work_source.name());
            println!("  works written: {}", written);
            println!("  output: {}", output.display());
            println!("ok");
        }
        Commands::Ingest {
            limit,
            dry_run,
            fresh,
            progress,
        } => {
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(value) => match ProgressMode::parse(value) {
                    Some(mode) => mode,
                    None => bail!("Unknown progress mode: '{}'. Must be off, human, or json.", value),
                },
            };
            let options = IngestOptions {
                limit,
                dry_run,
                fresh,
            };
            ingest::run_ingest(&cfg, &options, mode).await?;
        }
        Commands::Update {
            id,
            text,
            title,
            composer,
            method,
            record_version,
            additional,
            links,
            add,
        } => {
            let mut ops = Vec::new();
            if let Some(text) = text {
                ops.push(UpdateOp::SetText(text));
            }
            if let Some(title) = title {
                ops.push(UpdateOp::SetTitle(title));
            }
            if let Some(composer) = composer {
                ops.push(UpdateOp::SetComposer(composer));
            }
            if let Some(method) = method {
                ops.push(UpdateOp::SetMethod(method));
            }
            if let Some(version) = record_version {
                ops.push(UpdateOp::SetVersion(version));
            }
            if let Some(json) = additional {
                let fields: Map<String, Value> = serde_json::from_str(&json)
                    .with_context(|| "--additional must be a JSON object")?;
                ops.push(UpdateOp::MergeAdditional(fields));
            }
            match (links.is_empty(), add) {
                (true, None) => {}
                (false, Some(add)) => ops.push(UpdateOp::ReplaceLinks { links, add }),
                _ => bail!("--links and --add must be given together"),
            }
            ingest::run_update(&cfg, &id, &ops).await?;
        }
        Commands::Copy {
            file,
            record: record_path,
        } => {
            let content = std::fs::read_to_string(&record_path)
                .with_context(|| format!("Failed to read {}", record_path.display()))?;
            let record: IndexRecord = serde_json::from_str(&content).with_context(|| {
                format!("Failed to parse index record {}", record_path.display())
            })?;
            ingest::run_copy(&cfg, &file, &record).await?;
        }
        Commands::Checkpoint => {
            ingest::run_checkpoint(&cfg).await?;
        }
        Commands::Sort => {
            sort::run_sort(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
