//! # Vector Keep CLI (`vkeep`)
//!
//! The `vkeep` binary is the primary interface for Vector Keep. It provides
//! commands for workspace initialization, store creation and updates,
//! classification-filtered similarity queries, and background-job inspection.
//!
//! ## Usage
//!
//! ```bash
//! vkeep --config ./config/vkeep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vkeep init` | Create the store and job directories |
//! | `vkeep create <name> [paths...]` | Build a new vector store from zero or more files |
//! | `vkeep add <store-id> <paths...>` | Append files to an existing store |
//! | `vkeep query <store-id> "<text>"` | Similarity search with optional classification filter |
//! | `vkeep stores` | List stores and their health |
//! | `vkeep delete <store-id>` | Remove a store (idempotent) |
//! | `vkeep jobs list` | List background jobs, newest first |
//! | `vkeep jobs show <id>` | Print one job record |
//! | `vkeep jobs cancel <id>` | Cooperatively cancel a running job |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the workspace
//! vkeep init --config ./config/vkeep.toml
//!
//! # Build a store from a documents directory
//! vkeep create reports ./docs --classification "U" --config ./config/vkeep.toml
//!
//! # Query it, restricted to unclassified chunks
//! vkeep query <store-id> "supply routes" --classifications UNCLASSIFIED
//!
//! # Watch and cancel long builds
//! vkeep jobs list --status processing
//! vkeep jobs cancel <job-id>
//! ```

mod chunker;
mod classification;
mod config;
mod embedding;
mod error;
mod extract;
mod index;
mod ingest;
mod jobs;
mod models;
mod progress;
mod search;
mod store;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::ingest::IngestOptions;
use crate::jobs::JobTracker;
use crate::models::JobStatus;
use crate::progress::ProgressMode;

/// Vector Keep — a classification-aware vector store engine with durable
/// background jobs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vkeep.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vkeep",
    about = "Vector Keep — a classification-aware vector store engine with durable background jobs",
    version,
    long_about = "Vector Keep manages a directory of vector stores: documents are split into \
    classification-tagged chunks, embedded in batches through a configurable provider, and \
    served back via classification-filtered similarity queries. Long-running builds are tracked \
    as durable, cancellable background jobs."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/vkeep.toml`. Storage locations, chunking sizes,
    /// and the embedding provider are read from this file.
    #[arg(long, global = true, default_value = "./config/vkeep.toml")]
    config: PathBuf,

    /// Progress output on stderr: off, human, or json.
    /// Defaults to human when stderr is a TTY, off otherwise.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the workspace directories.
    ///
    /// Creates the store base directory and the jobs directory. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Build a new vector store.
    ///
    /// With no paths this creates an empty (but durable and queryable)
    /// store. With paths, each supported file is extracted, split into
    /// classification-tagged chunks, and embedded under a background job.
    Create {
        /// Human-readable store name.
        name: String,

        /// Files or directories to ingest. Directories are walked recursively.
        paths: Vec<PathBuf>,

        /// Store description recorded in metadata.
        #[arg(long, default_value = "")]
        description: String,

        /// Security classification applied to every ingested file
        /// (e.g. "U", "S//NF"). Defaults to UNCLASSIFIED with a warning.
        #[arg(long)]
        classification: Option<String>,

        /// Only ingest walked files matching this glob (repeatable).
        #[arg(long)]
        include: Vec<String>,

        /// Skip walked files matching this glob (repeatable).
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Append files to an existing store.
    Add {
        /// Target store id.
        store_id: String,

        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Security classification applied to every ingested file.
        #[arg(long)]
        classification: Option<String>,

        /// Only ingest walked files matching this glob (repeatable).
        #[arg(long)]
        include: Vec<String>,

        /// Skip walked files matching this glob (repeatable).
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Similarity search against one store.
    Query {
        /// Target store id.
        store_id: String,

        /// Query text.
        query: String,

        /// Maximum results to return (default from config).
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum relevance in [0, 1] (default from config).
        #[arg(long)]
        threshold: Option<f32>,

        /// Comma-separated allowed chunk classifications
        /// (e.g. "UNCLASSIFIED,CONFIDENTIAL"). Absent means no filtering.
        #[arg(long)]
        classifications: Option<String>,

        /// Print results as JSON instead of the human listing.
        #[arg(long)]
        json: bool,
    },

    /// List stores and their health.
    Stores,

    /// Remove a store. Idempotent: a missing store is reported, not an error.
    Delete {
        /// Target store id.
        store_id: String,
    },

    /// Inspect and manage background jobs.
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },
}

#[derive(Subcommand)]
enum JobsCommands {
    /// List jobs, newest first.
    List {
        /// Filter by status (pending, processing, paused, completed, failed, cancelled).
        #[arg(long)]
        status: Option<String>,

        /// Filter by operation type (e.g. create_store, update_store).
        #[arg(long)]
        operation: Option<String>,

        /// Page size (default from config).
        #[arg(long)]
        limit: Option<usize>,

        /// Number of records to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print one job record as JSON.
    Show {
        /// Job id.
        job_id: String,
    },

    /// Cancel a job. Cancellation is cooperative: the running operation
    /// stops at its next batch boundary.
    Cancel {
        /// Job id.
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::Create {
            name,
            paths,
            description,
            classification,
            include,
            exclude,
        } => {
            let opts = IngestOptions {
                classification,
                include_globs: include,
                exclude_globs: exclude,
            };
            ingest::run_create(&config, &name, &description, &paths, &opts, progress).await
        }
        Commands::Add {
            store_id,
            paths,
            classification,
            include,
            exclude,
        } => {
            let opts = IngestOptions {
                classification,
                include_globs: include,
                exclude_globs: exclude,
            };
            ingest::run_add(&config, &store_id, &paths, &opts, progress).await
        }
        Commands::Query {
            store_id,
            query,
            top_k,
            threshold,
            classifications,
            json,
        } => {
            search::run_search(
                &config,
                &store_id,
                &query,
                top_k,
                threshold,
                classifications.as_deref(),
                json,
            )
            .await
        }
        Commands::Stores => search::run_stores(&config),
        Commands::Delete { store_id } => search::run_delete(&config, &store_id).await,
        Commands::Jobs { command } => run_jobs(&config, command),
    }
}

fn run_init(config: &config::Config) -> Result<()> {
    std::fs::create_dir_all(&config.storage.base_dir)?;
    std::fs::create_dir_all(&config.storage.jobs_dir)?;
    println!(
        "initialized (stores: {}, jobs: {})",
        config.storage.base_dir.display(),
        config.storage.jobs_dir.display()
    );
    Ok(())
}

fn run_jobs(config: &config::Config, command: JobsCommands) -> Result<()> {
    let tracker = Arc::new(JobTracker::new(config.storage.jobs_dir.clone())?);
    match command {
        JobsCommands::List {
            status,
            operation,
            limit,
            offset,
        } => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let limit = limit.unwrap_or(config.jobs.default_page_size);
            let jobs = tracker.list(status, operation.as_deref(), limit, offset)?;
            if jobs.is_empty() {
                println!("No jobs.");
                return Ok(());
            }
            for job in jobs {
                println!(
                    "{}  {}  {}  {}/{} ({:.0}%)  started {}",
                    job.id,
                    job.operation_type,
                    job.status,
                    job.processed_items,
                    job.total_items,
                    job.progress_percentage,
                    job.started_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
            Ok(())
        }
        JobsCommands::Show { job_id } => {
            let job = tracker.get(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        JobsCommands::Cancel { job_id } => {
            if tracker.cancel(&job_id)? {
                println!("cancelled {}", job_id);
            } else {
                println!("job {} is already finished; nothing to cancel", job_id);
            }
            Ok(())
        }
    }
}
