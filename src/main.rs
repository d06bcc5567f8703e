//! # kbsync CLI
//!
//! The `kbsync` binary reconciles a user's knowledge base on the platform,
//! watches indexing jobs, and serves the HTTP endpoint layer.
//!
//! ## Usage
//!
//! ```bash
//! kbsync --config ./config/kbsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbsync init` | Create the state database |
//! | `kbsync list` | List knowledge bases on the platform |
//! | `kbsync reconcile` | Reconcile a user's KB and start/resume indexing |
//! | `kbsync status <job-id>` | Fetch an indexing job's status once |
//! | `kbsync watch <job-id>` | Poll an indexing job until it finishes |
//! | `kbsync serve` | Start the HTTP endpoint layer |
//!
//! Results are printed to stdout as JSON; logs and progress go to stderr.
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kbsync::config::{self, Config};
use kbsync::gateway::{HttpGateway, ResourceGateway};
use kbsync::migrate;
use kbsync::models::{ReconcileSummary, UserKbState};
use kbsync::monitor::{JobMonitor, PollOptions};
use kbsync::progress::ProgressMode;
use kbsync::reconcile::Reconciler;
use kbsync::server;
use kbsync::state_store::StateStore;

/// kbsync: keeps per-user knowledge bases in step with their documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. The platform token is read from the environment variable named by
/// `[platform].token_env` (default `GENAI_API_TOKEN`).
#[derive(Parser)]
#[command(
    name = "kbsync",
    about = "Reconcile per-user knowledge bases on a managed GenAI platform",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the state database schema.
    ///
    /// Requires a `[db]` section. Idempotent.
    Init,

    /// List knowledge bases on the platform.
    List,

    /// Reconcile a user's knowledge base and start or resume indexing.
    ///
    /// Finds or creates the knowledge base by name, points its single data
    /// source at `--path`, then starts an indexing job (or adopts one that
    /// is already running). Safe to re-run after a failure.
    Reconcile {
        /// Owner of the knowledge base.
        #[arg(long)]
        user: String,

        /// Knowledge base name (exact, case-sensitive).
        #[arg(long)]
        kb_name: String,

        /// Object-storage path the data source should index.
        #[arg(long)]
        path: String,

        /// Object-storage bucket.
        #[arg(long)]
        bucket: String,

        /// Job id from a previous run, checked before starting a new job.
        /// Defaults to the stored snapshot's last job when `[db]` is set.
        #[arg(long)]
        resume_job: Option<String>,

        /// Poll the indexing job until it finishes.
        #[arg(long)]
        wait: bool,

        /// Progress output while waiting: `off`, `human`, or `json`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Fetch an indexing job's status once.
    Status {
        /// Indexing job id.
        job_id: String,
    },

    /// Poll an indexing job until it completes, fails, or attempts run out.
    Watch {
        /// Indexing job id.
        job_id: String,

        /// Override `[monitor].max_attempts`.
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Progress output: `off`, `human`, or `json`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Start the HTTP endpoint layer on `[server].bind`.
    Serve,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn progress_mode(flag: Option<&str>) -> Result<ProgressMode> {
    match flag {
        None => Ok(ProgressMode::default_for_tty()),
        Some(s) => ProgressMode::parse(s).ok_or_else(|| {
            anyhow::anyhow!("Unknown progress mode: '{}'. Must be off, human, or json.", s)
        }),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let Some(db) = &cfg.db else {
                bail!("[db] section required for init");
            };
            migrate::run_migrations(db).await?;
            println!("State database initialized at {}.", db.path.display());
        }
        Commands::List => {
            let gateway = HttpGateway::from_config(&cfg.platform)?;
            let kbs = gateway.list_knowledge_bases().await?;
            println!("{:<38} {:<32} DATA SOURCES", "ID", "NAME");
            for kb in &kbs {
                println!("{:<38} {:<32} {}", kb.id, kb.name, kb.data_sources.len());
            }
        }
        Commands::Reconcile {
            user,
            kb_name,
            path,
            bucket,
            resume_job,
            wait,
            progress,
        } => {
            let mode = progress_mode(progress.as_deref())?;
            run_reconcile(&cfg, user, kb_name, path, bucket, resume_job, wait, mode).await?;
        }
        Commands::Status { job_id } => {
            let gateway = HttpGateway::from_config(&cfg.platform)?;
            let job = JobMonitor::new(&gateway).status(&job_id).await?;
            print_json(&job)?;
        }
        Commands::Watch {
            job_id,
            max_attempts,
            progress,
        } => {
            let gateway = HttpGateway::from_config(&cfg.platform)?;
            let mut options = PollOptions::from(&cfg.monitor);
            if let Some(n) = max_attempts {
                options.max_attempts = n;
            }
            let reporter = progress_mode(progress.as_deref())?.reporter();
            let job = JobMonitor::new(&gateway)
                .poll(&job_id, &options, reporter.as_ref())
                .await?;
            print_json(&job)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_reconcile(
    cfg: &Config,
    user: String,
    kb_name: String,
    path: String,
    bucket: String,
    resume_job: Option<String>,
    wait: bool,
    mode: ProgressMode,
) -> Result<()> {
    let gateway = HttpGateway::from_config(&cfg.platform)?;
    let store = match &cfg.db {
        Some(db) => Some(StateStore::open(db).await?),
        None => None,
    };

    let mut snapshot = match &store {
        Some(store) => store.load_or_new(&user, &kb_name).await?,
        None => UserKbState::new(&user, &kb_name),
    };
    if resume_job.is_some() {
        snapshot.last_indexing_job_id = resume_job;
    }

    let reconciler = Reconciler::new(&gateway, &cfg.provisioning);
    let (outcome, mut next) = reconciler.reconcile_state(&snapshot, &path, &bucket).await?;
    if let Some(store) = &store {
        store.save(&next).await?;
    }

    tracing::debug!(%user, %kb_name, job_id = %outcome.job_id, "reconcile finished");
    print_json(&ReconcileSummary::from(&outcome))?;

    if wait {
        let reporter = mode.reporter();
        let job = JobMonitor::new(&gateway)
            .poll(&outcome.job_id, &PollOptions::from(&cfg.monitor), reporter.as_ref())
            .await?;
        next = next.after_indexing_completed();
        if let Some(store) = &store {
            store.save(&next).await?;
        }
        print_json(&job)?;
    }

    if let Some(store) = &store {
        store.close().await;
    }
    Ok(())
}
