//! scp-ingest - study file ingest orchestrator
//!
//! Command-line entry point: dispatch uploaded files, run differential
//! expression on one study or backfill many, and release stranded parse
//! claims.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use scp_common::config::IngestConfig;
use scp_common::events::EventBus;
use scp_ingest::models::Requester;
use scp_ingest::services::{
    reconcile_stranded_claims, DeOptions, DispatchOptions, DispatchResult, HttpBatchClient,
};
use scp_ingest::{db, IngestServices};

/// Command-line arguments for scp-ingest
#[derive(Parser, Debug)]
#[command(name = "scp-ingest")]
#[command(about = "Study file ingest orchestrator")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SCP_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides configuration)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dispatch an uploaded file for parsing
    Dispatch {
        #[arg(long)]
        file_id: Uuid,
        /// Email of the user requesting the parse
        #[arg(long)]
        requester: String,
        #[arg(long)]
        reparse: bool,
        #[arg(long)]
        persist_on_fail: bool,
        /// AnnData: re-extract a single clustering
        #[arg(long)]
        obsm_key: Option<String>,
        /// AnnData: extract raw counts only
        #[arg(long)]
        raw_counts_only: bool,
    },
    /// Run DE on a study's default clustering and annotation
    DeDefault {
        #[arg(long)]
        accession: String,
        #[command(flatten)]
        de: DeArgs,
    },
    /// Run DE for every eligible annotation of a study
    DeAll {
        #[arg(long)]
        accession: String,
        #[arg(long)]
        skip_existing: bool,
        #[command(flatten)]
        de: DeArgs,
    },
    /// Run DE across studies without author results
    Backfill {
        /// Restrict to these accessions (default: every live study)
        #[arg(long = "accession")]
        accessions: Vec<String>,
        #[command(flatten)]
        de: DeArgs,
    },
    /// Release parse claims never confirmed by the batch service
    Reconcile {
        /// Overrides reconcile.stale_after_minutes
        #[arg(long)]
        stale_after_minutes: Option<i64>,
    },
}

#[derive(clap::Args, Debug)]
struct DeArgs {
    /// Validate and dedup without submitting
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    machine_type: Option<String>,
    /// Email recorded on submitted jobs
    #[arg(long)]
    requester: Option<String>,
}

impl DeArgs {
    fn options(&self, skip_existing: bool) -> DeOptions {
        DeOptions {
            skip_existing,
            dry_run: self.dry_run,
            machine_type: self.machine_type.clone(),
            requester: self.requester.clone().map(Requester::new),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = IngestConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scp-ingest {}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database_path(args.database.as_deref());
    info!("Database: {}", db_path.display());
    let pool = db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let event_bus = EventBus::new(100);

    if let Command::Reconcile { stale_after_minutes } = &args.command {
        let minutes = stale_after_minutes.unwrap_or(config.reconcile.stale_after_minutes);
        let released = reconcile_stranded_claims(
            &pool,
            &event_bus,
            chrono::Duration::minutes(minutes),
            config.database.max_lock_wait_ms,
        )
        .await?;
        println!("released {} stale parse claims", released.len());
        return Ok(());
    }

    let batch_client = Arc::new(HttpBatchClient::from_config(&config.batch)?);
    let services = IngestServices::start(pool.clone(), event_bus, &config, batch_client)?;

    let outcome = run(&services, &pool, args.command).await;
    services.shutdown().await;
    outcome
}

async fn run(services: &IngestServices, pool: &sqlx::SqlitePool, command: Command) -> Result<()> {
    match command {
        Command::Dispatch {
            file_id,
            requester,
            reparse,
            persist_on_fail,
            obsm_key,
            raw_counts_only,
        } => {
            let file = db::files::load_study_file(pool, file_id)
                .await?
                .with_context(|| format!("Study file {} not found", file_id))?;
            let study = db::studies::load_study(pool, file.study_id)
                .await?
                .with_context(|| format!("Study {} not found", file.study_id))?;
            let options = DispatchOptions {
                reparse,
                persist_on_fail,
                obsm_key,
                raw_counts_only,
            };

            let result = services
                .router
                .dispatch(&file, &study, &Requester::new(requester), &options)
                .await?;
            println!("{}", dispatch_summary(&result));
        }
        Command::DeDefault { accession, de } => {
            let submitted = services.de_engine.run_on_default(&accession, &de.options(false)).await?;
            println!("{}: {}", accession, if submitted { "submitted" } else { "skipped" });
        }
        Command::DeAll {
            accession,
            skip_existing,
            de,
        } => {
            let jobs = services.de_engine.run_on_all(&accession, &de.options(skip_existing)).await?;
            println!("{}: {} jobs", accession, jobs);
        }
        Command::Backfill { accessions, de } => {
            let accessions = if accessions.is_empty() { None } else { Some(accessions) };
            let summary = services.de_engine.backfill(accessions, &de.options(true)).await?;
            for (accession, jobs) in &summary.per_study {
                println!("{}: {} jobs", accession, jobs);
            }
            for accession in &summary.skipped {
                println!("{}: skipped", accession);
            }
            println!("total: {} jobs", summary.total_jobs);
        }
        Command::Reconcile { .. } => {}
    }
    Ok(())
}

/// Status code, followed by the error when dispatch was refused
fn dispatch_summary(result: &DispatchResult) -> String {
    match &result.error {
        Some(error) => format!("{} {}", result.code(), error),
        None => result.code().to_string(),
    }
}
