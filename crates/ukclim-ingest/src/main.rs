//! UKCLIM Ingest - Met Office climate series ingestion tool

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use ukclim_common::logging::{init_logging, LogConfig, LogLevel};
use ukclim_common::types::lookup_region;
use ukclim_ingest::{
    aggregates::AggregateEngine,
    config::IngestConfig,
    db::{create_pool, run_migrations, DbConfig},
    jobs::{run_with_retry, AggregateJob, AggregateJobKind, RetryPolicy},
    models::IngestionStatus,
    orchestrator::{IngestOrchestrator, IngestTarget},
    queue::LocalTaskQueue,
    storage::{PgWeatherStore, WeatherStore},
};

#[derive(Parser, Debug)]
#[command(name = "ukclim-ingest")]
#[command(author, version, about = "UK climate series ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Ingest one parameter for one region
    Ingest {
        /// Parameter code (Tmax, Tmin, Tmean, Rainfall, Sunshine)
        #[arg(short, long)]
        parameter: String,

        /// Region code (UK, England, Wales, Scotland, Northern_Ireland)
        #[arg(short, long)]
        region: String,
    },

    /// Ingest every parameter/region pair, optionally restricted to one side
    IngestAll {
        /// Only this parameter, across all regions
        #[arg(short, long, conflicts_with = "region")]
        parameter: Option<String>,

        /// Only this region, across all parameters
        #[arg(short, long)]
        region: Option<String>,
    },

    /// Recompute aggregates
    Aggregate {
        /// monthly, yearly, seasonal or all
        #[arg(short, long, default_value = "all")]
        kind: AggregateJobKind,

        #[arg(short, long)]
        region: Option<String>,

        #[arg(short, long)]
        parameter: Option<String>,

        /// Overwrite existing aggregates
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ukclim-ingest")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    let config = IngestConfig::from_env()?;
    let db_config = DbConfig::from_env()?;
    let pool = create_pool(&db_config).await?;

    if let Command::Migrate = cli.command {
        run_migrations(&pool).await?;
        info!("Migrations complete");
        return Ok(());
    }

    let store: Arc<dyn WeatherStore> = Arc::new(PgWeatherStore::new(pool));
    let engine = AggregateEngine::new(store.clone());
    let policy = RetryPolicy::from(&config.aggregate);

    match cli.command {
        Command::Migrate => {},
        Command::Ingest { parameter, region } => {
            let target = IngestTarget::Pair { parameter, region };
            let failed = ingest(&config, store, engine, policy, &target).await?;
            if failed > 0 {
                anyhow::bail!("Ingestion failed");
            }
        },
        Command::IngestAll { parameter, region } => {
            let target = match (parameter, region) {
                (Some(parameter), None) => IngestTarget::AllRegions(parameter),
                (None, Some(region)) => {
                    IngestTarget::AllParameters(lookup_region(&region)?.to_string())
                },
                _ => IngestTarget::All,
            };
            let failed = ingest(&config, store, engine, policy, &target).await?;
            if failed > 0 {
                error!("{} pairs failed", failed);
            }
        },
        Command::Aggregate {
            kind,
            region,
            parameter,
            force,
        } => {
            let mut job = AggregateJob::new(kind).with_force(force);
            // Stored rows use canonical region codes
            if let Some(region) = region {
                job = job.with_region(lookup_region(&region)?);
            }
            if let Some(parameter) = parameter {
                job = job.with_parameter(parameter);
            }

            for job in job.fan_out() {
                let Some(aggregate_type) = job.kind.aggregate_type() else {
                    continue;
                };
                let name = job.name();
                let scope = job.scope();
                let report = run_with_retry(&policy, &name, || {
                    engine.generate(aggregate_type, &scope, job.force)
                })
                .await?;
                info!(
                    job = %name,
                    created = report.created,
                    updated = report.updated,
                    skipped = report.skipped,
                    "Aggregates generated"
                );
            }
        },
    }

    info!("Done");
    Ok(())
}

/// Run an ingestion target, wait for the aggregate jobs it scheduled and
/// return the number of failed pairs
async fn ingest(
    config: &IngestConfig,
    store: Arc<dyn WeatherStore>,
    engine: AggregateEngine,
    policy: RetryPolicy,
    target: &IngestTarget,
) -> Result<usize> {
    let queue = LocalTaskQueue::new(engine, policy);
    let orchestrator = IngestOrchestrator::new(config, store, Arc::new(queue.clone()))?;

    let logs = orchestrator.ingest_target(target).await;
    for log in &logs {
        info!(
            log_id = %log.id,
            region = ?log.region_code,
            parameter = ?log.parameter_code,
            status = %log.status,
            processed = log.records_processed,
            created = log.records_created,
            updated = log.records_updated,
            failed = log.records_failed,
            duration_ms = log.duration().num_milliseconds(),
            "Ingestion result"
        );
    }

    queue.wait_idle().await;
    let job_failures = queue.failed_jobs();
    if job_failures > 0 {
        error!("{} aggregate jobs failed", job_failures);
    }

    Ok(logs
        .iter()
        .filter(|log| log.status == IngestionStatus::Failed)
        .count())
}
