// Bulletin ingestion orchestrator
//
// Drives fetch -> parse -> validate/persist for (parameter, region) pairs and
// owns the ingestion log lifecycle. Each pair is an independent unit of work,
// so batches fan out over a bounded number of concurrent pairs.
//
// Failures of a single pair end in a failed log and never abort a batch.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use ukclim_common::types::{canonical_region_code, INGEST_PARAMETERS, INGEST_REGIONS};

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::fetcher::Fetcher;
use crate::models::{IngestionLog, IngestionStatus};
use crate::parser::parse_bulletin;
use crate::persister::Persister;
use crate::queue::TaskQueue;
use crate::storage::WeatherStore;

/// Which pairs a batch ingestion covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestTarget {
    Pair { parameter: String, region: String },
    /// One parameter across every known region
    AllRegions(String),
    /// Every known parameter for one region
    AllParameters(String),
    All,
}

impl IngestTarget {
    /// (parameter, region) pairs, parameters outermost
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            IngestTarget::Pair { parameter, region } => vec![(parameter.clone(), region.clone())],
            IngestTarget::AllRegions(parameter) => INGEST_REGIONS
                .iter()
                .map(|r| (parameter.clone(), r.to_string()))
                .collect(),
            IngestTarget::AllParameters(region) => INGEST_PARAMETERS
                .iter()
                .map(|p| (p.to_string(), region.clone()))
                .collect(),
            IngestTarget::All => INGEST_PARAMETERS
                .iter()
                .flat_map(|p| INGEST_REGIONS.iter().map(move |r| (p.to_string(), r.to_string())))
                .collect(),
        }
    }
}

/// Message stored on a failed log for each failure point
fn failure_message(err: &IngestError) -> String {
    match err {
        IngestError::FetchFailed { reason, .. } => {
            format!("Failed to fetch data from source: {}", reason)
        },
        IngestError::NoDataStart | IngestError::NoUsableData => {
            "No usable records or seasonal summaries parsed from source data".to_string()
        },
        other => format!("Persistence failed: {}", other),
    }
}

pub struct IngestOrchestrator {
    fetcher: Fetcher,
    store: Arc<dyn WeatherStore>,
    persister: Persister,
    concurrency: usize,
}

impl IngestOrchestrator {
    pub fn new(
        config: &IngestConfig,
        store: Arc<dyn WeatherStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> IngestResult<Self> {
        config
            .validate()
            .map_err(|e| IngestError::Config(e.to_string()))?;

        Ok(Self {
            fetcher: Fetcher::new(&config.source)?,
            persister: Persister::new(store.clone(), queue, config.batch_size),
            store,
            concurrency: config.concurrency,
        })
    }

    /// Ingest one (parameter, region) pair and return its terminal log
    ///
    /// Only failures to read or write the log itself are returned as errors;
    /// everything else is recorded on the log.
    pub async fn ingest_parameter_data(
        &self,
        parameter: &str,
        region: &str,
    ) -> IngestResult<IngestionLog> {
        let region = canonical_region_code(region);
        let source_url = self.fetcher.source_url(parameter, region);

        let region_ref = self.store.find_region(region).await?.map(|r| r.code);
        let parameter_ref = self.store.find_parameter(parameter).await?.map(|p| p.code);

        let mut log = IngestionLog::new(region_ref, parameter_ref, source_url);
        log.mark_in_progress()?;
        self.store.create_ingestion_log(&log).await?;

        info!(parameter = %parameter, region = %region, log_id = %log.id, "Starting ingestion");

        if let Err(e) = self.run(parameter, region, &mut log).await {
            let message = failure_message(&e);
            error!(parameter = %parameter, region = %region, "Ingestion failed: {}", e);

            if log.is_terminal() {
                warn!(log_id = %log.id, status = %log.status, "Log already closed, keeping status");
            } else {
                log.mark_failed(message)?;
            }
            self.store.update_ingestion_log(&log).await?;
        }

        Ok(log)
    }

    async fn run(&self, parameter: &str, region: &str, log: &mut IngestionLog) -> IngestResult<()> {
        let raw = self.fetcher.fetch(parameter, region).await?;
        let bulletin = parse_bulletin(&raw, parameter, region)?;
        if bulletin.is_empty() {
            return Err(IngestError::NoUsableData);
        }
        self.persister.persist(&bulletin, log).await?;
        Ok(())
    }

    /// Ingest every known parameter for every known region
    pub async fn ingest_all_data(&self) -> Vec<IngestionLog> {
        self.ingest_target(&IngestTarget::All).await
    }

    /// Ingest a set of pairs, at most `concurrency` at a time
    ///
    /// Logs come back in pair order. A pair whose log could not be written
    /// is reported through tracing and left out.
    pub async fn ingest_target(&self, target: &IngestTarget) -> Vec<IngestionLog> {
        let pairs = target.pairs();
        let total = pairs.len();
        let start = Instant::now();

        info!(
            "Ingesting {} parameter/region pairs (concurrency={})",
            total, self.concurrency
        );

        let logs: Vec<IngestionLog> = stream::iter(pairs)
            .map(|(parameter, region)| async move {
                match self.ingest_parameter_data(&parameter, &region).await {
                    Ok(log) => Some(log),
                    Err(e) => {
                        error!(
                            parameter = %parameter,
                            region = %region,
                            "Ingestion log could not be recorded: {}",
                            e
                        );
                        None
                    },
                }
            })
            .buffered(self.concurrency)
            .filter_map(|log| async move { log })
            .collect()
            .await;

        let count = |status: IngestionStatus| logs.iter().filter(|l| l.status == status).count();
        info!(
            total,
            completed = count(IngestionStatus::Completed),
            partial = count(IngestionStatus::Partial),
            failed = count(IngestionStatus::Failed),
            duration_secs = start.elapsed().as_secs_f64(),
            "Batch ingestion finished"
        );

        logs
    }
}
