//! Idempotent persistence of parsed bulletins
//!
//! Records are validated and upserted in fixed-size batches. Every record
//! ends in exactly one [`RecordOutcome`]; only a failure of a whole batch
//! (the store itself being unavailable) is returned as an error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use ukclim_common::types::{parameter_display_name, parameter_unit};

use crate::error::{IngestError, IngestResult};
use crate::jobs::AggregateJob;
use crate::models::{IngestionLog, Parameter, Region};
use crate::parser::ParsedBulletin;
use crate::queue::TaskQueue;
use crate::storage::{RowResult, UpsertOutcome, WeatherStore};
use crate::validator::{is_unusual_value, validate_record, ValidationError};

/// Final state of one record or summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    Rejected(ValidationError),
    Failed(String),
}

impl From<RowResult> for RecordOutcome {
    fn from(result: RowResult) -> Self {
        match result {
            Ok(UpsertOutcome::Created) => RecordOutcome::Created,
            Ok(UpsertOutcome::Updated) => RecordOutcome::Updated,
            Err(message) => RecordOutcome::Failed(message),
        }
    }
}

/// Counters for one persist call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub records_created: i64,
    pub records_updated: i64,
    pub summaries_created: i64,
    pub summaries_updated: i64,
    /// Records rejected by validation
    pub rejected: i64,
    /// Records or summaries the store failed to write
    pub failed: i64,
}

impl PersistStats {
    pub fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.records_created += 1,
            RecordOutcome::Updated => self.records_updated += 1,
            RecordOutcome::Rejected(_) => self.rejected += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn summary(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.summaries_created += 1,
            RecordOutcome::Updated => self.summaries_updated += 1,
            RecordOutcome::Rejected(_) => self.rejected += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn created(&self) -> i64 {
        self.records_created + self.summaries_created
    }

    pub fn updated(&self) -> i64 {
        self.records_updated + self.summaries_updated
    }

    /// Rejected and failed rows together
    pub fn failed_total(&self) -> i64 {
        self.rejected + self.failed
    }

    /// Whether any monthly record was written
    pub fn touched_records(&self) -> bool {
        self.records_created + self.records_updated > 0
    }
}

/// Writes parsed bulletins and closes their ingestion log
#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn WeatherStore>,
    queue: Arc<dyn TaskQueue>,
    batch_size: usize,
}

impl Persister {
    pub fn new(store: Arc<dyn WeatherStore>, queue: Arc<dyn TaskQueue>, batch_size: usize) -> Self {
        Self {
            store,
            queue,
            batch_size: batch_size.max(1),
        }
    }

    /// Persist a bulletin and move `log` to `completed` or `partial`
    ///
    /// Reference rows are resolved from the first record, or the first
    /// summary when there are no records. When any record was written an
    /// aggregate refresh for the pair is enqueued; a queue failure is logged
    /// and does not affect the result.
    pub async fn persist(
        &self,
        bulletin: &ParsedBulletin,
        log: &mut IngestionLog,
    ) -> IngestResult<PersistStats> {
        let (region_code, parameter_code) = match (bulletin.records.first(), bulletin.summaries.first()) {
            (Some(r), _) => (r.region.as_str(), r.parameter.as_str()),
            (None, Some(s)) => (s.region.as_str(), s.parameter.as_str()),
            (None, None) => return Err(IngestError::NoUsableData),
        };

        let region = self.store.get_or_create_region(region_code).await?;
        let parameter = self
            .store
            .get_or_create_parameter(
                parameter_code,
                &parameter_display_name(parameter_code),
                parameter_unit(parameter_code),
            )
            .await?;

        let mut stats = PersistStats::default();
        self.persist_records(bulletin, &region, &parameter, &mut stats).await?;
        self.persist_summaries(bulletin, &region, &parameter, &mut stats).await?;

        log.records_processed = (bulletin.records.len() + bulletin.summaries.len()) as i64;
        log.records_created = stats.created();
        log.records_updated = stats.updated();
        log.records_failed = stats.failed_total();
        if stats.failed_total() == 0 {
            log.mark_completed()?;
        } else {
            log.mark_partial()?;
        }
        self.store.update_ingestion_log(log).await?;

        info!(
            region = %region.code,
            parameter = %parameter.code,
            created = stats.created(),
            updated = stats.updated(),
            failed = stats.failed_total(),
            status = %log.status,
            "Persisted bulletin"
        );

        if stats.touched_records() {
            let job = AggregateJob::all_for_pair(&region.code, &parameter.code);
            if let Err(e) = self.queue.enqueue(job).await {
                error!(
                    region = %region.code,
                    parameter = %parameter.code,
                    "Failed to schedule aggregate generation: {}",
                    e
                );
            }
        }

        Ok(stats)
    }

    async fn persist_records(
        &self,
        bulletin: &ParsedBulletin,
        region: &Region,
        parameter: &Parameter,
        stats: &mut PersistStats,
    ) -> IngestResult<()> {
        for chunk in bulletin.records.chunks(self.batch_size) {
            let mut valid = Vec::with_capacity(chunk.len());
            for record in chunk {
                match validate_record(record) {
                    Ok(()) => {
                        if is_unusual_value(record) {
                            warn!(
                                region = %region.code,
                                parameter = %parameter.code,
                                date = %record.date,
                                value = %record.value,
                                "Value outside [-50, 50], storing anyway"
                            );
                        }
                        valid.push(record.clone());
                    },
                    Err(e) => {
                        warn!(
                            region = %region.code,
                            parameter = %parameter.code,
                            date = %record.date,
                            "Rejected record: {}",
                            IngestError::from(e.clone())
                        );
                        stats.record(&RecordOutcome::Rejected(e));
                    },
                }
            }

            if valid.is_empty() {
                continue;
            }
            for result in self.store.upsert_records(region, parameter, &valid).await? {
                stats.record(&RecordOutcome::from(result));
            }
        }
        Ok(())
    }

    async fn persist_summaries(
        &self,
        bulletin: &ParsedBulletin,
        region: &Region,
        parameter: &Parameter,
        stats: &mut PersistStats,
    ) -> IngestResult<()> {
        for chunk in bulletin.summaries.chunks(self.batch_size) {
            for result in self.store.upsert_summaries(region, parameter, chunk).await? {
                stats.summary(&RecordOutcome::from(result));
            }
        }
        Ok(())
    }
}
