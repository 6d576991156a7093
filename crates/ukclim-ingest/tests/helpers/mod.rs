//! Test helpers for ukclim-ingest integration tests
//!
//! - A mock Met Office server serving bulletins per (parameter, region)
//! - Store and queue wrappers that fail on demand
//! - Bulletin text builders
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ukclim_ingest::config::{IngestConfig, SourceConfig};
use ukclim_ingest::error::{IngestError, IngestResult};
use ukclim_ingest::jobs::AggregateJob;
use ukclim_ingest::models::{
    IngestionLog, Parameter, Region, SeasonalSummary, WeatherAggregate, WeatherRecord,
};
use ukclim_ingest::queue::TaskQueue;
use ukclim_ingest::storage::{
    AggregateWrite, MemoryWeatherStore, RecordFilter, RowResult, WeatherStore,
};

// ============================================================================
// Bulletin fixtures
// ============================================================================

/// Full 2023 row from the Met Office Tmax UK series, April withheld
pub const ROW_2023_NO_APRIL: &str =
    "2023 5.1 6.2 7.3 --- 9.1 10.2 11.0 12.1 10.5 8.2 6.1 4.0 3.5 6.2 11.1 8.3 7.8";

pub const ROW_2022: &str =
    "2022 6.0 7.9 10.5 12.8 16.6 19.6 23.2 23.0 18.5 15.2 10.4 5.3 6.9 13.3 21.9 14.7 14.1";

/// Build a bulletin with the usual free-text preamble and column header
pub fn bulletin(rows: &[&str]) -> String {
    let mut text = String::from(
        "UK Tmax series\n\
         Areal values, starting from 1884\n\
         Last updated 01-Dec-2023 09:40\n\
         \n\
         year    jan    feb    mar    apr    may    jun    jul    aug    sep    oct    nov    dec     win    spr    sum    aut    ann\n",
    );
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

// ============================================================================
// Mock source
// ============================================================================

pub struct MockSource {
    pub server: MockServer,
}

impl MockSource {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Serve `body` for one pair
    pub async fn serve(&self, parameter: &str, region: &str, body: impl Into<String>) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/date/{}.txt", parameter, region)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.into()))
            .mount(&self.server)
            .await;
    }

    /// Respond with `status` for one pair
    pub async fn fail(&self, parameter: &str, region: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(format!("/{}/date/{}.txt", parameter, region)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub fn config(&self) -> IngestConfig {
        IngestConfig {
            source: SourceConfig {
                base_url: self.server.uri(),
                timeout_secs: 5,
                ..SourceConfig::default()
            },
            ..IngestConfig::default()
        }
    }
}

// ============================================================================
// Failing collaborators
// ============================================================================

/// In-memory store whose record writes fail for one calendar month
pub struct FlakyStore {
    pub inner: MemoryWeatherStore,
    pub failing_month: u32,
}

impl FlakyStore {
    pub fn new(failing_month: u32) -> Self {
        Self {
            inner: MemoryWeatherStore::new(),
            failing_month,
        }
    }
}

#[async_trait]
impl WeatherStore for FlakyStore {
    async fn find_region(&self, code: &str) -> IngestResult<Option<Region>> {
        self.inner.find_region(code).await
    }

    async fn find_parameter(&self, code: &str) -> IngestResult<Option<Parameter>> {
        self.inner.find_parameter(code).await
    }

    async fn get_or_create_region(&self, code: &str) -> IngestResult<Region> {
        self.inner.get_or_create_region(code).await
    }

    async fn get_or_create_parameter(
        &self,
        code: &str,
        display_name: &str,
        unit: &str,
    ) -> IngestResult<Parameter> {
        self.inner.get_or_create_parameter(code, display_name, unit).await
    }

    async fn upsert_records(
        &self,
        region: &Region,
        parameter: &Parameter,
        records: &[WeatherRecord],
    ) -> IngestResult<Vec<RowResult>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            if record.date.month() == self.failing_month {
                results.push(Err("deadlock detected".to_string()));
                continue;
            }
            let written = self
                .inner
                .upsert_records(region, parameter, std::slice::from_ref(record))
                .await?;
            results.extend(written);
        }
        Ok(results)
    }

    async fn upsert_summaries(
        &self,
        region: &Region,
        parameter: &Parameter,
        summaries: &[SeasonalSummary],
    ) -> IngestResult<Vec<RowResult>> {
        self.inner.upsert_summaries(region, parameter, summaries).await
    }

    async fn load_records(&self, filter: &RecordFilter) -> IngestResult<Vec<WeatherRecord>> {
        self.inner.load_records(filter).await
    }

    async fn upsert_aggregate(
        &self,
        aggregate: &WeatherAggregate,
        force: bool,
    ) -> IngestResult<AggregateWrite> {
        self.inner.upsert_aggregate(aggregate, force).await
    }

    async fn create_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()> {
        self.inner.create_ingestion_log(log).await
    }

    async fn update_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()> {
        self.inner.update_ingestion_log(log).await
    }

    async fn get_ingestion_log(&self, id: Uuid) -> IngestResult<Option<IngestionLog>> {
        self.inner.get_ingestion_log(id).await
    }
}

/// Queue that refuses every job
pub struct UnavailableQueue;

#[async_trait]
impl TaskQueue for UnavailableQueue {
    async fn enqueue(&self, _job: AggregateJob) -> IngestResult<()> {
        Err(IngestError::Queue("broker unavailable".to_string()))
    }
}

pub fn memory_store() -> Arc<MemoryWeatherStore> {
    Arc::new(MemoryWeatherStore::new())
}
