//! Storage interface for weather data
//!
//! Every write is a natural-key upsert, so replaying an ingestion or an
//! aggregate job converges on the same rows. Two backends are provided:
//! [`PgWeatherStore`] for production and [`MemoryWeatherStore`] for tests
//! and local runs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::IngestResult;
use crate::models::{
    IngestionLog, Parameter, Region, SeasonalSummary, WeatherAggregate, WeatherRecord,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryWeatherStore;
pub use postgres::PgWeatherStore;

/// Result of a record or summary upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Per-row result of a batch upsert; a failed row carries its error message
pub type RowResult = Result<UpsertOutcome, String>;

/// Result of an aggregate write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateWrite {
    Created,
    Updated,
    /// Row already existed and `force` was not set
    Skipped,
}

/// Optional region/parameter scope for reading records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub region: Option<String>,
    pub parameter: Option<String>,
}

impl RecordFilter {
    pub fn new(region: Option<String>, parameter: Option<String>) -> Self {
        Self { region, parameter }
    }

    pub fn matches(&self, region: &str, parameter: &str) -> bool {
        self.region.as_deref().map_or(true, |r| r == region)
            && self.parameter.as_deref().map_or(true, |p| p == parameter)
    }
}

/// Storage backend used by the persister, aggregate engine and orchestrator
#[async_trait]
pub trait WeatherStore: Send + Sync {
    async fn find_region(&self, code: &str) -> IngestResult<Option<Region>>;

    async fn find_parameter(&self, code: &str) -> IngestResult<Option<Parameter>>;

    /// Fetch the region by code, creating an active one named after the code
    async fn get_or_create_region(&self, code: &str) -> IngestResult<Region>;

    async fn get_or_create_parameter(
        &self,
        code: &str,
        display_name: &str,
        unit: &str,
    ) -> IngestResult<Parameter>;

    /// Upsert records by (region, parameter, date) inside one transaction
    ///
    /// A failing row is reported in its slot of the returned vector and does
    /// not roll back the rest of the batch.
    async fn upsert_records(
        &self,
        region: &Region,
        parameter: &Parameter,
        records: &[WeatherRecord],
    ) -> IngestResult<Vec<RowResult>>;

    /// Upsert summaries by (region, parameter, year, season)
    async fn upsert_summaries(
        &self,
        region: &Region,
        parameter: &Parameter,
        summaries: &[SeasonalSummary],
    ) -> IngestResult<Vec<RowResult>>;

    /// Records matching the filter, ordered by region, parameter and date
    async fn load_records(&self, filter: &RecordFilter) -> IngestResult<Vec<WeatherRecord>>;

    /// Create the aggregate, or overwrite an existing one only when `force`
    async fn upsert_aggregate(
        &self,
        aggregate: &WeatherAggregate,
        force: bool,
    ) -> IngestResult<AggregateWrite>;

    async fn create_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()>;

    async fn update_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()>;

    async fn get_ingestion_log(&self, id: Uuid) -> IngestResult<Option<IngestionLog>>;
}
