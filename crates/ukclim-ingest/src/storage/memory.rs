//! In-memory storage backend

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AggregateWrite, RecordFilter, RowResult, UpsertOutcome, WeatherStore};
use crate::error::{IngestError, IngestResult};
use crate::models::{
    AggregateType, IngestionLog, Parameter, Region, Season, SeasonalSummary, WeatherAggregate,
    WeatherRecord,
};

type RecordKey = (String, String, NaiveDate);
type SummaryKey = (String, String, i32, Season);
type AggregateKey = (String, String, AggregateType, NaiveDate, NaiveDate);

#[derive(Debug, Default)]
struct State {
    regions: BTreeMap<String, Region>,
    parameters: BTreeMap<String, Parameter>,
    records: BTreeMap<RecordKey, WeatherRecord>,
    summaries: BTreeMap<SummaryKey, SeasonalSummary>,
    aggregates: BTreeMap<AggregateKey, WeatherAggregate>,
    logs: BTreeMap<Uuid, IngestionLog>,
}

/// Store keeping every table in ordered maps behind one lock
#[derive(Debug, Default)]
pub struct MemoryWeatherStore {
    state: Mutex<State>,
}

impl MemoryWeatherStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<WeatherRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    pub async fn summaries(&self) -> Vec<SeasonalSummary> {
        self.state.lock().await.summaries.values().cloned().collect()
    }

    pub async fn aggregates(&self) -> Vec<WeatherAggregate> {
        self.state.lock().await.aggregates.values().cloned().collect()
    }

    pub async fn regions(&self) -> Vec<Region> {
        self.state.lock().await.regions.values().cloned().collect()
    }

    pub async fn parameters(&self) -> Vec<Parameter> {
        self.state.lock().await.parameters.values().cloned().collect()
    }

    pub async fn ingestion_logs(&self) -> Vec<IngestionLog> {
        self.state.lock().await.logs.values().cloned().collect()
    }
}

fn upsert<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> UpsertOutcome {
    match map.insert(key, value) {
        Some(_) => UpsertOutcome::Updated,
        None => UpsertOutcome::Created,
    }
}

#[async_trait]
impl WeatherStore for MemoryWeatherStore {
    async fn find_region(&self, code: &str) -> IngestResult<Option<Region>> {
        Ok(self.state.lock().await.regions.get(code).cloned())
    }

    async fn find_parameter(&self, code: &str) -> IngestResult<Option<Parameter>> {
        Ok(self.state.lock().await.parameters.get(code).cloned())
    }

    async fn get_or_create_region(&self, code: &str) -> IngestResult<Region> {
        let mut state = self.state.lock().await;
        let region = state
            .regions
            .entry(code.to_string())
            .or_insert_with(|| Region::new(code));
        Ok(region.clone())
    }

    async fn get_or_create_parameter(
        &self,
        code: &str,
        display_name: &str,
        unit: &str,
    ) -> IngestResult<Parameter> {
        let mut state = self.state.lock().await;
        let parameter = state
            .parameters
            .entry(code.to_string())
            .or_insert_with(|| Parameter::new(code, display_name, unit));
        Ok(parameter.clone())
    }

    async fn upsert_records(
        &self,
        region: &Region,
        parameter: &Parameter,
        records: &[WeatherRecord],
    ) -> IngestResult<Vec<RowResult>> {
        let mut state = self.state.lock().await;
        let results = records
            .iter()
            .map(|record| {
                let stored = WeatherRecord {
                    region: region.code.clone(),
                    parameter: parameter.code.clone(),
                    ..record.clone()
                };
                let key = (region.code.clone(), parameter.code.clone(), record.date);
                Ok(upsert(&mut state.records, key, stored))
            })
            .collect();
        Ok(results)
    }

    async fn upsert_summaries(
        &self,
        region: &Region,
        parameter: &Parameter,
        summaries: &[SeasonalSummary],
    ) -> IngestResult<Vec<RowResult>> {
        let mut state = self.state.lock().await;
        let results = summaries
            .iter()
            .map(|summary| {
                let stored = SeasonalSummary {
                    region: region.code.clone(),
                    parameter: parameter.code.clone(),
                    ..summary.clone()
                };
                let key = (
                    region.code.clone(),
                    parameter.code.clone(),
                    summary.year,
                    summary.season,
                );
                Ok(upsert(&mut state.summaries, key, stored))
            })
            .collect();
        Ok(results)
    }

    async fn load_records(&self, filter: &RecordFilter) -> IngestResult<Vec<WeatherRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| filter.matches(&r.region, &r.parameter))
            .cloned()
            .collect())
    }

    async fn upsert_aggregate(
        &self,
        aggregate: &WeatherAggregate,
        force: bool,
    ) -> IngestResult<AggregateWrite> {
        let mut state = self.state.lock().await;
        let key = (
            aggregate.region.clone(),
            aggregate.parameter.clone(),
            aggregate.aggregate_type,
            aggregate.period_start,
            aggregate.period_end,
        );
        if state.aggregates.contains_key(&key) && !force {
            return Ok(AggregateWrite::Skipped);
        }
        Ok(match upsert(&mut state.aggregates, key, aggregate.clone()) {
            UpsertOutcome::Created => AggregateWrite::Created,
            UpsertOutcome::Updated => AggregateWrite::Updated,
        })
    }

    async fn create_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()> {
        self.state.lock().await.logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn update_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.logs.get_mut(&log.id) else {
            return Err(IngestError::Persistence(format!("ingestion log {} not found", log.id)));
        };
        *stored = log.clone();
        Ok(())
    }

    async fn get_ingestion_log(&self, id: Uuid) -> IngestResult<Option<IngestionLog>> {
        Ok(self.state.lock().await.logs.get(&id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn record(month: u32, value: i32) -> WeatherRecord {
        WeatherRecord {
            region: "UK".to_string(),
            parameter: "Tmax".to_string(),
            date: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
            value: BigDecimal::from(value),
            quality_flag: String::new(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = MemoryWeatherStore::new();
        let first = store.get_or_create_region("UK").await.unwrap();
        let second = store.get_or_create_region("UK").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "UK");
        assert!(first.is_active);
        assert_eq!(store.regions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_records_overwrites() {
        let store = MemoryWeatherStore::new();
        let region = store.get_or_create_region("UK").await.unwrap();
        let parameter = store.get_or_create_parameter("Tmax", "Maximum Temperature", "°C").await.unwrap();

        let results = store
            .upsert_records(&region, &parameter, &[record(1, 5), record(2, 6)])
            .await
            .unwrap();
        assert_eq!(results, vec![Ok(UpsertOutcome::Created), Ok(UpsertOutcome::Created)]);

        let results = store
            .upsert_records(&region, &parameter, &[record(1, 9)])
            .await
            .unwrap();
        assert_eq!(results, vec![Ok(UpsertOutcome::Updated)]);

        let records = store.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, BigDecimal::from(9));
    }

    #[tokio::test]
    async fn test_load_records_filter() {
        let store = MemoryWeatherStore::new();
        let uk = store.get_or_create_region("UK").await.unwrap();
        let wales = store.get_or_create_region("Wales").await.unwrap();
        let tmax = store.get_or_create_parameter("Tmax", "Maximum Temperature", "°C").await.unwrap();

        store.upsert_records(&uk, &tmax, &[record(1, 5)]).await.unwrap();
        store.upsert_records(&wales, &tmax, &[record(1, 4)]).await.unwrap();

        let filter = RecordFilter::new(Some("Wales".into()), None);
        let records = store.load_records(&filter).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].region, "Wales");
        assert_eq!(store.load_records(&RecordFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_requires_existing_log() {
        let store = MemoryWeatherStore::new();
        let mut log = IngestionLog::new(None, None, "http://example.org/Tmax/date/UK.txt");
        log.mark_in_progress().unwrap();

        let err = store.update_ingestion_log(&log).await.unwrap_err();
        assert!(matches!(err, IngestError::Persistence(msg) if msg.contains("not found")));
        assert!(store.ingestion_logs().await.is_empty());

        store.create_ingestion_log(&log).await.unwrap();
        log.mark_completed().unwrap();
        store.update_ingestion_log(&log).await.unwrap();
        let stored = store.get_ingestion_log(log.id).await.unwrap().unwrap();
        assert_eq!(stored.status, crate::models::IngestionStatus::Completed);
    }
}
