//! Aggregate recomputation
//!
//! Aggregates are rebuilt from the stored monthly records. Grouping is pure
//! and lives in free functions; [`AggregateEngine`] loads the records for a
//! scope and writes one upsert per (region, parameter, type, period).
//!
//! Seasonal aggregates are computed over every matching record of a season
//! regardless of its year, and the period is pinned to the current calendar
//! year (winter runs from December of the previous year to the end of
//! February). Historical seasons are not tracked separately.

use std::collections::BTreeMap;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{IngestError, IngestResult};
use crate::models::{AggregateType, Season, WeatherAggregate, WeatherRecord};
use crate::storage::{AggregateWrite, RecordFilter, WeatherStore};

/// Seasons processed by the seasonal job, in processing order
pub const AGGREGATE_SEASONS: [Season; 4] =
    [Season::Spring, Season::Summer, Season::Autumn, Season::Winter];

/// Counts of aggregate rows written by one job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub kind: AggregateType,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl AggregateReport {
    pub fn new(kind: AggregateType) -> Self {
        Self {
            kind,
            created: 0,
            updated: 0,
            skipped: 0,
        }
    }

    fn record(&mut self, write: AggregateWrite) {
        match write {
            AggregateWrite::Created => self.created += 1,
            AggregateWrite::Updated => self.updated += 1,
            AggregateWrite::Skipped => self.skipped += 1,
        }
    }
}

/// Last day of a month
pub fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next?.pred_opt()
}

/// Period of a season anchored to `year`; winter starts in December of `year - 1`
pub fn season_period(season: Season, year: i32) -> Option<(NaiveDate, NaiveDate)> {
    let months = season.months()?;
    let start = match season {
        Season::Winter => NaiveDate::from_ymd_opt(year - 1, 12, 1)?,
        _ => NaiveDate::from_ymd_opt(year, months[0], 1)?,
    };
    Some((start, month_end(year, months[2])?))
}

struct Accumulator {
    sum: BigDecimal,
    min: BigDecimal,
    max: BigDecimal,
    count: i64,
}

impl Accumulator {
    fn new(value: &BigDecimal) -> Self {
        Self {
            sum: value.clone(),
            min: value.clone(),
            max: value.clone(),
            count: 1,
        }
    }

    fn push(&mut self, value: &BigDecimal) {
        self.sum = &self.sum + value;
        if *value < self.min {
            self.min = value.clone();
        }
        if *value > self.max {
            self.max = value.clone();
        }
        self.count += 1;
    }

    fn finish(
        self,
        region: String,
        parameter: String,
        aggregate_type: AggregateType,
        (period_start, period_end): (NaiveDate, NaiveDate),
    ) -> WeatherAggregate {
        let avg = (self.sum / BigDecimal::from(self.count)).round(2);
        WeatherAggregate {
            region,
            parameter,
            aggregate_type,
            period_start,
            period_end,
            avg_value: avg,
            min_value: self.min,
            max_value: self.max,
            record_count: self.count,
        }
    }
}

fn accumulate<K: Ord>(groups: &mut BTreeMap<K, Accumulator>, key: K, value: &BigDecimal) {
    groups
        .entry(key)
        .and_modify(|acc| acc.push(value))
        .or_insert_with(|| Accumulator::new(value));
}

/// One aggregate per (region, parameter, year, month)
pub fn monthly_aggregates(records: &[WeatherRecord]) -> Vec<WeatherAggregate> {
    let mut groups = BTreeMap::new();
    for r in records {
        let key = (r.region.clone(), r.parameter.clone(), r.date.year(), r.date.month());
        accumulate(&mut groups, key, &r.value);
    }

    groups
        .into_iter()
        .filter_map(|((region, parameter, year, month), acc)| {
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            let end = month_end(year, month)?;
            Some(acc.finish(region, parameter, AggregateType::Monthly, (start, end)))
        })
        .collect()
}

/// One aggregate per (region, parameter, year)
pub fn yearly_aggregates(records: &[WeatherRecord]) -> Vec<WeatherAggregate> {
    let mut groups = BTreeMap::new();
    for r in records {
        accumulate(&mut groups, (r.region.clone(), r.parameter.clone(), r.date.year()), &r.value);
    }

    groups
        .into_iter()
        .filter_map(|((region, parameter, year), acc)| {
            let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
            let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
            Some(acc.finish(region, parameter, AggregateType::Yearly, (start, end)))
        })
        .collect()
}

/// One aggregate per (region, parameter, season), anchored to `current_year`
pub fn seasonal_aggregates(records: &[WeatherRecord], current_year: i32) -> Vec<WeatherAggregate> {
    let mut aggregates = Vec::new();
    for season in AGGREGATE_SEASONS {
        let (Some(months), Some(period)) = (season.months(), season_period(season, current_year))
        else {
            continue;
        };

        let mut groups = BTreeMap::new();
        for r in records.iter().filter(|r| months.contains(&r.date.month())) {
            accumulate(&mut groups, (r.region.clone(), r.parameter.clone()), &r.value);
        }

        aggregates.extend(groups.into_iter().map(|((region, parameter), acc)| {
            acc.finish(region, parameter, AggregateType::Seasonal, period)
        }));
    }
    aggregates
}

/// Recomputes aggregates from stored records
#[derive(Clone)]
pub struct AggregateEngine {
    store: Arc<dyn WeatherStore>,
    current_year: Option<i32>,
}

impl AggregateEngine {
    pub fn new(store: Arc<dyn WeatherStore>) -> Self {
        Self {
            store,
            current_year: None,
        }
    }

    /// Pin the year seasonal periods are anchored to instead of using the clock
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    fn current_year(&self) -> i32 {
        self.current_year.unwrap_or_else(|| Utc::now().year())
    }

    pub async fn generate_monthly(
        &self,
        scope: &RecordFilter,
        force: bool,
    ) -> IngestResult<AggregateReport> {
        self.generate(AggregateType::Monthly, scope, force).await
    }

    pub async fn generate_yearly(
        &self,
        scope: &RecordFilter,
        force: bool,
    ) -> IngestResult<AggregateReport> {
        self.generate(AggregateType::Yearly, scope, force).await
    }

    pub async fn generate_seasonal(
        &self,
        scope: &RecordFilter,
        force: bool,
    ) -> IngestResult<AggregateReport> {
        self.generate(AggregateType::Seasonal, scope, force).await
    }

    /// Recompute one aggregate type over `scope`
    ///
    /// Existing rows are left untouched unless `force` is set. Storage
    /// failures surface as [`IngestError::AggregateTransient`] so the caller
    /// can retry the whole run.
    pub async fn generate(
        &self,
        kind: AggregateType,
        scope: &RecordFilter,
        force: bool,
    ) -> IngestResult<AggregateReport> {
        let transient = |e: IngestError| IngestError::AggregateTransient(e.to_string());

        let records = self.store.load_records(scope).await.map_err(transient)?;
        let aggregates = match kind {
            AggregateType::Monthly => monthly_aggregates(&records),
            AggregateType::Yearly => yearly_aggregates(&records),
            AggregateType::Seasonal => seasonal_aggregates(&records, self.current_year()),
            AggregateType::Decadal => {
                return Err(IngestError::Config(
                    "decadal aggregates are not generated".to_string(),
                ))
            },
        };

        let mut report = AggregateReport::new(kind);
        for aggregate in &aggregates {
            let write = self
                .store
                .upsert_aggregate(aggregate, force)
                .await
                .map_err(transient)?;
            report.record(write);
        }

        info!(
            kind = %kind,
            region = ?scope.region,
            parameter = ?scope.parameter,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "Generated aggregates"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::{MemoryWeatherStore, UpsertOutcome};
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rec(region: &str, year: i32, month: u32, value: &str) -> WeatherRecord {
        WeatherRecord {
            region: region.to_string(),
            parameter: "Tmax".to_string(),
            date: date(year, month, 1),
            value: BigDecimal::from_str(value).unwrap(),
            quality_flag: String::new(),
        }
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_month_end() {
        assert_eq!(month_end(2023, 1), Some(date(2023, 1, 31)));
        assert_eq!(month_end(2024, 2), Some(date(2024, 2, 29)));
        assert_eq!(month_end(2023, 2), Some(date(2023, 2, 28)));
        assert_eq!(month_end(2023, 12), Some(date(2023, 12, 31)));
        assert_eq!(month_end(2023, 13), None);
    }

    #[test]
    fn test_season_period() {
        assert_eq!(
            season_period(Season::Winter, 2024),
            Some((date(2023, 12, 1), date(2024, 2, 29)))
        );
        assert_eq!(
            season_period(Season::Summer, 2025),
            Some((date(2025, 6, 1), date(2025, 8, 31)))
        );
        assert_eq!(
            season_period(Season::Autumn, 2025),
            Some((date(2025, 9, 1), date(2025, 11, 30)))
        );
        assert_eq!(season_period(Season::Annual, 2025), None);
    }

    #[test]
    fn test_monthly_groups_by_year_and_month() {
        let records = vec![
            rec("UK", 2022, 1, "4.0"),
            rec("UK", 2023, 1, "5.1"),
            rec("UK", 2023, 2, "6.2"),
            rec("Wales", 2023, 1, "3.0"),
        ];
        let aggregates = monthly_aggregates(&records);

        assert_eq!(aggregates.len(), 4);
        let jan = aggregates
            .iter()
            .find(|a| a.region == "UK" && a.period_start == date(2023, 1, 1))
            .unwrap();
        assert_eq!(jan.period_end, date(2023, 1, 31));
        assert_eq!(jan.record_count, 1);
        assert_eq!(jan.avg_value, dec("5.1"));
    }

    #[test]
    fn test_yearly_statistics() {
        let records = vec![
            rec("UK", 2023, 1, "5.1"),
            rec("UK", 2023, 2, "6.2"),
            rec("UK", 2023, 7, "20.0"),
        ];
        let aggregates = yearly_aggregates(&records);

        assert_eq!(aggregates.len(), 1);
        let year = &aggregates[0];
        assert_eq!((year.period_start, year.period_end), (date(2023, 1, 1), date(2023, 12, 31)));
        assert_eq!(year.min_value, dec("5.1"));
        assert_eq!(year.max_value, dec("20.0"));
        assert_eq!(year.avg_value, dec("10.43"));
        assert_eq!(year.record_count, 3);
    }

    #[test]
    fn test_seasonal_uses_current_year_and_all_years() {
        let records = vec![
            rec("UK", 2019, 12, "4.0"),
            rec("UK", 2020, 1, "3.0"),
            rec("UK", 2023, 2, "5.0"),
            rec("UK", 2023, 7, "20.0"),
        ];
        let aggregates = seasonal_aggregates(&records, 2025);

        assert_eq!(aggregates.len(), 2);
        let summer = &aggregates[0];
        assert_eq!((summer.period_start, summer.period_end), (date(2025, 6, 1), date(2025, 8, 31)));
        assert_eq!(summer.record_count, 1);

        let winter = &aggregates[1];
        assert_eq!((winter.period_start, winter.period_end), (date(2024, 12, 1), date(2025, 2, 28)));
        assert_eq!(winter.record_count, 3);
        assert_eq!(winter.avg_value, dec("4"));
    }

    async fn seeded_store() -> Arc<MemoryWeatherStore> {
        let store = Arc::new(MemoryWeatherStore::new());
        let region = store.get_or_create_region("UK").await.unwrap();
        let parameter = store
            .get_or_create_parameter("Tmax", "Maximum Temperature", "°C")
            .await
            .unwrap();
        let results = store
            .upsert_records(
                &region,
                &parameter,
                &[rec("UK", 2023, 1, "5.1"), rec("UK", 2023, 2, "6.2")],
            )
            .await
            .unwrap();
        assert!(results.iter().all(|r| *r == Ok(UpsertOutcome::Created)));
        store
    }

    #[tokio::test]
    async fn test_monthly_run_is_idempotent_without_force() {
        let store = seeded_store().await;
        let engine = AggregateEngine::new(store.clone());
        let scope = RecordFilter::default();

        let first = engine.generate_monthly(&scope, false).await.unwrap();
        assert_eq!((first.created, first.updated, first.skipped), (2, 0, 0));
        let before = store.aggregates().await;

        let second = engine.generate_monthly(&scope, false).await.unwrap();
        assert_eq!((second.created, second.updated, second.skipped), (0, 0, 2));
        assert_eq!(store.aggregates().await, before);
    }

    #[tokio::test]
    async fn test_force_overwrites() {
        let store = seeded_store().await;
        let engine = AggregateEngine::new(store.clone());
        let scope = RecordFilter::new(Some("UK".into()), Some("Tmax".into()));

        engine.generate_yearly(&scope, false).await.unwrap();
        let forced = engine.generate_yearly(&scope, true).await.unwrap();
        assert_eq!((forced.created, forced.updated, forced.skipped), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_seasonal_engine_uses_pinned_year() {
        let store = seeded_store().await;
        let engine = AggregateEngine::new(store.clone()).with_current_year(2024);

        let report = engine.generate_seasonal(&RecordFilter::default(), false).await.unwrap();
        assert_eq!(report.kind, AggregateType::Seasonal);
        assert_eq!(report.created, 1);

        let winter = &store.aggregates().await[0];
        assert_eq!(winter.period_start, date(2023, 12, 1));
        assert_eq!(winter.period_end, date(2024, 2, 29));
        assert_eq!(winter.avg_value, dec("5.65"));
    }

    #[tokio::test]
    async fn test_scope_limits_records() {
        let store = seeded_store().await;
        let engine = AggregateEngine::new(store.clone());

        let scope = RecordFilter::new(Some("Wales".into()), None);
        let report = engine.generate_monthly(&scope, false).await.unwrap();
        assert_eq!(report.created, 0);
        assert!(store.aggregates().await.is_empty());
    }
}
