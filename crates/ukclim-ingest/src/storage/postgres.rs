//! PostgreSQL storage backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Acquire, PgPool};
use tracing::{debug, error};
use uuid::Uuid;

use super::{AggregateWrite, RecordFilter, RowResult, UpsertOutcome, WeatherStore};
use crate::error::{IngestError, IngestResult};
use crate::models::{
    IngestionLog, Parameter, Region, SeasonalSummary, WeatherAggregate, WeatherRecord,
};

/// Store backed by the tables in `migrations/`
#[derive(Debug, Clone)]
pub struct PgWeatherStore {
    pool: PgPool,
}

impl PgWeatherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IngestionLogRow {
    id: Uuid,
    region_code: Option<String>,
    parameter_code: Option<String>,
    status: String,
    records_processed: i64,
    records_created: i64,
    records_updated: i64,
    records_failed: i64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    error_message: String,
    source_url: String,
}

impl TryFrom<IngestionLogRow> for IngestionLog {
    type Error = IngestError;

    fn try_from(row: IngestionLogRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e: anyhow::Error| IngestError::Persistence(e.to_string()))?;
        Ok(IngestionLog {
            id: row.id,
            region_code: row.region_code,
            parameter_code: row.parameter_code,
            status,
            records_processed: row.records_processed,
            records_created: row.records_created,
            records_updated: row.records_updated,
            records_failed: row.records_failed,
            start_time: row.start_time,
            end_time: row.end_time,
            error_message: row.error_message,
            source_url: row.source_url,
        })
    }
}

const UPSERT_RECORD: &str = r#"
    INSERT INTO weather_records (id, region_id, parameter_id, date, value, quality_flag)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (region_id, parameter_id, date)
    DO UPDATE SET
        value = EXCLUDED.value,
        quality_flag = EXCLUDED.quality_flag,
        updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

const UPSERT_SUMMARY: &str = r#"
    INSERT INTO seasonal_summaries (id, region_id, parameter_id, year, season, value)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (region_id, parameter_id, year, season)
    DO UPDATE SET
        value = EXCLUDED.value,
        updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
"#;

fn outcome(inserted: bool) -> UpsertOutcome {
    if inserted {
        UpsertOutcome::Created
    } else {
        UpsertOutcome::Updated
    }
}

#[async_trait]
impl WeatherStore for PgWeatherStore {
    async fn find_region(&self, code: &str) -> IngestResult<Option<Region>> {
        let region = sqlx::query_as::<_, Region>(
            "SELECT id, code, name, is_active FROM regions WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(region)
    }

    async fn find_parameter(&self, code: &str) -> IngestResult<Option<Parameter>> {
        let parameter = sqlx::query_as::<_, Parameter>(
            "SELECT id, code, display_name, unit, is_active FROM weather_parameters WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(parameter)
    }

    async fn get_or_create_region(&self, code: &str) -> IngestResult<Region> {
        let region = sqlx::query_as::<_, Region>(
            r#"
            INSERT INTO regions (id, code, name, is_active)
            VALUES ($1, $2, $2, TRUE)
            ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
            RETURNING id, code, name, is_active
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .fetch_one(&self.pool)
        .await?;
        Ok(region)
    }

    async fn get_or_create_parameter(
        &self,
        code: &str,
        display_name: &str,
        unit: &str,
    ) -> IngestResult<Parameter> {
        let parameter = sqlx::query_as::<_, Parameter>(
            r#"
            INSERT INTO weather_parameters (id, code, display_name, unit, is_active)
            VALUES ($1, $2, $3, $4, TRUE)
            ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
            RETURNING id, code, display_name, unit, is_active
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(display_name)
        .bind(unit)
        .fetch_one(&self.pool)
        .await?;
        Ok(parameter)
    }

    async fn upsert_records(
        &self,
        region: &Region,
        parameter: &Parameter,
        records: &[WeatherRecord],
    ) -> IngestResult<Vec<RowResult>> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(records.len());

        for record in records {
            // Savepoint per row so one bad row leaves the batch usable
            let mut savepoint = tx.begin().await?;
            let inserted = sqlx::query_scalar::<_, bool>(UPSERT_RECORD)
                .bind(Uuid::new_v4())
                .bind(region.id)
                .bind(parameter.id)
                .bind(record.date)
                .bind(&record.value)
                .bind(&record.quality_flag)
                .fetch_one(&mut *savepoint)
                .await;

            match inserted {
                Ok(inserted) => {
                    savepoint.commit().await?;
                    results.push(Ok(outcome(inserted)));
                },
                Err(e) => {
                    savepoint.rollback().await?;
                    error!(date = %record.date, "Failed to upsert record: {}", e);
                    results.push(Err(e.to_string()));
                },
            }
        }

        tx.commit().await?;
        debug!(region = %region.code, parameter = %parameter.code, rows = records.len(), "Upserted records");
        Ok(results)
    }

    async fn upsert_summaries(
        &self,
        region: &Region,
        parameter: &Parameter,
        summaries: &[SeasonalSummary],
    ) -> IngestResult<Vec<RowResult>> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(summaries.len());

        for summary in summaries {
            let mut savepoint = tx.begin().await?;
            let inserted = sqlx::query_scalar::<_, bool>(UPSERT_SUMMARY)
                .bind(Uuid::new_v4())
                .bind(region.id)
                .bind(parameter.id)
                .bind(summary.year)
                .bind(summary.season.as_str())
                .bind(&summary.value)
                .fetch_one(&mut *savepoint)
                .await;

            match inserted {
                Ok(inserted) => {
                    savepoint.commit().await?;
                    results.push(Ok(outcome(inserted)));
                },
                Err(e) => {
                    savepoint.rollback().await?;
                    error!(year = summary.year, season = %summary.season, "Failed to upsert summary: {}", e);
                    results.push(Err(e.to_string()));
                },
            }
        }

        tx.commit().await?;
        Ok(results)
    }

    async fn load_records(&self, filter: &RecordFilter) -> IngestResult<Vec<WeatherRecord>> {
        let records = sqlx::query_as::<_, WeatherRecord>(
            r#"
            SELECT r.code AS region, p.code AS parameter, w.date, w.value, w.quality_flag
            FROM weather_records w
            JOIN regions r ON r.id = w.region_id
            JOIN weather_parameters p ON p.id = w.parameter_id
            WHERE ($1::TEXT IS NULL OR r.code = $1)
              AND ($2::TEXT IS NULL OR p.code = $2)
            ORDER BY r.code, p.code, w.date
            "#,
        )
        .bind(filter.region.as_deref())
        .bind(filter.parameter.as_deref())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn upsert_aggregate(
        &self,
        aggregate: &WeatherAggregate,
        force: bool,
    ) -> IngestResult<AggregateWrite> {
        // The conflict arm only fires under `force`; otherwise no row comes back
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO weather_aggregates (
                id, region_id, parameter_id, aggregate_type, period_start, period_end,
                avg_value, min_value, max_value, record_count
            )
            SELECT $1::UUID, r.id, p.id, $4::VARCHAR, $5::DATE, $6::DATE,
                $7::NUMERIC, $8::NUMERIC, $9::NUMERIC, $10::BIGINT
            FROM regions r, weather_parameters p
            WHERE r.code = $2 AND p.code = $3
            ON CONFLICT (region_id, parameter_id, aggregate_type, period_start, period_end)
            DO UPDATE SET
                avg_value = EXCLUDED.avg_value,
                min_value = EXCLUDED.min_value,
                max_value = EXCLUDED.max_value,
                record_count = EXCLUDED.record_count,
                updated_at = NOW()
            WHERE $11::BOOLEAN
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&aggregate.region)
        .bind(&aggregate.parameter)
        .bind(aggregate.aggregate_type.as_str())
        .bind(aggregate.period_start)
        .bind(aggregate.period_end)
        .bind(&aggregate.avg_value)
        .bind(&aggregate.min_value)
        .bind(&aggregate.max_value)
        .bind(aggregate.record_count)
        .bind(force)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(true) => AggregateWrite::Created,
            Some(false) => AggregateWrite::Updated,
            None => AggregateWrite::Skipped,
        })
    }

    async fn create_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_logs (
                id, region_id, parameter_id, status,
                records_processed, records_created, records_updated, records_failed,
                start_time, end_time, error_message, source_url
            )
            VALUES (
                $1,
                (SELECT id FROM regions WHERE code = $2),
                (SELECT id FROM weather_parameters WHERE code = $3),
                $4, $5, $6, $7, $8, $9, $10, $11, $12
            )
            "#,
        )
        .bind(log.id)
        .bind(log.region_code.as_deref())
        .bind(log.parameter_code.as_deref())
        .bind(log.status.as_str())
        .bind(log.records_processed)
        .bind(log.records_created)
        .bind(log.records_updated)
        .bind(log.records_failed)
        .bind(log.start_time)
        .bind(log.end_time)
        .bind(&log.error_message)
        .bind(&log.source_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_ingestion_log(&self, log: &IngestionLog) -> IngestResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_logs SET
                status = $2,
                records_processed = $3,
                records_created = $4,
                records_updated = $5,
                records_failed = $6,
                end_time = $7,
                error_message = $8
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(log.status.as_str())
        .bind(log.records_processed)
        .bind(log.records_created)
        .bind(log.records_updated)
        .bind(log.records_failed)
        .bind(log.end_time)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IngestError::Persistence(format!("ingestion log {} not found", log.id)));
        }
        Ok(())
    }

    async fn get_ingestion_log(&self, id: Uuid) -> IngestResult<Option<IngestionLog>> {
        let row = sqlx::query_as::<_, IngestionLogRow>(
            r#"
            SELECT
                l.id, r.code AS region_code, p.code AS parameter_code, l.status,
                l.records_processed, l.records_created, l.records_updated, l.records_failed,
                l.start_time, l.end_time, l.error_message, l.source_url
            FROM ingestion_logs l
            LEFT JOIN regions r ON r.id = l.region_id
            LEFT JOIN weather_parameters p ON p.id = l.parameter_id
            WHERE l.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IngestionLog::try_from).transpose()
    }
}
