//! Data models for ingestion
//!
//! Parsed bulletin rows, reference entities, derived aggregates and the
//! per-run ingestion log.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};

/// Geographic region a bulletin is published for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Region {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

impl Region {
    /// New active region whose name defaults to its code
    pub fn new(code: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            is_active: true,
        }
    }
}

/// Measured quantity, e.g. `Tmax` or `Rainfall`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Parameter {
    pub id: Uuid,
    pub code: String,
    pub display_name: String,
    pub unit: String,
    pub is_active: bool,
}

impl Parameter {
    pub fn new(code: &str, display_name: &str, unit: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            display_name: display_name.to_string(),
            unit: unit.to_string(),
            is_active: true,
        }
    }
}

/// One monthly observation; the date is always the first of the month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeatherRecord {
    pub region: String,
    pub parameter: String,
    pub date: NaiveDate,
    pub value: BigDecimal,
    pub quality_flag: String,
}

/// Season columns of a bulletin row, in column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
    Annual,
}

impl Season {
    /// Column order following the twelve month columns
    pub const COLUMNS: [Season; 5] = [
        Season::Winter,
        Season::Spring,
        Season::Summer,
        Season::Autumn,
        Season::Annual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
            Season::Annual => "annual",
        }
    }

    /// Calendar months covered, or `None` for the annual column
    pub fn months(&self) -> Option<[u32; 3]> {
        match self {
            Season::Winter => Some([12, 1, 2]),
            Season::Spring => Some([3, 4, 5]),
            Season::Summer => Some([6, 7, 8]),
            Season::Autumn => Some([9, 10, 11]),
            Season::Annual => None,
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Season {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "autumn" => Ok(Season::Autumn),
            "annual" => Ok(Season::Annual),
            _ => Err(anyhow::anyhow!("Invalid season: {}", s)),
        }
    }
}

/// Pre-computed seasonal or annual value published alongside the months
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalSummary {
    pub region: String,
    pub parameter: String,
    pub year: i32,
    pub season: Season,
    pub value: BigDecimal,
}

/// Period granularity of a derived aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Monthly,
    Seasonal,
    Yearly,
    Decadal,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Monthly => "monthly",
            AggregateType::Seasonal => "seasonal",
            AggregateType::Yearly => "yearly",
            AggregateType::Decadal => "decadal",
        }
    }
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AggregateType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(AggregateType::Monthly),
            "seasonal" => Ok(AggregateType::Seasonal),
            "yearly" => Ok(AggregateType::Yearly),
            "decadal" => Ok(AggregateType::Decadal),
            _ => Err(anyhow::anyhow!("Invalid aggregate type: {}", s)),
        }
    }
}

/// Statistics over the records of one (region, parameter, period)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherAggregate {
    pub region: String,
    pub parameter: String,
    pub aggregate_type: AggregateType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub avg_value: BigDecimal,
    pub min_value: BigDecimal,
    pub max_value: BigDecimal,
    pub record_count: i64,
}

/// Lifecycle state of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Partial,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::InProgress => "in_progress",
            IngestionStatus::Completed => "completed",
            IngestionStatus::Failed => "failed",
            IngestionStatus::Partial => "partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestionStatus::Completed | IngestionStatus::Failed | IngestionStatus::Partial
        )
    }
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IngestionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(IngestionStatus::Pending),
            "in_progress" => Ok(IngestionStatus::InProgress),
            "completed" => Ok(IngestionStatus::Completed),
            "failed" => Ok(IngestionStatus::Failed),
            "partial" => Ok(IngestionStatus::Partial),
            _ => Err(anyhow::anyhow!("Invalid ingestion status: {}", s)),
        }
    }
}

/// Audit record for a single (parameter, region) ingestion run
///
/// `region_code` and `parameter_code` are `None` when the reference row did
/// not exist yet at the moment the run started. Once the status is terminal
/// `end_time` is set and the log is never transitioned again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionLog {
    pub id: Uuid,
    pub region_code: Option<String>,
    pub parameter_code: Option<String>,
    pub status: IngestionStatus,
    pub records_processed: i64,
    pub records_created: i64,
    pub records_updated: i64,
    pub records_failed: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: String,
    pub source_url: String,
}

impl IngestionLog {
    /// Create a pending log starting now
    pub fn new(
        region_code: Option<String>,
        parameter_code: Option<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            region_code,
            parameter_code,
            status: IngestionStatus::Pending,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_failed: 0,
            start_time: Utc::now(),
            end_time: None,
            error_message: String::new(),
            source_url: source_url.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Elapsed run time, measured up to now while the run is still open
    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }

    pub fn mark_in_progress(&mut self) -> IngestResult<()> {
        self.ensure_open()?;
        self.status = IngestionStatus::InProgress;
        Ok(())
    }

    pub fn mark_completed(&mut self) -> IngestResult<()> {
        self.finish(IngestionStatus::Completed, String::new())
    }

    pub fn mark_partial(&mut self) -> IngestResult<()> {
        self.finish(IngestionStatus::Partial, String::new())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> IngestResult<()> {
        self.finish(IngestionStatus::Failed, message.into())
    }

    fn finish(&mut self, status: IngestionStatus, message: String) -> IngestResult<()> {
        self.ensure_open()?;
        self.status = status;
        self.error_message = message;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    fn ensure_open(&self) -> IngestResult<()> {
        if self.is_terminal() {
            return Err(IngestError::Persistence(format!(
                "ingestion log {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}
