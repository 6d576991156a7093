//! Error types for bulletin ingestion

use crate::validator::ValidationError;

/// Result type for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Error types raised by the ingestion pipeline
///
/// Pair-level failures (`FetchFailed`, `NoDataStart`, `NoUsableData`) are
/// recorded on the ingestion log and never escape a batch run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("No data header found in bulletin")]
    NoDataStart,

    #[error("No usable records or seasonal summaries in bulletin")]
    NoUsableData,

    #[error("Record validation failed: {0}")]
    RecordValidationFailed(#[from] ValidationError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Aggregate computation failed: {0}")]
    AggregateTransient(String),

    #[error("Job {job} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        job: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ukclim_common::ClimError> for IngestError {
    fn from(err: ukclim_common::ClimError) -> Self {
        IngestError::Config(err.to_string())
    }
}
