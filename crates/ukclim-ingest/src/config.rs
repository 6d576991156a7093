//! Ingestion configuration
//!
//! Source endpoint, batching, worker pool and aggregate retry settings, read
//! from `UKCLIM_*` environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str =
    "https://www.metoffice.gov.uk/pub/data/weather/uk/climate/datasets";
pub const DEFAULT_USER_AGENT: &str = "UK-Weather-Data-API/1.0";

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Bulletin source settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Dataset root; bulletins live at `{base_url}/{parameter}/date/{region}.txt`
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SourceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("UKCLIM_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: env_or("UKCLIM_TIMEOUT_SECS", defaults.timeout_secs),
            user_agent: std::env::var("UKCLIM_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("UKCLIM_BASE_URL must be an http(s) URL, got '{}'", self.base_url);
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("UKCLIM_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry policy for aggregate jobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateConfig {
    /// Total attempts per job, including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts in seconds
    pub retry_delay_secs: u64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 60,
        }
    }
}

impl AggregateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_or("UKCLIM_AGGREGATE_MAX_ATTEMPTS", defaults.max_attempts),
            retry_delay_secs: env_or(
                "UKCLIM_AGGREGATE_RETRY_DELAY_SECS",
                defaults.retry_delay_secs,
            ),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    pub source: SourceConfig,
    /// Records per persistence batch
    pub batch_size: usize,
    /// Maximum (parameter, region) pairs ingested at once
    pub concurrency: usize,
    pub aggregate: AggregateConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            batch_size: 1000,
            concurrency: 4,
            aggregate: AggregateConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from the environment (and `.env`, if present)
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            source: SourceConfig::from_env(),
            batch_size: env_or("UKCLIM_BATCH_SIZE", defaults.batch_size),
            concurrency: env_or("UKCLIM_CONCURRENCY", defaults.concurrency),
            aggregate: AggregateConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.source.validate()?;
        if self.batch_size == 0 {
            anyhow::bail!("UKCLIM_BATCH_SIZE must be greater than 0");
        }
        if self.concurrency == 0 {
            anyhow::bail!("UKCLIM_CONCURRENCY must be greater than 0");
        }
        if self.aggregate.max_attempts == 0 {
            anyhow::bail!("UKCLIM_AGGREGATE_MAX_ATTEMPTS must be greater than 0");
        }
        Ok(())
    }
}
