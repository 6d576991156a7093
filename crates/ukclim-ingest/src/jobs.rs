//! Aggregate job definitions
//!
//! Payloads handed to a [`TaskQueue`](crate::queue::TaskQueue) and the
//! bounded retry loop jobs run under.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregates::AggregateReport;
use crate::config::AggregateConfig;
use crate::error::{IngestError, IngestResult};
use crate::models::AggregateType;
use crate::storage::RecordFilter;

/// Which aggregates a job recomputes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateJobKind {
    Monthly,
    Yearly,
    Seasonal,
    /// Driver job that enqueues the three others
    All,
}

impl AggregateJobKind {
    /// Kinds fanned out by [`AggregateJobKind::All`]
    pub const CONCRETE: [AggregateJobKind; 3] = [
        AggregateJobKind::Monthly,
        AggregateJobKind::Yearly,
        AggregateJobKind::Seasonal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateJobKind::Monthly => "monthly",
            AggregateJobKind::Yearly => "yearly",
            AggregateJobKind::Seasonal => "seasonal",
            AggregateJobKind::All => "all",
        }
    }

    /// Aggregate type computed by this kind; `None` for the driver
    pub fn aggregate_type(&self) -> Option<AggregateType> {
        match self {
            AggregateJobKind::Monthly => Some(AggregateType::Monthly),
            AggregateJobKind::Yearly => Some(AggregateType::Yearly),
            AggregateJobKind::Seasonal => Some(AggregateType::Seasonal),
            AggregateJobKind::All => None,
        }
    }
}

impl std::fmt::Display for AggregateJobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AggregateJobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(AggregateJobKind::Monthly),
            "yearly" => Ok(AggregateJobKind::Yearly),
            "seasonal" => Ok(AggregateJobKind::Seasonal),
            "all" => Ok(AggregateJobKind::All),
            _ => Err(anyhow::anyhow!(
                "Invalid aggregate kind: {} (expected monthly, yearly, seasonal or all)",
                s
            )),
        }
    }
}

/// Aggregate recomputation job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateJob {
    pub kind: AggregateJobKind,
    /// Region code to restrict to, all regions when `None`
    pub region: Option<String>,
    /// Parameter code to restrict to, all parameters when `None`
    pub parameter: Option<String>,
    /// Overwrite aggregates that already exist
    pub force: bool,
    pub created_at: DateTime<Utc>,
}

impl AggregateJob {
    pub fn new(kind: AggregateJobKind) -> Self {
        Self {
            kind,
            region: None,
            parameter: None,
            force: false,
            created_at: Utc::now(),
        }
    }

    /// Driver job scoped to one (region, parameter) pair
    pub fn all_for_pair(region: &str, parameter: &str) -> Self {
        Self::new(AggregateJobKind::All)
            .with_region(region)
            .with_parameter(parameter)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn scope(&self) -> RecordFilter {
        RecordFilter::new(self.region.clone(), self.parameter.clone())
    }

    /// Human-readable job name used in logs and retry errors
    pub fn name(&self) -> String {
        format!(
            "{}_aggregates[{}/{}]",
            self.kind,
            self.region.as_deref().unwrap_or("*"),
            self.parameter.as_deref().unwrap_or("*")
        )
    }

    /// Concrete jobs for a driver job, or the job itself
    pub fn fan_out(&self) -> Vec<AggregateJob> {
        match self.kind {
            AggregateJobKind::All => AggregateJobKind::CONCRETE
                .iter()
                .map(|kind| AggregateJob {
                    kind: *kind,
                    created_at: Utc::now(),
                    ..self.clone()
                })
                .collect(),
            _ => vec![self.clone()],
        }
    }
}

/// What a finished job produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Aggregated(AggregateReport),
    /// Kinds enqueued by a driver job
    Dispatched(Vec<AggregateJobKind>),
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&AggregateConfig::default())
    }
}

impl From<&AggregateConfig> for RetryPolicy {
    fn from(config: &AggregateConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.retry_delay(),
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up
///
/// Every error is retried. The last one is reported inside
/// [`IngestError::RetriesExhausted`].
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, job: &str, mut op: F) -> IngestResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = IngestResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(IngestError::RetriesExhausted {
                    job: job.to_string(),
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            },
            Err(e) => {
                warn!(
                    job = %job,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Job failed, retrying in {:?}: {}",
                    policy.delay,
                    e
                );
                tokio::time::sleep(policy.delay).await;
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_job_payload_serialization() {
        let job = AggregateJob::all_for_pair("UK", "Tmax").with_force(true);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "all");
        assert_eq!(json["region"], "UK");
        assert_eq!(json["parameter"], "Tmax");
        assert_eq!(json["force"], true);

        let back: AggregateJob = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_fan_out_keeps_scope() {
        let job = AggregateJob::all_for_pair("Wales", "Rainfall");
        let jobs = job.fan_out();
        let kinds: Vec<_> = jobs.iter().map(|j| j.kind).collect();
        assert_eq!(kinds, AggregateJobKind::CONCRETE.to_vec());
        assert!(jobs.iter().all(|j| j.scope() == job.scope() && !j.force));

        let single = AggregateJob::new(AggregateJobKind::Yearly);
        assert_eq!(single.fan_out(), vec![single.clone()]);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(AggregateJobKind::from_str("Seasonal").unwrap(), AggregateJobKind::Seasonal);
        assert!(AggregateJobKind::from_str("decadal").is_err());
        assert_eq!(AggregateJobKind::All.aggregate_type(), None);
        assert_eq!(AggregateJob::new(AggregateJobKind::Monthly).name(), "monthly_aggregates[*/*]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let started = tokio::time::Instant::now();
        let result = run_with_retry(&policy, "flaky", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(IngestError::AggregateTransient("database busy".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_is_reported() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(60),
        };

        let result: IngestResult<()> = run_with_retry(&policy, "monthly_aggregates[*/*]", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IngestError::AggregateTransient("connection reset".into()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            IngestError::RetriesExhausted {
                job,
                attempts,
                last_error,
            } => {
                assert_eq!(job, "monthly_aggregates[*/*]");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection reset"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
