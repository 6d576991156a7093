//! Background task queue for aggregate jobs
//!
//! The ingestion path only needs "eventually run, possibly more than once";
//! jobs are idempotent so a replay converges on the same aggregates.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::aggregates::AggregateEngine;
use crate::error::{IngestError, IngestResult};
use crate::jobs::{run_with_retry, AggregateJob, JobOutcome, RetryPolicy};

/// Enqueue side of a job queue
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Hand a job to the queue without waiting for it to run
    async fn enqueue(&self, job: AggregateJob) -> IngestResult<()>;
}

struct LocalQueueInner {
    engine: AggregateEngine,
    policy: RetryPolicy,
    tasks: Mutex<JoinSet<IngestResult<JobOutcome>>>,
    failed: AtomicUsize,
}

/// In-process queue running every job on its own tokio task
///
/// Concrete jobs run under the retry policy. A driver job enqueues the
/// three concrete kinds and finishes without waiting on them. Finished tasks
/// are reaped on each enqueue, so a long-lived queue only holds jobs that are
/// still running or not yet reaped.
#[derive(Clone)]
pub struct LocalTaskQueue {
    inner: Arc<LocalQueueInner>,
}

impl LocalTaskQueue {
    pub fn new(engine: AggregateEngine, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(LocalQueueInner {
                engine,
                policy,
                tasks: Mutex::new(JoinSet::new()),
                failed: AtomicUsize::new(0),
            }),
        }
    }

    async fn execute(&self, job: AggregateJob) -> IngestResult<JobOutcome> {
        let result = self.run_job(job).await;
        if result.is_err() {
            self.inner.failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn run_job(&self, job: AggregateJob) -> IngestResult<JobOutcome> {
        let name = job.name();

        let Some(kind) = job.kind.aggregate_type() else {
            let mut dispatched = Vec::new();
            for sub in job.fan_out() {
                let sub_kind = sub.kind;
                self.enqueue(sub).await?;
                dispatched.push(sub_kind);
            }
            info!(job = %name, "Dispatched {} aggregate jobs", dispatched.len());
            return Ok(JobOutcome::Dispatched(dispatched));
        };

        let engine = &self.inner.engine;
        let scope = job.scope();
        let result = run_with_retry(&self.inner.policy, &name, || {
            engine.generate(kind, &scope, job.force)
        })
        .await;

        match &result {
            Ok(report) => info!(
                job = %name,
                created = report.created,
                updated = report.updated,
                skipped = report.skipped,
                "Aggregate job finished"
            ),
            Err(e) => error!(job = %name, "Aggregate job failed: {}", e),
        }
        result.map(JobOutcome::Aggregated)
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<IngestResult<JobOutcome>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Jobs still tracked: running, or finished and not yet reaped
    pub fn pending_jobs(&self) -> usize {
        self.tasks().len()
    }

    /// Jobs that ended in an error since the queue was created
    pub fn failed_jobs(&self) -> usize {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Wait for every tracked job, including jobs those jobs enqueue
    ///
    /// Returns the results of jobs that had not been reaped yet.
    pub async fn wait_idle(&self) -> Vec<IngestResult<JobOutcome>> {
        let mut results = Vec::new();
        loop {
            let mut batch = std::mem::take(&mut *self.tasks());
            if batch.is_empty() {
                return results;
            }
            while let Some(joined) = batch.join_next().await {
                results.push(joined.unwrap_or_else(|e| Err(IngestError::Queue(e.to_string()))));
            }
        }
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, job: AggregateJob) -> IngestResult<()> {
        info!(job = %job.name(), force = job.force, "Enqueued aggregate job");
        let queue = self.clone();
        let mut tasks = self.tasks();

        // Results were already logged by the task itself
        let mut reaped = 0;
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Aggregate task aborted: {}", e);
            }
            reaped += 1;
        }
        if reaped > 0 {
            debug!(reaped, "Reaped finished aggregate jobs");
        }

        tasks.spawn(async move { queue.execute(job).await });
        Ok(())
    }
}

/// Queue that records jobs without running them
#[derive(Debug, Default)]
pub struct RecordingTaskQueue {
    jobs: Mutex<Vec<AggregateJob>>,
}

impl RecordingTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<AggregateJob> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl TaskQueue for RecordingTaskQueue {
    async fn enqueue(&self, job: AggregateJob) -> IngestResult<()> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(job);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jobs::AggregateJobKind;
    use crate::models::{AggregateType, WeatherRecord};
    use crate::storage::{MemoryWeatherStore, WeatherStore};
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::time::Duration;

    async fn seeded_store() -> Arc<MemoryWeatherStore> {
        let store = Arc::new(MemoryWeatherStore::new());
        let region = store.get_or_create_region("UK").await.unwrap();
        let parameter = store.get_or_create_parameter("Tmax", "Maximum Temperature", "°C").await.unwrap();
        let records: Vec<WeatherRecord> = (1..=3)
            .map(|month| WeatherRecord {
                region: "UK".to_string(),
                parameter: "Tmax".to_string(),
                date: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
                value: BigDecimal::from(month as i32 * 2),
                quality_flag: String::new(),
            })
            .collect();
        store.upsert_records(&region, &parameter, &records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_driver_job_fans_out() {
        let store = seeded_store().await;
        let engine = AggregateEngine::new(store.clone()).with_current_year(2023);
        let queue = LocalTaskQueue::new(engine, RetryPolicy::default());

        queue.enqueue(AggregateJob::all_for_pair("UK", "Tmax")).await.unwrap();
        let results = queue.wait_idle().await;

        assert_eq!(results.len(), 4);
        let mut kinds = Vec::new();
        for result in results {
            match result.unwrap() {
                JobOutcome::Dispatched(dispatched) => {
                    assert_eq!(dispatched, AggregateJobKind::CONCRETE.to_vec())
                },
                JobOutcome::Aggregated(report) => kinds.push(report.kind),
            }
        }
        kinds.sort();
        assert_eq!(
            kinds,
            vec![AggregateType::Monthly, AggregateType::Seasonal, AggregateType::Yearly]
        );

        let aggregates = store.aggregates().await;
        assert_eq!(aggregates.iter().filter(|a| a.aggregate_type == AggregateType::Monthly).count(), 3);
        assert_eq!(aggregates.iter().filter(|a| a.aggregate_type == AggregateType::Yearly).count(), 1);
        // January and February are winter, March is spring
        assert_eq!(aggregates.iter().filter(|a| a.aggregate_type == AggregateType::Seasonal).count(), 2);
    }

    /// Store whose record reads always fail
    struct BrokenStore(MemoryWeatherStore);

    #[async_trait]
    impl WeatherStore for BrokenStore {
        async fn find_region(&self, code: &str) -> IngestResult<Option<crate::models::Region>> {
            self.0.find_region(code).await
        }
        async fn find_parameter(&self, code: &str) -> IngestResult<Option<crate::models::Parameter>> {
            self.0.find_parameter(code).await
        }
        async fn get_or_create_region(&self, code: &str) -> IngestResult<crate::models::Region> {
            self.0.get_or_create_region(code).await
        }
        async fn get_or_create_parameter(
            &self,
            code: &str,
            display_name: &str,
            unit: &str,
        ) -> IngestResult<crate::models::Parameter> {
            self.0.get_or_create_parameter(code, display_name, unit).await
        }
        async fn upsert_records(
            &self,
            region: &crate::models::Region,
            parameter: &crate::models::Parameter,
            records: &[WeatherRecord],
        ) -> IngestResult<Vec<crate::storage::RowResult>> {
            self.0.upsert_records(region, parameter, records).await
        }
        async fn upsert_summaries(
            &self,
            region: &crate::models::Region,
            parameter: &crate::models::Parameter,
            summaries: &[crate::models::SeasonalSummary],
        ) -> IngestResult<Vec<crate::storage::RowResult>> {
            self.0.upsert_summaries(region, parameter, summaries).await
        }
        async fn load_records(
            &self,
            _filter: &crate::storage::RecordFilter,
        ) -> IngestResult<Vec<WeatherRecord>> {
            Err(IngestError::Persistence("connection refused".to_string()))
        }
        async fn upsert_aggregate(
            &self,
            aggregate: &crate::models::WeatherAggregate,
            force: bool,
        ) -> IngestResult<crate::storage::AggregateWrite> {
            self.0.upsert_aggregate(aggregate, force).await
        }
        async fn create_ingestion_log(&self, log: &crate::models::IngestionLog) -> IngestResult<()> {
            self.0.create_ingestion_log(log).await
        }
        async fn update_ingestion_log(&self, log: &crate::models::IngestionLog) -> IngestResult<()> {
            self.0.update_ingestion_log(log).await
        }
        async fn get_ingestion_log(
            &self,
            id: uuid::Uuid,
        ) -> IngestResult<Option<crate::models::IngestionLog>> {
            self.0.get_ingestion_log(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_surfaces_after_retries() {
        let store = Arc::new(BrokenStore(MemoryWeatherStore::new()));
        let engine = AggregateEngine::new(store);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(60),
        };
        let queue = LocalTaskQueue::new(engine, policy);

        queue.enqueue(AggregateJob::new(AggregateJobKind::Monthly)).await.unwrap();
        let results = queue.wait_idle().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(IngestError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(queue.failed_jobs(), 1);
    }

    #[tokio::test]
    async fn test_finished_jobs_are_reaped_on_enqueue() {
        let store = Arc::new(MemoryWeatherStore::new());
        let queue = LocalTaskQueue::new(AggregateEngine::new(store), RetryPolicy::default());

        for _ in 0..50 {
            queue.enqueue(AggregateJob::new(AggregateJobKind::Monthly)).await.unwrap();
        }
        assert_eq!(queue.pending_jobs(), 50);

        // Let every job run to completion without draining the queue
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.enqueue(AggregateJob::new(AggregateJobKind::Yearly)).await.unwrap();
        assert_eq!(queue.pending_jobs(), 1);

        let results = queue.wait_idle().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert_eq!(queue.pending_jobs(), 0);
        assert_eq!(queue.failed_jobs(), 0);
    }

    #[tokio::test]
    async fn test_recording_queue_keeps_jobs() {
        let queue = RecordingTaskQueue::new();
        queue.enqueue(AggregateJob::all_for_pair("UK", "Tmax")).await.unwrap();
        queue.enqueue(AggregateJob::new(AggregateJobKind::Yearly)).await.unwrap();

        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].kind, AggregateJobKind::All);
        assert_eq!(jobs[0].region.as_deref(), Some("UK"));
    }
}
