//! UKCLIM Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ingestion of the Met Office UK areal climate series.
//!
//! Each (parameter, region) bulletin flows through:
//!
//! - [`fetcher`]: HTTP download of the raw text
//! - [`parser`]: header detection and row parsing into monthly records and
//!   seasonal summaries
//! - [`validator`]: physical bounds per parameter class
//! - [`persister`]: batched natural-key upserts and the ingestion log's
//!   terminal transition
//! - [`aggregates`]: monthly, yearly and seasonal statistics, recomputed by
//!   jobs on a [`queue::TaskQueue`]
//!
//! [`orchestrator::IngestOrchestrator`] drives the pipeline for one pair or a
//! batch of pairs.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ukclim_ingest::{
//!     config::IngestConfig, orchestrator::IngestOrchestrator, queue::RecordingTaskQueue,
//!     storage::MemoryWeatherStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let store = Arc::new(MemoryWeatherStore::new());
//!     let queue = Arc::new(RecordingTaskQueue::new());
//!     let orchestrator = IngestOrchestrator::new(&config, store, queue)?;
//!
//!     let log = orchestrator.ingest_parameter_data("Tmax", "UK").await?;
//!     println!("{}: {} records", log.status, log.records_processed);
//!     Ok(())
//! }
//! ```

pub mod aggregates;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod jobs;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod persister;
pub mod queue;
pub mod storage;
pub mod validator;

pub use error::{IngestError, IngestResult};
