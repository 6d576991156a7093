//! UKCLIM Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the UKCLIM project.
//!
//! # Overview
//!
//! This crate provides common functionality used across all UKCLIM workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralized `tracing` subscriber setup
//! - **Types**: The fixed weather-parameter and region vocabulary
//!
//! # Example
//!
//! ```no_run
//! use ukclim_common::types::{parameter_unit, canonical_region_code};
//!
//! assert_eq!(parameter_unit("Rainfall"), "mm");
//! assert_eq!(canonical_region_code("NI"), "Northern_Ireland");
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ClimError, Result};
