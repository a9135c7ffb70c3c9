//! Metrics reporting
//!
//! This module provides:
//! - Aggregated and per-job result records
//! - Text and JSON export

pub mod reporter;

pub use reporter::{AggregatedMetrics, BenchmarkResults, JobSummary, LatencySummary, MetricsReporter};
