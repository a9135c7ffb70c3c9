//! Benchmark orchestration and jobs
//!
//! This module provides the multi-threaded job runner:
//! - GlobalCounters: Atomic counters for cross-thread synchronization
//! - JobWorker: One job driving one worker context at its queue depth
//! - Orchestrator: Spawns jobs and merges results

pub mod counters;
pub mod job_worker;
pub mod orchestrator;

pub use counters::GlobalCounters;
pub use job_worker::{JobResult, JobWorker};
pub use orchestrator::{format_count, format_throughput, BenchmarkResult, Orchestrator};
