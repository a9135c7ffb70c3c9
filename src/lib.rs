//! dfs-bench library
//!
//! Asynchronous I/O engine over a pool/container/namespace object store:
//! one shared backend session per process, one completion queue per worker,
//! bounded queue depth and out-of-order completion harvesting.

pub mod backend;
pub mod benchmark;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod session;
pub mod utils;
