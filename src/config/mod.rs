//! Configuration module

pub mod cli;
pub mod engine_options;
pub mod job_config;

pub use cli::{CliArgs, OutputFormat, RwMode};
pub use engine_options::{parse_rank_list, EngineOptions, ResolvedTarget, DEFAULT_CHUNK_SIZE};
pub use job_config::JobConfig;
