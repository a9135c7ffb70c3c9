//! Job configuration derived from CLI arguments

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::cli::{CliArgs, OutputFormat, RwMode};
use super::engine_options::EngineOptions;

/// Complete job configuration
#[derive(Debug, Clone)]
pub struct JobConfig {
    // Target
    pub engine: EngineOptions,

    // Parallelism
    pub numjobs: u32,
    pub iodepth: u32,

    // I/O pattern
    pub block_size: usize,
    pub size: u64,
    pub rw: RwMode,
    pub rwmixread: u32,
    pub filename: String,
    pub shared_file: bool,
    pub duration_secs: Option<u64>,
    pub unlink: bool,

    // In-memory backend
    pub completion_delay: Duration,
    pub seed: u64,

    // Output
    pub output_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
}

impl JobConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        args.validate()?;

        let engine = EngineOptions::new(&args.pool, &args.cont, &args.svcl)
            .with_chunk_size(args.chunk_size);
        engine.resolve().map_err(|e| e.to_string())?;

        Ok(Self {
            engine,

            numjobs: args.numjobs,
            iodepth: args.iodepth,

            block_size: args.block_size,
            size: args.size,
            rw: args.rw,
            rwmixread: args.rwmixread,
            filename: args.filename.clone(),
            shared_file: args.shared_file,
            duration_secs: args.duration_secs,
            unlink: args.unlink,

            completion_delay: Duration::from_micros(args.completion_delay_us),
            seed: args.seed,

            output_path: args.output.clone(),
            output_format: args.output_format,
            quiet: args.quiet,
            verbose: args.verbose,
        })
    }

    /// File a job works on
    pub fn file_for_job(&self, job: u32) -> String {
        if self.shared_file {
            self.filename.clone()
        } else {
            format!("{}.{}", self.filename, job)
        }
    }

    /// Operations each job performs
    pub fn ops_per_job(&self) -> u64 {
        self.size / self.block_size as u64
    }

    /// Operations across all jobs
    pub fn total_ops(&self) -> u64 {
        self.ops_per_job() * self.numjobs as u64
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }
}

impl fmt::Display for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rw={}, bs={}, size={}, numjobs={}, iodepth={}",
            self.rw.as_str(),
            self.block_size,
            self.size,
            self.numjobs,
            self.iodepth
        )
    }
}
