//! Command-line argument parsing
//!
//! Job parameters follow the usual fio vocabulary (numjobs, iodepth, bs,
//! size, rw) plus the storage target options.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use super::engine_options::DEFAULT_CHUNK_SIZE;

/// Asynchronous I/O benchmark against a DFS namespace
#[derive(Parser, Debug, Clone)]
#[command(name = "dfs-bench")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    // ===== Storage Target =====
    /// Pool UUID
    #[arg(long = "pool", default_value = "")]
    pub pool: String,

    /// Container UUID
    #[arg(long = "cont", default_value = "")]
    pub cont: String,

    /// Pool service replica ranks, colon separated (e.g. "0:1:2")
    #[arg(long = "svcl", default_value = "")]
    pub svcl: String,

    /// Object chunk size in bytes
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    // ===== Job Parameters =====
    /// Number of parallel jobs, one thread each
    #[arg(long = "numjobs", default_value_t = 1)]
    pub numjobs: u32,

    /// Outstanding requests per job
    #[arg(long = "iodepth", default_value_t = 16)]
    pub iodepth: u32,

    /// Block size in bytes
    #[arg(long = "bs", default_value_t = 4096)]
    pub block_size: usize,

    /// Bytes of I/O per job
    #[arg(long = "size", default_value_t = 16 * 1024 * 1024)]
    pub size: u64,

    /// I/O pattern
    #[arg(long = "rw", value_enum, default_value_t = RwMode::Write)]
    pub rw: RwMode,

    /// Percentage of reads in mixed workloads
    #[arg(long = "rwmixread", default_value_t = 50)]
    pub rwmixread: u32,

    /// File name prefix; each job uses `<filename>.<job>`
    #[arg(long = "filename", default_value = "dfs-bench")]
    pub filename: String,

    /// All jobs share a single file named exactly `--filename`
    #[arg(long = "shared-file")]
    pub shared_file: bool,

    /// Stop after this many seconds even if `--size` is not reached
    #[arg(long = "duration")]
    pub duration_secs: Option<u64>,

    /// Remove job files when done
    #[arg(long = "unlink")]
    pub unlink: bool,

    // ===== In-memory Backend =====
    /// Delay before each completion becomes visible, in microseconds
    #[arg(long = "completion-delay-us", default_value_t = 0)]
    pub completion_delay_us: u64,

    /// Random seed for offsets and completion ordering
    #[arg(long = "seed", default_value_t = 12345)]
    pub seed: u64,

    // ===== Output =====
    /// Write results to this file
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long = "output-format", value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet mode (summary only)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

/// I/O pattern, named as in fio job files
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RwMode {
    Read,
    #[default]
    Write,
    #[value(name = "randread")]
    RandRead,
    #[value(name = "randwrite")]
    RandWrite,
    #[value(name = "rw")]
    ReadWrite,
    #[value(name = "randrw")]
    RandReadWrite,
}

impl RwMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RwMode::Read => "read",
            RwMode::Write => "write",
            RwMode::RandRead => "randread",
            RwMode::RandWrite => "randwrite",
            RwMode::ReadWrite => "rw",
            RwMode::RandReadWrite => "randrw",
        }
    }

    /// Offsets are drawn at random instead of walking the file
    pub fn is_random(&self) -> bool {
        matches!(
            self,
            RwMode::RandRead | RwMode::RandWrite | RwMode::RandReadWrite
        )
    }

    /// Whether any reads are issued
    pub fn reads(&self) -> bool {
        !matches!(self, RwMode::Write | RwMode::RandWrite)
    }

    /// Whether any writes are issued
    pub fn writes(&self) -> bool {
        !matches!(self, RwMode::Read | RwMode::RandRead)
    }
}

/// Output format for results
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.numjobs == 0 {
            return Err("--numjobs must be at least 1".to_string());
        }
        if self.iodepth == 0 {
            return Err("--iodepth must be at least 1".to_string());
        }
        if self.block_size == 0 {
            return Err("--bs must be at least 1".to_string());
        }
        if self.block_size as u64 > self.size {
            return Err(format!(
                "--bs ({}) cannot exceed --size ({})",
                self.block_size, self.size
            ));
        }
        if self.rwmixread > 100 {
            return Err("--rwmixread must be between 0 and 100".to_string());
        }
        if self.filename.is_empty() || self.filename.contains('/') {
            return Err("--filename must be a plain file name".to_string());
        }
        if self.verbose && self.quiet {
            return Err("--verbose and --quiet are mutually exclusive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = CliArgs::parse_from(["test"]);
        assert_eq!(args.numjobs, 1);
        assert_eq!(args.iodepth, 16);
        assert_eq!(args.block_size, 4096);
        assert_eq!(args.size, 16 * 1024 * 1024);
        assert_eq!(args.chunk_size, 1_048_576);
        assert_eq!(args.rw, RwMode::Write);
        assert_eq!(args.output_format, OutputFormat::Text);
    }

    #[test]
    fn test_job_args() {
        let args = CliArgs::parse_from([
            "test",
            "--pool",
            "0c4f9d2a-71e3-4b0e-8f6a-1d3b5e7c9a01",
            "--svcl",
            "0:1:2",
            "--numjobs",
            "4",
            "--iodepth",
            "32",
            "--bs",
            "1048576",
            "--size",
            "67108864",
            "--rw",
            "randrw",
        ]);
        assert_eq!(args.numjobs, 4);
        assert_eq!(args.iodepth, 32);
        assert_eq!(args.rw, RwMode::RandReadWrite);
        assert_eq!(args.svcl, "0:1:2");
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rw_modes() {
        assert!(RwMode::RandRead.is_random());
        assert!(!RwMode::ReadWrite.is_random());
        assert!(RwMode::ReadWrite.reads() && RwMode::ReadWrite.writes());
        assert!(!RwMode::Write.reads());
        assert!(!RwMode::Read.writes());
        assert_eq!(RwMode::RandWrite.as_str(), "randwrite");
    }

    #[test]
    fn test_validation_zero_iodepth() {
        let args = CliArgs::parse_from(["test", "--iodepth", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_block_larger_than_size() {
        let args = CliArgs::parse_from(["test", "--bs", "8192", "--size", "4096"]);
        let err = args.validate().unwrap_err();
        assert!(err.contains("--bs"));
    }

    #[test]
    fn test_validation_rwmixread_range() {
        let args = CliArgs::parse_from(["test", "--rwmixread", "101"]);
        assert!(args.validate().is_err());
        let args = CliArgs::parse_from(["test", "--rwmixread", "100"]);
        assert!(args.validate().is_ok());
    }
}
