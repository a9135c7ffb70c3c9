//! Metrics reporter - output formatting and export
//!
//! Supports two output formats:
//! - Text (human-readable)
//! - JSON

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::config::OutputFormat;

/// Aggregated metrics across all jobs
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    pub test_name: String,
    pub duration_secs: f64,
    pub total_ops: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes: u64,
    pub total_errors: u64,
    pub anomalies: u64,
    pub iops: f64,
    pub bandwidth_mib: f64,
    pub latency: LatencySummary,
}

/// Latency percentiles in microseconds
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
    pub max_us: u64,
}

/// One job's share of the run
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: usize,
    pub file: String,
    pub reads: u64,
    pub writes: u64,
    pub bytes: u64,
    pub errors: u64,
    pub anomalies: u64,
    pub layout_ops: u64,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

/// Benchmark results collection for export
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResults {
    /// Configuration summary
    pub config: String,
    pub summary: AggregatedMetrics,
    pub jobs: Vec<JobSummary>,
}

impl BenchmarkResults {
    pub fn new(config_summary: &str, summary: AggregatedMetrics, jobs: Vec<JobSummary>) -> Self {
        Self {
            config: config_summary.to_string(),
            summary,
            jobs,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Write all results to a JSON file
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "{}", serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Metrics reporter
pub struct MetricsReporter {
    format: OutputFormat,
}

impl MetricsReporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render results in the configured format
    pub fn render(&self, results: &BenchmarkResults) -> io::Result<String> {
        match self.format {
            OutputFormat::Text => Ok(render_text(results)),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(results)?),
        }
    }

    /// Print results to stdout
    pub fn report(&self, results: &BenchmarkResults) -> io::Result<()> {
        println!("{}", self.render(results)?);
        Ok(())
    }

    /// Write results to a file in the configured format
    pub fn write_file(&self, path: &Path, results: &BenchmarkResults) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => results.write_json(path),
            OutputFormat::Text => {
                let mut file = File::create(path)?;
                writeln!(file, "{}", render_text(results))?;
                Ok(())
            }
        }
    }
}

fn render_text(results: &BenchmarkResults) -> String {
    let s = &results.summary;
    let mut out = String::new();

    let _ = writeln!(out, "=== {} ===", s.test_name);
    let _ = writeln!(out, "Config: {}", results.config);
    let _ = writeln!(
        out,
        "IOPS: {:.0} | Bandwidth: {:.2} MiB/s | Ops: {} (read {}, write {}) | Duration: {:.2}s",
        s.iops, s.bandwidth_mib, s.total_ops, s.reads, s.writes, s.duration_secs
    );
    if s.total_errors > 0 || s.anomalies > 0 {
        let _ = writeln!(out, "Errors: {} | Anomalies: {}", s.total_errors, s.anomalies);
    }
    let _ = writeln!(
        out,
        "Latency (us): avg={:.1} p50={} p95={} p99={} p99.9={} max={}",
        s.latency.mean_us,
        s.latency.p50_us,
        s.latency.p95_us,
        s.latency.p99_us,
        s.latency.p999_us,
        s.latency.max_us
    );

    if results.jobs.len() > 1 {
        let _ = writeln!(out, "\nPer-job metrics:");
        let _ = writeln!(
            out,
            "{:>4} {:24} {:>10} {:>10} {:>14} {:>8}",
            "Job", "File", "Reads", "Writes", "Bytes", "Errors"
        );
        let _ = writeln!(out, "{}", "-".repeat(75));
        for job in &results.jobs {
            let _ = writeln!(
                out,
                "{:>4} {:24} {:>10} {:>10} {:>14} {:>8}",
                job.job_id, job.file, job.reads, job.writes, job.bytes, job.errors
            );
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BenchmarkResults {
        let summary = AggregatedMetrics {
            test_name: "randwrite".to_string(),
            duration_secs: 2.0,
            total_ops: 2000,
            reads: 0,
            writes: 2000,
            bytes: 2000 * 4096,
            total_errors: 1,
            anomalies: 0,
            iops: 1000.0,
            bandwidth_mib: 3.9,
            latency: LatencySummary {
                mean_us: 120.5,
                p50_us: 100,
                p95_us: 250,
                p99_us: 400,
                p999_us: 900,
                max_us: 1500,
            },
        };
        let jobs = (0..2)
            .map(|i| JobSummary {
                job_id: i,
                file: format!("dfs-bench.{}", i),
                reads: 0,
                writes: 1000,
                bytes: 1000 * 4096,
                errors: i as u64,
                anomalies: 0,
                layout_ops: 0,
                duration_secs: 2.0,
                aborted: None,
            })
            .collect();
        BenchmarkResults::new("rw=randwrite, bs=4096", summary, jobs)
    }

    #[test]
    fn test_text_output() {
        let reporter = MetricsReporter::new(OutputFormat::Text);
        let text = reporter.render(&sample()).unwrap();
        assert!(text.starts_with("=== randwrite ==="));
        assert!(text.contains("IOPS: 1000"));
        assert!(text.contains("Errors: 1"));
        assert!(text.contains("dfs-bench.1"));
    }

    #[test]
    fn test_json_value() {
        let json = sample().to_json().unwrap();
        assert_eq!(json["config"], "rw=randwrite, bs=4096");
        assert_eq!(json["summary"]["total_ops"], 2000);
        assert_eq!(json["summary"]["latency"]["p99_us"], 400);
        assert_eq!(json["jobs"].as_array().unwrap().len(), 2);
        assert!(json["jobs"][0].get("aborted").is_none());
    }

    #[test]
    fn test_write_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        MetricsReporter::new(OutputFormat::Json)
            .write_file(&path, &sample())
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["summary"]["writes"], 2000);
    }

    #[test]
    fn test_write_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        MetricsReporter::new(OutputFormat::Text)
            .write_file(&path, &sample())
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Latency (us)"));
    }
}
