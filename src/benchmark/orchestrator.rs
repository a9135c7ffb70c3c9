//! Benchmark orchestrator
//!
//! Spawns one thread per job, reports progress, and merges job results.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use super::counters::GlobalCounters;
use super::job_worker::{JobResult, JobWorker};
use crate::backend::Backend;
use crate::config::JobConfig;
use crate::engine::WorkerContext;
use crate::metrics::{AggregatedMetrics, BenchmarkResults, JobSummary, LatencySummary, MetricsReporter};
use crate::session::SessionManager;
use crate::utils::{EngineError, Result};

const MIB: f64 = 1024.0 * 1024.0;

fn new_histogram() -> Result<Histogram<u64>> {
    Histogram::new_with_bounds(1, 3_600_000_000, 3)
        .map_err(|e| EngineError::Worker(format!("failed to create histogram: {}", e)))
}

/// Benchmark result summary
pub struct BenchmarkResult {
    /// Test name (the I/O pattern)
    pub test_name: String,
    /// Successful operations
    pub total_ops: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes: u64,
    pub duration: Duration,
    /// Operations per second
    pub iops: f64,
    /// Bytes per second
    pub bandwidth: f64,
    /// Merged latency histogram (microseconds)
    pub histogram: Histogram<u64>,
    pub error_count: u64,
    pub anomalies: u64,
    pub jobs: Vec<JobSummary>,
}

impl BenchmarkResult {
    /// Get percentile latency in microseconds
    pub fn percentile_us(&self, p: f64) -> u64 {
        self.histogram.value_at_percentile(p)
    }

    /// Whether any job stopped early
    pub fn aborted(&self) -> bool {
        self.jobs.iter().any(|j| j.aborted.is_some())
    }

    /// Print summary (compact format)
    pub fn print_summary(&self) {
        println!("\n=== {} ===", self.test_name);
        println!(
            "IOPS: {} | Bandwidth: {:.2} MiB/s | Ops: {} | Duration: {:.2}s{}",
            format_throughput(self.iops),
            self.bandwidth / MIB,
            format_count(self.total_ops),
            self.duration.as_secs_f64(),
            if self.error_count > 0 {
                format!(" | Errors: {}", self.error_count)
            } else {
                String::new()
            }
        );
        println!(
            "Latency (us): avg={:.1} p50={} p95={} p99={} p99.9={} max={}",
            self.histogram.mean(),
            self.percentile_us(50.0),
            self.percentile_us(95.0),
            self.percentile_us(99.0),
            self.percentile_us(99.9),
            self.histogram.max()
        );
    }

    /// Flatten into the exported record
    pub fn to_metrics(&self) -> AggregatedMetrics {
        AggregatedMetrics {
            test_name: self.test_name.clone(),
            duration_secs: self.duration.as_secs_f64(),
            total_ops: self.total_ops,
            reads: self.reads,
            writes: self.writes,
            bytes: self.bytes,
            total_errors: self.error_count,
            anomalies: self.anomalies,
            iops: self.iops,
            bandwidth_mib: self.bandwidth / MIB,
            latency: LatencySummary {
                mean_us: self.histogram.mean(),
                p50_us: self.percentile_us(50.0),
                p95_us: self.percentile_us(95.0),
                p99_us: self.percentile_us(99.0),
                p999_us: self.percentile_us(99.9),
                max_us: self.histogram.max(),
            },
        }
    }
}

/// Benchmark orchestrator
pub struct Orchestrator<B: Backend + 'static> {
    config: Arc<JobConfig>,
    session: Arc<SessionManager<B>>,
}

impl<B: Backend + 'static> Orchestrator<B> {
    pub fn new(config: JobConfig, session: Arc<SessionManager<B>>) -> Self {
        Self {
            config: Arc::new(config),
            session,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Run all jobs and merge their results
    pub fn run(&self) -> Result<BenchmarkResult> {
        let duration = self.config.duration();
        let counters = Arc::new(match duration {
            Some(d) => GlobalCounters::with_duration(d),
            None => GlobalCounters::with_ops(self.config.total_ops()),
        });

        info!(
            "Starting {} job(s): {}",
            self.config.numjobs, self.config
        );

        let start_time = Instant::now();
        let unlink_per_job = self.config.unlink && !self.config.shared_file;
        let mut handles: Vec<JoinHandle<Result<JobResult>>> =
            Vec::with_capacity(self.config.numjobs as usize);

        for job_id in 0..self.config.numjobs as usize {
            let config = Arc::clone(&self.config);
            let job_counters = Arc::clone(&counters);
            let session = Arc::clone(&self.session);
            let duration_mode = duration.is_some();

            let spawned = thread::Builder::new()
                .name(format!("job-{}", job_id))
                .spawn(move || {
                    match JobWorker::new(job_id, session, &config, duration_mode) {
                        Ok(worker) => Ok(worker.run(job_counters, unlink_per_job)),
                        Err(e) => {
                            error!("Job {}: failed to start: {}", job_id, e);
                            job_counters.signal_shutdown();
                            Err(e)
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    counters.signal_shutdown();
                    Self::join_all(handles);
                    return Err(e.into());
                }
            }
        }

        let progress = (!self.config.quiet).then(|| {
            let counters = Arc::clone(&counters);
            let total = self.config.total_ops();
            thread::spawn(move || Self::report_progress(&counters, total, duration))
        });

        let joined = Self::join_all(handles);
        let elapsed = start_time.elapsed();

        counters.signal_shutdown();
        if let Some(handle) = progress {
            let _ = handle.join();
        }

        let results = joined.into_iter().collect::<Result<Vec<_>>>()?;

        if self.config.unlink && self.config.shared_file {
            self.unlink_shared()?;
        }

        self.merge_results(results, elapsed)
    }

    fn join_all(handles: Vec<JoinHandle<Result<JobResult>>>) -> Vec<Result<JobResult>> {
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(EngineError::Worker("job thread panicked".into())))
            })
            .collect()
    }

    fn unlink_shared(&self) -> Result<()> {
        let mut ctx = WorkerContext::init(Arc::clone(&self.session), &self.config.engine, 1, 0)?;
        if let Err(e) = ctx.remove(&self.config.filename) {
            warn!("unlink of {} failed: {}", self.config.filename, e);
        }
        ctx.close()?;
        ctx.teardown();
        Ok(())
    }

    /// Report progress during the run
    fn report_progress(counters: &GlobalCounters, total: u64, duration: Option<Duration>) {
        if let Some(duration) = duration {
            let pb = ProgressBar::new(duration.as_secs());
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}s/{len}s | {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }

            let start = Instant::now();
            let mut last_finished = 0u64;
            let mut last_time = start;

            while !counters.is_shutdown() && !counters.is_duration_exceeded() {
                let (finished, _) = counters.progress();
                pb.set_position(start.elapsed().as_secs());

                let now = Instant::now();
                let interval = now.duration_since(last_time).as_secs_f64();
                if interval >= 1.0 {
                    let iops = (finished - last_finished) as f64 / interval;
                    pb.set_message(format!("{} IOPS, total: {}", format_throughput(iops), finished));
                    last_finished = finished;
                    last_time = now;
                }

                thread::sleep(Duration::from_millis(100));
            }

            let (finished, _) = counters.progress();
            pb.finish_with_message(format!("Complete - {} total ops", finished));
        } else {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }

            let start = Instant::now();
            let mut last_finished = 0u64;
            let mut last_time = start;

            while !counters.is_shutdown() {
                let (finished, _) = counters.progress();
                pb.set_position(finished);

                let now = Instant::now();
                let interval = now.duration_since(last_time).as_secs_f64();
                if interval >= 0.5 {
                    let iops = (finished - last_finished) as f64 / interval;
                    pb.set_message(format!("{} IOPS", format_throughput(iops)));
                    last_finished = finished;
                    last_time = now;
                }

                if finished >= total {
                    break;
                }

                thread::sleep(Duration::from_millis(100));
            }

            pb.finish_with_message("done");
        }
    }

    fn merge_results(&self, results: Vec<JobResult>, duration: Duration) -> Result<BenchmarkResult> {
        let mut histogram = new_histogram()?;
        let mut reads = 0u64;
        let mut writes = 0u64;
        let mut bytes = 0u64;
        let mut error_count = 0u64;
        let mut anomalies = 0u64;
        let mut jobs = Vec::with_capacity(results.len());

        for result in results {
            histogram.add(&result.histogram).ok();
            reads += result.reads;
            writes += result.writes;
            bytes += result.bytes;
            error_count += result.error_count;
            anomalies += result.anomalies;
            if let Some(reason) = &result.aborted {
                warn!("Job {} stopped early: {}", result.job_id, reason);
            }
            jobs.push(JobSummary {
                job_id: result.job_id,
                file: result.file,
                reads: result.reads,
                writes: result.writes,
                bytes: result.bytes,
                errors: result.error_count,
                anomalies: result.anomalies,
                layout_ops: result.layout_ops,
                duration_secs: result.duration.as_secs_f64(),
                aborted: result.aborted,
            });
        }

        let secs = duration.as_secs_f64().max(f64::EPSILON);
        let total_ops = reads + writes;

        Ok(BenchmarkResult {
            test_name: self.config.rw.as_str().to_string(),
            total_ops,
            reads,
            writes,
            bytes,
            duration,
            iops: total_ops as f64 / secs,
            bandwidth: bytes as f64 / secs,
            histogram,
            error_count,
            anomalies,
            jobs,
        })
    }

    /// Collect the exported form of a result
    pub fn results(&self, result: &BenchmarkResult) -> BenchmarkResults {
        BenchmarkResults::new(&self.config.to_string(), result.to_metrics(), result.jobs.clone())
    }

    /// Write results to a file in the configured output format
    pub fn export(&self, result: &BenchmarkResult, path: &Path) -> Result<()> {
        MetricsReporter::new(self.config.output_format)
            .write_file(path, &self.results(result))
            .map_err(EngineError::from)
    }
}

/// Format throughput without meaningless decimals
/// Examples: 1,234,567 or 987,654
pub fn format_throughput(throughput: f64) -> String {
    let value = throughput as u64;
    format_count(value)
}

/// Format large numbers with thousands separators
/// Examples: 1,234,567 or 987,654
pub fn format_count(value: u64) -> String {
    let s = value.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, c);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemBackend;
    use crate::config::CliArgs;
    use clap::Parser;
    use uuid::Uuid;

    const POOL: &str = "0c4f9d2a-71e3-4b0e-8f6a-1d3b5e7c9a01";
    const CONT: &str = "5b8e2c1d-4a6f-4e9b-a3d7-0f1e2c4b6d02";

    fn orchestrator(extra: &[&str]) -> Orchestrator<MemBackend> {
        let mut argv = vec!["test", "--pool", POOL, "--cont", CONT, "--svcl", "0:1", "-q"];
        argv.extend_from_slice(extra);
        let config = JobConfig::from_cli(&CliArgs::parse_from(argv)).unwrap();

        let backend = MemBackend::with_seed(5).with_container(
            Uuid::parse_str(POOL).unwrap(),
            vec![0, 1],
            Uuid::parse_str(CONT).unwrap(),
        );
        Orchestrator::new(config, Arc::new(SessionManager::new(Arc::new(backend))))
    }

    #[test]
    fn test_multi_job_run() {
        let orch = orchestrator(&["--numjobs", "4", "--iodepth", "8", "--bs", "4096", "--size", "262144"]);
        let result = orch.run().unwrap();

        assert_eq!(result.total_ops, 4 * 64);
        assert_eq!(result.writes, 4 * 64);
        assert_eq!(result.bytes, 4 * 262144);
        assert_eq!(result.error_count, 0);
        assert_eq!(result.anomalies, 0);
        assert_eq!(result.jobs.len(), 4);
        assert!(!result.aborted());
        assert_eq!(result.histogram.len(), 256);
        assert_eq!(orch.session.refcount(), 0);
        assert_eq!(orch.session.backend().stats().pool_connect, 1);
        assert_eq!(orch.session.backend().stats().pool_disconnect, 1);
    }

    #[test]
    fn test_shared_file_unlink() {
        let orch = orchestrator(&[
            "--numjobs", "2", "--shared-file", "--unlink", "--rw", "randrw", "--bs", "512",
            "--size", "8192",
        ]);
        let result = orch.run().unwrap();
        assert_eq!(result.total_ops, 32);

        let left = orch.session.backend().file_contents(
            &Uuid::parse_str(POOL).unwrap(),
            &Uuid::parse_str(CONT).unwrap(),
            "dfs-bench",
        );
        assert!(left.is_none());
        assert!(!orch.session.is_initialized());
    }

    #[test]
    fn test_duration_run_stops() {
        let orch = orchestrator(&["--duration", "1", "--bs", "512", "--size", "4096"]);
        let start = Instant::now();
        let result = orch.run().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(result.total_ops > 0);
        assert_eq!(result.error_count, 0);
    }

    #[test]
    fn test_bad_target_fails() {
        let config = JobConfig::from_cli(&CliArgs::parse_from([
            "test", "--pool", POOL, "--cont", CONT, "--svcl", "7", "-q",
        ]))
        .unwrap();
        let backend = MemBackend::with_seed(1).with_container(
            Uuid::parse_str(POOL).unwrap(),
            vec![0],
            Uuid::parse_str(CONT).unwrap(),
        );
        let session = Arc::new(SessionManager::new(Arc::new(backend)));
        let orch = Orchestrator::new(config, Arc::clone(&session));

        assert!(matches!(orch.run(), Err(EngineError::Backend(_))));
        assert_eq!(session.refcount(), 0);
        assert!(!session.backend().is_initialized());
    }

    #[test]
    fn test_export_json() {
        let orch = orchestrator(&["--bs", "1024", "--size", "4096", "--output-format", "json"]);
        let result = orch.run().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        orch.export(&result, &path).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["summary"]["total_ops"], 4);
        assert_eq!(parsed["summary"]["test_name"], "write");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(123), "123");
        assert_eq!(format_count(1234), "1,234");
        assert_eq!(format_count(1234567), "1,234,567");
    }

    #[test]
    fn test_format_throughput() {
        assert_eq!(format_throughput(937821.7051), "937,821");
        assert_eq!(format_throughput(123.456), "123");
    }
}
