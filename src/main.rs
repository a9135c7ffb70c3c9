//! dfs-bench - asynchronous I/O benchmark over a DFS namespace
//!
//! Runs fio-style jobs (numjobs x iodepth) through the async engine and
//! reports IOPS, bandwidth and latency percentiles.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use dfs_bench::backend::{Backend, MemBackend};
use dfs_bench::benchmark::Orchestrator;
use dfs_bench::config::{CliArgs, JobConfig, OutputFormat};
use dfs_bench::metrics::MetricsReporter;
use dfs_bench::session::SessionManager;

fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn print_banner(config: &JobConfig, backend: &str) {
    if config.quiet {
        return;
    }

    println!("dfs-bench v{}", env!("CARGO_PKG_VERSION"));
    println!("====================================");
    println!("Target: {} (backend: {})", config.engine, backend);
    println!(
        "Jobs: {}, IO depth: {}, Block size: {}",
        config.numjobs, config.iodepth, config.block_size
    );
    match config.duration_secs {
        Some(secs) => println!("Pattern: {}, Duration: {}s", config.rw.as_str(), secs),
        None => println!("Pattern: {}, Size per job: {}", config.rw.as_str(), config.size),
    }
    println!("====================================\n");
}

fn run() -> Result<()> {
    let args = CliArgs::parse_args();
    setup_logging(args.verbose, args.quiet)?;

    let config =
        JobConfig::from_cli(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // The in-process store serves exactly the requested pool and container
    let target = config.engine.resolve()?;
    let backend = MemBackend::with_seed(config.seed)
        .with_container(target.pool, target.svc_ranks, target.cont)
        .with_completion_delay(config.completion_delay);
    print_banner(&config, backend.name());

    let session = Arc::new(SessionManager::new(Arc::new(backend)));
    let orchestrator = Orchestrator::new(config.clone(), session);
    let result = orchestrator.run()?;

    match config.output_format {
        OutputFormat::Text => result.print_summary(),
        OutputFormat::Json => {
            MetricsReporter::new(OutputFormat::Json).report(&orchestrator.results(&result))?
        }
    }

    if let Some(ref output_path) = config.output_path {
        info!("Writing results to: {:?}", output_path);
        orchestrator.export(&result, output_path)?;
    }

    if result.aborted() {
        bail!("one or more jobs stopped early");
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
