//! Queue-depth driven job worker
//!
//! One job runs on one thread and owns one worker context:
//! - Keep the queue full until `submit` reports busy or the quota runs out
//! - Harvest at least one completion, recycle its unit, repeat
//! - Per-request latency goes into a thread-local histogram

use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use tracing::{debug, error, info, warn};

use super::counters::GlobalCounters;
use crate::backend::Backend;
use crate::config::{JobConfig, RwMode};
use crate::engine::{Direction, SubmitStatus, WorkUnit, WorkerContext};
use crate::session::SessionManager;
use crate::utils::{EngineError, Result};

/// Upper bound on a single harvest wait; keeps shutdown responsive
const HARVEST_WAIT: Duration = Duration::from_millis(100);

/// Result from one job
pub struct JobResult {
    pub job_id: usize,
    pub file: String,
    /// Per-request latency (microseconds)
    pub histogram: Histogram<u64>,
    pub reads: u64,
    pub writes: u64,
    pub bytes: u64,
    pub error_count: u64,
    /// Completions that did not match an outstanding request
    pub anomalies: u64,
    /// Blocks written before the measured phase
    pub layout_ops: u64,
    pub duration: Duration,
    /// Why the job stopped early, if it did
    pub aborted: Option<String>,
}

impl JobResult {
    /// Successful operations
    pub fn ops(&self) -> u64 {
        self.reads + self.writes
    }
}

/// Benchmark job driving one worker context
pub struct JobWorker<B: Backend> {
    id: usize,
    ctx: WorkerContext<B>,
    file: String,
    rw: RwMode,
    rwmixread: u32,
    block_size: usize,
    blocks: u64,
    quota: Option<u64>,
    iodepth: usize,
    rng: fastrand::Rng,
    histogram: Histogram<u64>,
    /// Idle work units; ids index `started`
    spare: Vec<WorkUnit>,
    started: Vec<Instant>,
    done: Vec<WorkUnit>,
    next_block: u64,
    issued: u64,
    reads: u64,
    writes: u64,
    bytes: u64,
    error_count: u64,
    layout_ops: u64,
}

impl<B: Backend> JobWorker<B> {
    /// Attach to the session and open this job's file
    pub fn new(
        id: usize,
        session: Arc<SessionManager<B>>,
        config: &JobConfig,
        duration_mode: bool,
    ) -> Result<Self> {
        let iodepth = config.iodepth as usize;
        let histogram = Histogram::new_with_bounds(1, 3_600_000_000, 3)
            .map_err(|e| EngineError::Worker(format!("failed to create histogram: {}", e)))?;

        let mut ctx = WorkerContext::init(session, &config.engine, iodepth, id)?;
        let file = config.file_for_job(id as u32);
        ctx.open(&file)?;

        let seed = config.seed.wrapping_add(id as u64);
        let mut rng = fastrand::Rng::with_seed(seed);
        let spare = (0..iodepth)
            .map(|i| {
                let mut buf = vec![0u8; config.block_size];
                rng.fill(&mut buf);
                WorkUnit::write(i as u64, 0, buf)
            })
            .collect();

        Ok(Self {
            id,
            ctx,
            file,
            rw: config.rw,
            rwmixread: config.rwmixread,
            block_size: config.block_size,
            blocks: config.ops_per_job().max(1),
            quota: (!duration_mode).then(|| config.ops_per_job()),
            iodepth,
            rng,
            histogram,
            spare,
            started: vec![Instant::now(); iodepth],
            done: Vec::with_capacity(iodepth),
            next_block: 0,
            issued: 0,
            reads: 0,
            writes: 0,
            bytes: 0,
            error_count: 0,
            layout_ops: 0,
        })
    }

    /// Run the job to completion and tear the worker down
    pub fn run(mut self, counters: Arc<GlobalCounters>, unlink: bool) -> JobResult {
        let start = Instant::now();

        let mut aborted = None;
        if self.rw.reads() {
            if let Err(e) = self.layout() {
                error!("job {}: layout of {} failed: {}", self.id, self.file, e);
                aborted = Some(e.to_string());
            }
        }
        if aborted.is_none() {
            if let Err(e) = self.run_loop(&counters) {
                error!("job {}: {}", self.id, e);
                counters.signal_shutdown();
                aborted = Some(e.to_string());
            }
        }
        let duration = start.elapsed();

        self.finish(unlink, duration, aborted)
    }

    /// Write the file out to full size before reading it
    fn layout(&mut self) -> Result<()> {
        let current = self.ctx.stat(&self.file)?;
        let total = self.blocks * self.block_size as u64;
        if current >= total {
            return Ok(());
        }

        let first = current / self.block_size as u64;
        info!(
            "job {}: laying out {} ({} blocks)",
            self.id,
            self.file,
            self.blocks - first
        );

        let mut block = first;
        let mut failed = 0u64;
        while block < self.blocks || self.ctx.inflight() > 0 {
            while block < self.blocks && self.ctx.inflight() < self.iodepth {
                let Some(mut unit) = self.spare.pop() else {
                    break;
                };
                unit.reset(Direction::Write, block * self.block_size as u64, self.block_size);
                match self.ctx.submit(unit)? {
                    SubmitStatus::Queued => {
                        block += 1;
                        self.layout_ops += 1;
                    }
                    SubmitStatus::CompletedInline(unit) => {
                        block += 1;
                        failed += u64::from(!unit.is_ok());
                        self.spare.push(unit);
                    }
                    SubmitStatus::Busy(unit) => {
                        self.spare.push(unit);
                        break;
                    }
                }
            }

            if self.ctx.inflight() > 0 {
                self.ctx.harvest(1, self.iodepth, None, &mut self.done)?;
            }
            for unit in self.done.drain(..) {
                failed += u64::from(!unit.is_ok());
                self.spare.push(unit);
            }
        }

        if failed > 0 {
            return Err(EngineError::Worker(format!(
                "{} layout writes failed",
                failed
            )));
        }
        Ok(())
    }

    fn run_loop(&mut self, counters: &GlobalCounters) -> Result<()> {
        let mut exhausted = false;

        loop {
            while !exhausted && self.ctx.inflight() < self.iodepth {
                if self.quota.is_some_and(|q| self.issued >= q)
                    || counters.claim_batch(1).is_none()
                {
                    exhausted = true;
                    break;
                }
                let Some(unit) = self.spare.pop() else {
                    break;
                };
                let unit = self.prepare(unit);
                self.started[unit.id as usize] = Instant::now();
                self.issued += 1;

                match self.ctx.submit(unit)? {
                    SubmitStatus::Queued => {}
                    SubmitStatus::CompletedInline(unit) => self.account(unit, counters),
                    SubmitStatus::Busy(unit) => {
                        self.issued -= 1;
                        self.spare.push(unit);
                        break;
                    }
                }
            }

            if self.ctx.inflight() == 0 {
                if exhausted {
                    break;
                }
                continue;
            }

            let harvested = self
                .ctx
                .harvest(1, self.iodepth, Some(HARVEST_WAIT), &mut self.done);
            let mut done = std::mem::take(&mut self.done);
            for unit in done.drain(..) {
                self.account(unit, counters);
            }
            self.done = done;
            harvested?;

            if counters.is_shutdown() {
                exhausted = true;
            }
        }

        Ok(())
    }

    /// Pick direction and offset for the next request
    fn prepare(&mut self, mut unit: WorkUnit) -> WorkUnit {
        let direction = match self.rw {
            RwMode::Read | RwMode::RandRead => Direction::Read,
            RwMode::Write | RwMode::RandWrite => Direction::Write,
            RwMode::ReadWrite | RwMode::RandReadWrite => {
                if self.rng.u32(0..100) < self.rwmixread {
                    Direction::Read
                } else {
                    Direction::Write
                }
            }
        };

        let block = if self.rw.is_random() {
            self.rng.u64(0..self.blocks)
        } else {
            let b = self.next_block % self.blocks;
            self.next_block += 1;
            b
        };

        unit.reset(direction, block * self.block_size as u64, self.block_size);
        unit
    }

    fn account(&mut self, unit: WorkUnit, counters: &GlobalCounters) {
        let latency = self.started[unit.id as usize].elapsed().as_micros() as u64;
        self.histogram.record(latency.max(1)).ok();

        if let Some(code) = unit.error {
            debug!(
                "job {}: {} at {} failed: {}",
                self.id, unit.direction, unit.offset, code
            );
            self.error_count += 1;
            counters.record_error();
            counters.record_finished(1, 0);
        } else {
            match unit.direction {
                Direction::Read => self.reads += 1,
                _ => self.writes += 1,
            }
            self.bytes += unit.transferred as u64;
            counters.record_finished(1, unit.transferred as u64);
        }
        self.spare.push(unit);
    }

    fn finish(mut self, unlink: bool, duration: Duration, aborted: Option<String>) -> JobResult {
        if let Err(e) = self.ctx.close() {
            warn!("job {}: {}", self.id, e);
        }
        if unlink {
            if let Err(e) = self.ctx.remove(&self.file) {
                warn!("job {}: unlink failed: {}", self.id, e);
            }
        }

        let teardown = self.ctx.teardown();
        let anomalies = teardown.abandoned as u64;
        if anomalies > 0 {
            warn!("job {}: {} requests abandoned at teardown", self.id, anomalies);
        }

        JobResult {
            job_id: self.id,
            file: self.file,
            histogram: self.histogram,
            reads: self.reads,
            writes: self.writes,
            bytes: self.bytes,
            error_count: self.error_count,
            anomalies,
            layout_ops: self.layout_ops,
            duration,
            aborted,
        }
    }
}
