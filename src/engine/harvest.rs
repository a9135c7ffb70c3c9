//! Completion harvesting
//!
//! Completions are matched to their request slot through the event tag
//! (slot index plus generation). Anything that does not resolve to an
//! outstanding slot is counted as an anomaly and dropped, so a unit is
//! never reported twice.

use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::backend::{Backend, Completion};
use crate::utils::{EngineError, Result};

use super::submit::SubmitStatus;
use super::work_unit::WorkUnit;
use super::worker::WorkerContext;

impl<B: Backend> WorkerContext<B> {
    /// Collect finished work units into `out`, in completion order.
    ///
    /// Polls until at least `min` units are collected (clamped to what is
    /// in flight), `max` is reached, or `timeout` expires. `min == 0` makes
    /// a single non-blocking pass. On a poll failure the units already
    /// collected stay in `out` and the error is returned.
    pub fn harvest(
        &mut self,
        min: usize,
        max: usize,
        timeout: Option<Duration>,
        out: &mut Vec<WorkUnit>,
    ) -> Result<usize> {
        if max == 0 {
            return Ok(0);
        }
        let min = min.min(max).min(self.inflight);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut collected = 0usize;

        loop {
            let mut ready = mem::take(&mut self.completions);
            ready.clear();
            let polled = self.backend().eq_poll(self.eq, max - collected, &mut ready);

            for completion in ready.drain(..) {
                if let Some(unit) = self.complete(completion) {
                    out.push(unit);
                    collected += 1;
                }
            }
            self.completions = ready;

            let polled = polled.map_err(|code| {
                error!("worker {}: event queue poll failed: {}", self.index, code);
                EngineError::Poll(code)
            })?;

            if collected >= min || collected >= max || self.inflight == 0 {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            if polled == 0 {
                thread::yield_now();
            }
        }

        Ok(collected)
    }

    /// Run one unit to completion; requires an idle queue
    pub fn execute(&mut self, unit: WorkUnit) -> Result<WorkUnit> {
        if self.inflight > 0 {
            return Err(EngineError::Worker(format!(
                "execute with {} requests in flight",
                self.inflight
            )));
        }

        match self.submit(unit)? {
            SubmitStatus::CompletedInline(unit) => Ok(unit),
            SubmitStatus::Busy(_) => Err(EngineError::Worker("queue unexpectedly full".into())),
            SubmitStatus::Queued => {
                let mut out = Vec::with_capacity(1);
                self.harvest(1, 1, None, &mut out)?;
                out.pop()
                    .ok_or_else(|| EngineError::Worker("request lost before completion".into()))
            }
        }
    }

    fn complete(&mut self, completion: Completion) -> Option<WorkUnit> {
        let Completion { event, outcome, sgl } = completion;

        let Some(index) = self.slots.resolve(event.tag) else {
            error!(
                "worker {}: completion for unknown request (tag {:#x})",
                self.index, event.tag
            );
            self.anomalies += 1;
            if let Err(code) = self.backend().event_fini(event) {
                debug!("worker {}: unmatched event fini: {}", self.index, code);
            }
            return None;
        };
        if self.slots.is_complete(index) {
            error!(
                "worker {}: completion on already completed slot {}",
                self.index, index
            );
            self.anomalies += 1;
            return None;
        }

        let slot = self.slots.get_mut(index);
        let bound = slot.event.take();
        let Some(mut unit) = slot.unit.take() else {
            error!("worker {}: slot {} has no work unit", self.index, index);
            self.slots.recycle(index);
            self.anomalies += 1;
            return None;
        };

        if let Some(sgl) = sgl {
            unit.buf = sgl.into_buffer();
        }
        match outcome {
            Ok(bytes) => {
                unit.resid = 0;
                unit.transferred = bytes;
            }
            Err(code) => unit.error = Some(code),
        }

        self.inflight = self.inflight.saturating_sub(1);
        if let Err(code) = self.backend().event_fini(bound.unwrap_or(event)) {
            warn!("worker {}: event fini failed: {}", self.index, code);
        }
        self.slots.recycle(index);
        Some(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ErrorCode, Fault, MemBackend, SgList};
    use crate::engine::test_support::{options, session, session_with};
    use crate::engine::work_unit::Direction;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_depth_four_scenario() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 4, 0).unwrap();
        worker.open("scenario").unwrap();

        for i in 0..4u64 {
            let status = worker.submit(WorkUnit::write(i, i * 512, vec![i as u8; 512])).unwrap();
            assert!(matches!(status, SubmitStatus::Queued));
        }
        let fifth = match worker.submit(WorkUnit::write(4, 2048, vec![4; 512])).unwrap() {
            SubmitStatus::Busy(unit) => unit,
            other => panic!("expected busy, got {:?}", other),
        };

        let mut out = Vec::new();
        let n = worker.harvest(1, 4, None, &mut out).unwrap();
        assert!(n >= 1);
        assert_eq!(out.len(), n);
        assert_eq!(worker.inflight(), 4 - n);
        assert!(out.iter().all(|u| u.is_ok() && u.resid == 0));

        assert!(matches!(worker.submit(fifth).unwrap(), SubmitStatus::Queued));

        let remaining = worker.inflight();
        worker.harvest(remaining, 4, None, &mut out).unwrap();
        assert_eq!(worker.inflight(), 0);
        let ids: HashSet<u64> = out.iter().map(|u| u.id).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(worker.anomalies(), 0);
        worker.teardown();
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        worker.open("roundtrip").unwrap();

        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let written = worker.execute(WorkUnit::write(1, 8192, payload.clone())).unwrap();
        assert!(written.is_ok());
        assert_eq!(written.transferred, 4096);

        let read = worker.execute(WorkUnit::read(2, 8192, 4096)).unwrap();
        assert!(read.is_ok());
        assert_eq!(read.direction, Direction::Read);
        assert_eq!(read.data(), &payload[..]);
        assert_eq!(worker.stat("roundtrip").unwrap(), 8192 + 4096);
        worker.teardown();
    }

    #[test]
    fn test_min_zero_does_not_block() {
        let mgr = session_with(MemBackend::with_seed(3).with_completion_delay(Duration::from_secs(60)));
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        worker.open("slow").unwrap();

        let mut out = Vec::new();
        assert_eq!(worker.harvest(0, 2, None, &mut out).unwrap(), 0);

        worker.submit(WorkUnit::write(1, 0, vec![1; 8])).unwrap();
        assert_eq!(worker.harvest(0, 2, None, &mut out).unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(worker.inflight(), 1);

        let n = worker
            .harvest(1, 2, Some(Duration::from_millis(20)), &mut out)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(worker.inflight(), 1);

        let report = worker.teardown();
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.discarded_events, 1);
    }

    #[test]
    fn test_per_request_error_isolated() {
        let mgr = session();
        mgr.backend().inject(Fault::CompleteAt(1024), ErrorCode::IO);
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 4, 0).unwrap();
        worker.open("errors").unwrap();

        for i in 0..3u64 {
            worker.submit(WorkUnit::write(i, i * 1024, vec![9; 1024])).unwrap();
        }
        let mut out = Vec::new();
        worker.harvest(3, 4, None, &mut out).unwrap();
        assert_eq!(out.len(), 3);

        for unit in &out {
            if unit.id == 1 {
                assert_eq!(unit.error, Some(ErrorCode::IO));
                assert_eq!(unit.resid, 1024);
            } else {
                assert!(unit.is_ok());
                assert_eq!(unit.resid, 0);
            }
        }
        assert!(mgr.is_initialized());
        worker.teardown();
    }

    #[test]
    fn test_poll_failure_is_fatal_to_harvest() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        worker.open("poll").unwrap();
        worker.submit(WorkUnit::write(1, 0, vec![1; 16])).unwrap();

        mgr.backend().inject(Fault::EqPoll, ErrorCode::IO);
        let mut out = Vec::new();
        let err = worker.harvest(1, 2, None, &mut out).unwrap_err();
        assert!(matches!(err, EngineError::Poll(ErrorCode::IO)));
        assert!(out.is_empty());
        assert_eq!(worker.inflight(), 1);

        mgr.backend().clear_fault(Fault::EqPoll);
        assert_eq!(worker.harvest(1, 2, None, &mut out).unwrap(), 1);
        worker.teardown();
    }

    #[test]
    fn test_teardown_with_outstanding_requests() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 4, 0).unwrap();
        worker.open("leftover").unwrap();
        worker.submit(WorkUnit::write(1, 0, vec![1; 8])).unwrap();
        worker.submit(WorkUnit::write(2, 8, vec![2; 8])).unwrap();

        let report = worker.teardown();
        assert_eq!(report.abandoned, 2);
        assert_eq!(report.discarded_events, 2);
        assert!(matches!(report.release, crate::session::ReleaseOutcome::TornDown(_)));
        assert_eq!(mgr.refcount(), 0);
        assert_eq!(mgr.backend().open_queues(), 0);
    }

    #[test]
    fn test_slots_reused_across_cycles() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        worker.open("cycles").unwrap();

        let mut out = Vec::new();
        for round in 0..50u64 {
            worker.submit(WorkUnit::write(round * 2, 0, vec![0; 64])).unwrap();
            worker.submit(WorkUnit::read(round * 2 + 1, 0, 64)).unwrap();
            worker.harvest(2, 2, None, &mut out).unwrap();
            assert_eq!(worker.inflight(), 0);
        }
        assert_eq!(out.len(), 100);
        assert_eq!(worker.anomalies(), 0);
        worker.teardown();
    }

    #[test]
    fn test_execute_requires_idle_queue() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        worker.open("exec").unwrap();
        worker.submit(WorkUnit::write(1, 0, vec![1; 8])).unwrap();
        assert!(matches!(
            worker.execute(WorkUnit::sync(2)),
            Err(EngineError::Worker(_))
        ));

        let mut out = Vec::new();
        worker.harvest(1, 1, None, &mut out).unwrap();
        let done = worker.execute(WorkUnit::sync(3)).unwrap();
        assert_eq!(done.resid, 0);
        worker.teardown();
    }

    #[test]
    fn test_duplicate_completions_reported_once() {
        let mgr = session();
        mgr.backend().inject(Fault::DuplicateCompletion, ErrorCode::IO);
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 4, 0).unwrap();
        worker.open("dupes").unwrap();

        for i in 0..3u64 {
            worker.submit(WorkUnit::write(i, i * 64, vec![i as u8; 64])).unwrap();
        }
        let mut out = Vec::new();
        worker.harvest(3, 4, None, &mut out).unwrap();
        assert_eq!(worker.inflight(), 0);

        worker.submit(WorkUnit::write(3, 192, vec![3; 64])).unwrap();
        worker.harvest(1, 4, None, &mut out).unwrap();
        worker.harvest(0, 8, None, &mut out).unwrap();

        let ids: HashSet<u64> = out.iter().map(|u| u.id).collect();
        assert_eq!(out.len(), 4);
        assert_eq!(ids.len(), 4);
        assert_eq!(worker.inflight(), 0);
        assert_eq!(worker.anomalies(), 4);
        assert!(out.iter().all(|u| u.is_ok()));
        worker.teardown();
    }

    #[test]
    fn test_unmatched_completion_event_finalized() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        let obj = worker.open("stray").unwrap();

        let stray = mgr.backend().event_init(worker.eq, u64::MAX).unwrap();
        mgr.backend()
            .write(worker.connection.fs, obj, SgList::single(vec![7; 8], 8), 0, &stray)
            .unwrap();
        assert_eq!(mgr.backend().live_events(), 1);

        let mut out = Vec::new();
        assert_eq!(worker.harvest(0, 2, None, &mut out).unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(worker.anomalies(), 1);
        assert_eq!(mgr.backend().live_events(), 0);
        worker.teardown();
    }

    #[test]
    fn test_unaddressable_offset_fails_request() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        worker.open("far").unwrap();

        let done = worker
            .execute(WorkUnit::write(1, u64::MAX - 4, vec![1; 8]))
            .unwrap();
        assert_eq!(done.error, Some(ErrorCode::INVAL));
        assert_eq!(done.resid, 8);
        assert_eq!(worker.stat("far").unwrap(), 0);
        assert!(mgr.is_initialized());
        worker.teardown();
    }
}
