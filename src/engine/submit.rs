//! Submission path
//!
//! A work unit becomes at most one backend call. The unit's buffer travels
//! with the operation and comes back on completion (or rejection), so the
//! slot keeps only the unit's metadata while the request is outstanding.

use std::mem;

use tracing::{debug, warn};

use crate::backend::{Backend, ErrorCode, SgList};
use crate::utils::{EngineError, Result};

use super::work_unit::{Direction, WorkUnit};
use super::worker::WorkerContext;

/// Result of handing a work unit to the engine
#[derive(Debug)]
pub enum SubmitStatus {
    /// Dispatched; the unit comes back from `harvest`
    Queued,
    /// Finished without an outstanding operation; check `unit.error`
    CompletedInline(WorkUnit),
    /// Queue is full. Not an error: harvest and resubmit the unit.
    Busy(WorkUnit),
}

impl<B: Backend> WorkerContext<B> {
    /// Queue one work unit against the open file
    pub fn submit(&mut self, mut unit: WorkUnit) -> Result<SubmitStatus> {
        if self.inflight >= self.queue_depth {
            return Ok(SubmitStatus::Busy(unit));
        }

        match unit.direction {
            Direction::Read | Direction::Write => {}
            Direction::Sync => {
                unit.resid = 0;
                return Ok(SubmitStatus::CompletedInline(unit));
            }
            other => {
                debug!("worker {}: invalid direction {}", self.index, other);
                unit.error = Some(ErrorCode::INVAL);
                return Ok(SubmitStatus::CompletedInline(unit));
            }
        }

        let Some(obj) = self.file.as_ref().map(|f| f.obj) else {
            return Err(EngineError::NoOpenFile(self.index));
        };
        let Some(index) = self.slots.claim() else {
            return Ok(SubmitStatus::Busy(unit));
        };
        let tag = self.slots.get_mut(index).tag();

        let event = match self.backend().event_init(self.eq, tag) {
            Ok(event) => event,
            Err(code) => {
                debug!("worker {}: event init failed: {}", self.index, code);
                self.slots.recycle(index);
                unit.error = Some(code);
                return Ok(SubmitStatus::CompletedInline(unit));
            }
        };

        let sgl = SgList::single(mem::take(&mut unit.buf), unit.len);
        let fs = self.connection.fs;
        let dispatched = match unit.direction {
            Direction::Write => self.backend().write(fs, obj, sgl, unit.offset, &event),
            _ => self.backend().read(fs, obj, sgl, unit.offset, &event),
        };

        match dispatched {
            Ok(()) => {
                let slot = self.slots.get_mut(index);
                slot.unit = Some(unit);
                slot.event = Some(event);
                self.inflight += 1;
                Ok(SubmitStatus::Queued)
            }
            Err(rejected) => {
                debug!(
                    "worker {}: {} at {} rejected: {}",
                    self.index, unit.direction, unit.offset, rejected.code
                );
                unit.buf = rejected.sgl.into_buffer();
                unit.error = Some(rejected.code);
                if let Err(code) = self.backend().event_fini(event) {
                    warn!("worker {}: event fini failed: {}", self.index, code);
                }
                self.slots.recycle(index);
                Ok(SubmitStatus::CompletedInline(unit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Fault;
    use crate::engine::test_support::{options, session};
    use std::sync::Arc;

    #[test]
    fn test_busy_at_depth() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 2, 0).unwrap();
        worker.open("busy").unwrap();

        for i in 0..2 {
            let status = worker.submit(WorkUnit::write(i, i * 8, vec![1; 8])).unwrap();
            assert!(matches!(status, SubmitStatus::Queued));
        }
        let status = worker.submit(WorkUnit::write(9, 64, vec![2; 8])).unwrap();
        match status {
            SubmitStatus::Busy(unit) => {
                assert_eq!(unit.id, 9);
                assert_eq!(unit.buf, vec![2; 8]);
            }
            other => panic!("expected busy, got {:?}", other),
        }
        assert_eq!(worker.inflight(), 2);

        let mut out = Vec::new();
        worker.harvest(2, 2, None, &mut out).unwrap();
        worker.teardown();
    }

    #[test]
    fn test_sync_and_invalid_complete_inline() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 1, 0).unwrap();

        match worker.submit(WorkUnit::sync(1)).unwrap() {
            SubmitStatus::CompletedInline(unit) => {
                assert!(unit.is_ok());
                assert_eq!(unit.resid, 0);
            }
            other => panic!("unexpected {:?}", other),
        }

        let trim = WorkUnit::new(2, Direction::Trim, 0, vec![0; 4]);
        match worker.submit(trim).unwrap() {
            SubmitStatus::CompletedInline(unit) => assert_eq!(unit.error, Some(ErrorCode::INVAL)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(worker.inflight(), 0);
        worker.teardown();
    }

    #[test]
    fn test_submit_without_file() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 1, 4).unwrap();
        let err = worker.submit(WorkUnit::read(1, 0, 16)).unwrap_err();
        assert!(matches!(err, EngineError::NoOpenFile(4)));
        worker.teardown();
    }

    #[test]
    fn test_dispatch_failure_keeps_inflight() {
        let mgr = session();
        mgr.backend().inject(Fault::DispatchAt(4096), ErrorCode::IO);
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 4, 0).unwrap();
        worker.open("reject").unwrap();

        assert!(matches!(
            worker.submit(WorkUnit::write(1, 0, vec![3; 32])).unwrap(),
            SubmitStatus::Queued
        ));
        match worker.submit(WorkUnit::write(2, 4096, vec![4; 32])).unwrap() {
            SubmitStatus::CompletedInline(unit) => {
                assert_eq!(unit.error, Some(ErrorCode::IO));
                assert_eq!(unit.buf, vec![4; 32]);
                assert_eq!(unit.resid, 32);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(worker.inflight(), 1);

        let mut out = Vec::new();
        assert_eq!(worker.harvest(1, 4, None, &mut out).unwrap(), 1);
        assert_eq!(out[0].id, 1);
        assert_eq!(worker.inflight(), 0);
        worker.teardown();
    }

    #[test]
    fn test_event_init_failure_recycles_slot() {
        let mgr = session();
        let mut worker = WorkerContext::init(Arc::clone(&mgr), &options(), 1, 0).unwrap();
        worker.open("evt").unwrap();

        mgr.backend().inject(Fault::EventInit, ErrorCode::NOMEM);
        match worker.submit(WorkUnit::read(1, 0, 8)).unwrap() {
            SubmitStatus::CompletedInline(unit) => assert_eq!(unit.error, Some(ErrorCode::NOMEM)),
            other => panic!("unexpected {:?}", other),
        }
        mgr.backend().clear_fault(Fault::EventInit);

        assert!(matches!(
            worker.submit(WorkUnit::read(2, 0, 8)).unwrap(),
            SubmitStatus::Queued
        ));
        let mut out = Vec::new();
        worker.harvest(1, 1, None, &mut out).unwrap();
        worker.teardown();
    }
}
