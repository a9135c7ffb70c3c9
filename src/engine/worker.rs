//! Per-thread worker context
//!
//! Each worker owns its completion queue, its request slots and at most one
//! open file. Nothing here is shared with other workers; the only shared
//! piece is the session it holds a reference to.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::backend::{Backend, Completion, EqHandle, ObjHandle, ObjectClass, OpenOptions};
use crate::config::EngineOptions;
use crate::session::{Connection, ReleaseOutcome, SessionHandle, SessionManager};
use crate::utils::{BackendError, ConfigError, EngineError, ResourceError, Result};

use super::slot::SlotPool;

#[derive(Debug, Clone)]
pub(crate) struct OpenFile {
    pub obj: ObjHandle,
    pub name: String,
}

/// What happened while tearing a worker down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTeardown {
    /// Requests still outstanding when the queue was destroyed
    pub abandoned: usize,
    /// Unfinished events the backend discarded on forced destroy
    pub discarded_events: usize,
    pub release: ReleaseOutcome,
}

/// Execution context for one worker thread
pub struct WorkerContext<B: Backend> {
    pub(crate) index: usize,
    pub(crate) session: Arc<SessionManager<B>>,
    pub(crate) handle: Option<SessionHandle>,
    pub(crate) connection: Connection,
    pub(crate) eq: EqHandle,
    pub(crate) file: Option<OpenFile>,
    pub(crate) slots: SlotPool,
    pub(crate) completions: Vec<Completion>,
    pub(crate) inflight: usize,
    pub(crate) queue_depth: usize,
    pub(crate) class: ObjectClass,
    pub(crate) chunk_size: u64,
    pub(crate) anomalies: u64,
}

impl<B: Backend> WorkerContext<B> {
    /// Set up a worker allowing `queue_depth` outstanding requests.
    ///
    /// Local resources come first so a local failure never touches the
    /// shared session; the event queue needs a live stack, so it is created
    /// after acquisition and a failure there releases the session again.
    pub fn init(
        session: Arc<SessionManager<B>>,
        options: &EngineOptions,
        queue_depth: usize,
        index: usize,
    ) -> Result<Self> {
        if queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth.into());
        }

        let slots = SlotPool::with_depth(queue_depth).map_err(|e| {
            error!("Failed to allocate IO queue: {}", e);
            ResourceError::SlotPool { depth: queue_depth }
        })?;
        let mut completions = Vec::new();
        completions
            .try_reserve_exact(queue_depth)
            .map_err(|_| ResourceError::SlotPool { depth: queue_depth })?;

        let handle = session.acquire(options)?;

        let eq = match session.backend().eq_create() {
            Ok(eq) => eq,
            Err(code) => {
                error!("Failed to create event queue: {}", code);
                session.release(handle);
                return Err(ResourceError::EventQueue(code).into());
            }
        };

        debug!("worker {} ready (queue depth {})", index, queue_depth);
        Ok(Self {
            index,
            connection: handle.connection(),
            chunk_size: handle.chunk_size(),
            handle: Some(handle),
            session,
            eq,
            file: None,
            slots,
            completions,
            inflight: 0,
            queue_depth,
            class: ObjectClass::spec_rank(index),
            anomalies: 0,
        })
    }

    /// Set up a single-request worker for [`WorkerContext::execute`].
    ///
    /// Files opened through it are striped (`ObjectClass::SX`) rather than
    /// pinned to a rank.
    pub fn init_sync(
        session: Arc<SessionManager<B>>,
        options: &EngineOptions,
        index: usize,
    ) -> Result<Self> {
        Ok(Self::init(session, options, 1, index)?.with_object_class(ObjectClass::SX))
    }

    /// Override the placement class used by `open`
    pub fn with_object_class(mut self, class: ObjectClass) -> Self {
        self.class = class;
        self
    }

    pub fn object_class(&self) -> ObjectClass {
        self.class
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    /// Requests submitted and not yet harvested
    pub fn inflight(&self) -> usize {
        self.inflight
    }

    /// Completions that could not be matched to an outstanding request
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn open_file_name(&self) -> Option<&str> {
        self.file.as_ref().map(|f| f.name.as_str())
    }

    pub(crate) fn backend(&self) -> &B {
        self.session.backend().as_ref()
    }

    /// Open (creating if needed) `name` as this worker's file
    pub fn open(&mut self, name: &str) -> Result<ObjHandle> {
        if self.file.is_some() {
            self.close()?;
        }

        let opts = OpenOptions::create_rw(self.class, self.chunk_size);
        let obj = self
            .backend()
            .open(self.connection.fs, name, &opts)
            .map_err(|code| {
                error!("Failed to open file {}: {}", name, code);
                BackendError::object("open", name, code)
            })?;

        self.file = Some(OpenFile {
            obj,
            name: name.to_string(),
        });
        Ok(obj)
    }

    /// Release the open file; a no-op when none is open
    pub fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        if self.inflight > 0 {
            warn!(
                "worker {} closing {} with {} requests in flight",
                self.index, file.name, self.inflight
            );
        }
        self.backend().release(file.obj).map_err(|code| {
            error!("release of {} failed: {}", file.name, code);
            EngineError::from(BackendError::object("release", &file.name, code))
        })
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.backend()
            .remove(self.connection.fs, name)
            .map_err(|code| {
                error!("Failed to remove file {}: {}", name, code);
                EngineError::from(BackendError::object("remove", name, code))
            })
    }

    /// File size in bytes
    pub fn stat(&self, name: &str) -> Result<u64> {
        if self.handle.is_none() {
            return Ok(0);
        }
        self.backend()
            .stat(self.connection.fs, name)
            .map(|st| st.size)
            .map_err(|code| {
                error!("stat of {} failed: {}", name, code);
                EngineError::from(BackendError::object("stat", name, code))
            })
    }

    /// Destroy the queue and drop this worker's session reference.
    ///
    /// Requests should be drained first. If some are still in flight the
    /// queue is force-destroyed and the condition is logged, never raised.
    pub fn teardown(mut self) -> WorkerTeardown {
        self.shutdown().unwrap_or(WorkerTeardown {
            abandoned: 0,
            discarded_events: 0,
            release: ReleaseOutcome::Decremented { remaining: 0 },
        })
    }

    fn shutdown(&mut self) -> Option<WorkerTeardown> {
        let handle = self.handle.take()?;

        if let Err(e) = self.close() {
            error!("worker {}: {}", self.index, e);
        }

        let abandoned = self.inflight;
        if abandoned > 0 {
            error!(
                "worker {} torn down with {} requests in flight",
                self.index, abandoned
            );
            self.anomalies += abandoned as u64;
        }

        let discarded_events = match self.backend().eq_destroy(self.eq, true) {
            Ok(0) => 0,
            Ok(n) => {
                error!("event queue destroyed with {} unfinished events", n);
                n
            }
            Err(code) => {
                error!("failed to destroy event queue: {}", code);
                0
            }
        };

        self.slots.clear();
        self.inflight = 0;

        let release = self.session.release(handle);
        Some(WorkerTeardown {
            abandoned,
            discarded_events,
            release,
        })
    }
}

impl<B: Backend> fmt::Debug for WorkerContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("index", &self.index)
            .field("queue_depth", &self.queue_depth)
            .field("inflight", &self.inflight)
            .field("file", &self.open_file_name())
            .finish()
    }
}

impl<B: Backend> Drop for WorkerContext<B> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!("worker {} dropped without teardown", self.index);
            self.shutdown();
        }
    }
}
