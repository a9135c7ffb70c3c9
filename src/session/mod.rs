//! Shared backend session
//!
//! One connection (pool + container + mounted namespace) serves every
//! worker in the process. The first `acquire` brings the stack up, later
//! ones only bump the reference count; the `release` that drops the count
//! to zero tears everything down again.
//!
//! All state lives behind a single mutex and only the two entry points
//! mutate it. The lock covers lifecycle transitions only, never
//! per-request I/O.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::backend::{Backend, ContHandle, ErrorCode, FsHandle, PoolHandle};
use crate::config::{EngineOptions, ResolvedTarget};
use crate::utils::{BackendError, Result};

/// Live connection shared by all workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub pool: PoolHandle,
    pub cont: ContHandle,
    pub fs: FsHandle,
}

/// One counted reference to the session.
///
/// Not `Clone`: each handle accounts for exactly one unit of the refcount
/// and is consumed by [`SessionManager::release`].
#[derive(Debug)]
pub struct SessionHandle {
    connection: Connection,
    chunk_size: u64,
}

impl SessionHandle {
    pub fn connection(&self) -> Connection {
        self.connection
    }

    /// Object chunk size configured at first acquisition
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

/// One independently fallible teardown step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Umount(FsHandle),
    ContClose(ContHandle),
    PoolDisconnect(PoolHandle),
    Fini,
}

impl TeardownStep {
    pub fn name(&self) -> &'static str {
        match self {
            TeardownStep::Umount(_) => "umount",
            TeardownStep::ContClose(_) => "cont_close",
            TeardownStep::PoolDisconnect(_) => "pool_disconnect",
            TeardownStep::Fini => "fini",
        }
    }

    fn run<B: Backend + ?Sized>(&self, backend: &B) -> std::result::Result<(), ErrorCode> {
        match *self {
            TeardownStep::Umount(fs) => backend.umount(fs),
            TeardownStep::ContClose(coh) => backend.cont_close(coh),
            TeardownStep::PoolDisconnect(poh) => backend.pool_disconnect(poh),
            TeardownStep::Fini => backend.fini(),
        }
    }
}

/// Outcome of an ordered teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Steps attempted, in order
    pub attempted: Vec<&'static str>,
    /// Steps that failed with their status
    pub failures: Vec<(&'static str, ErrorCode)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run every step in order; a failing step is logged and the rest still run
pub fn run_teardown<B: Backend + ?Sized>(backend: &B, steps: &[TeardownStep]) -> TeardownReport {
    let mut report = TeardownReport::default();
    for step in steps {
        report.attempted.push(step.name());
        if let Err(code) = step.run(backend) {
            error!("failed to {}: {}", step.name(), code);
            report.failures.push((step.name(), code));
        }
    }
    report
}

/// What a `release` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other holders remain
    Decremented { remaining: usize },
    /// This was the last holder; the session was torn down
    TornDown(TeardownReport),
}

struct SessionState {
    connection: Option<Connection>,
    refcount: usize,
    options: Option<EngineOptions>,
}

/// Process-wide session service, shared between workers via `Arc`
pub struct SessionManager<B: Backend> {
    backend: Arc<B>,
    state: Mutex<SessionState>,
}

impl<B: Backend> SessionManager<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            state: Mutex::new(SessionState {
                connection: None,
                refcount: 0,
                options: None,
            }),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Attach to the session, bringing it up on first use.
    ///
    /// Fails with a configuration error (and no backend calls) when an
    /// identifier is missing or malformed. A failing bring-up step unwinds
    /// whatever the attempt created before the error is returned.
    pub fn acquire(&self, options: &EngineOptions) -> Result<SessionHandle> {
        let mut state = self.state.lock();

        if let Some(connection) = state.connection {
            if state.options.as_ref() != Some(options) {
                warn!("session already attached; ignoring differing options ({})", options);
            }
            state.refcount += 1;
            return Ok(SessionHandle {
                connection,
                chunk_size: state.options.as_ref().map_or(options.chunk_size, |o| o.chunk_size),
            });
        }

        let target = options.resolve()?;
        let connection = self.bring_up(&target)?;
        info!("[Init] {}", options);

        state.connection = Some(connection);
        state.options = Some(options.clone());
        state.refcount = 1;
        Ok(SessionHandle {
            connection,
            chunk_size: options.chunk_size,
        })
    }

    /// Drop one reference; the last one tears the session down
    pub fn release(&self, handle: SessionHandle) -> ReleaseOutcome {
        let mut state = self.state.lock();

        if state.refcount == 0 || state.connection != Some(handle.connection) {
            warn!("release of a handle that does not belong to the live session");
            return ReleaseOutcome::Decremented {
                remaining: state.refcount,
            };
        }

        state.refcount -= 1;
        if state.refcount > 0 {
            return ReleaseOutcome::Decremented {
                remaining: state.refcount,
            };
        }

        let connection = handle.connection;
        state.connection = None;
        state.options = None;
        let report = run_teardown(
            self.backend.as_ref(),
            &[
                TeardownStep::Umount(connection.fs),
                TeardownStep::ContClose(connection.cont),
                TeardownStep::PoolDisconnect(connection.pool),
                TeardownStep::Fini,
            ],
        );
        info!(
            "[Fini] session torn down ({} of {} steps failed)",
            report.failures.len(),
            report.attempted.len()
        );
        ReleaseOutcome::TornDown(report)
    }

    pub fn refcount(&self) -> usize {
        self.state.lock().refcount
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    fn bring_up(&self, target: &ResolvedTarget) -> std::result::Result<Connection, BackendError> {
        let backend = self.backend.as_ref();

        match backend.init() {
            Ok(()) | Err(ErrorCode::ALREADY) => {}
            Err(code) => {
                error!("Failed to initialize {} stack: {}", backend.name(), code);
                return Err(BackendError::call("init", code));
            }
        }

        let pool = match backend.pool_connect(&target.pool, &target.svc_ranks) {
            Ok(poh) => poh,
            Err(code) => {
                error!("Failed to connect to pool {}: {}", target.pool, code);
                run_teardown(backend, &[TeardownStep::Fini]);
                return Err(BackendError::call("pool_connect", code));
            }
        };

        let cont = match backend.cont_open(pool, &target.cont) {
            Ok(coh) => coh,
            Err(code) => {
                error!("Failed to open container {}: {}", target.cont, code);
                run_teardown(
                    backend,
                    &[TeardownStep::PoolDisconnect(pool), TeardownStep::Fini],
                );
                return Err(BackendError::call("cont_open", code));
            }
        };

        let fs = match backend.mount(pool, cont) {
            Ok(fs) => fs,
            Err(code) => {
                error!("Failed to mount namespace: {}", code);
                run_teardown(
                    backend,
                    &[
                        TeardownStep::ContClose(cont),
                        TeardownStep::PoolDisconnect(pool),
                        TeardownStep::Fini,
                    ],
                );
                return Err(BackendError::call("mount", code));
            }
        };

        Ok(Connection { pool, cont, fs })
    }
}
