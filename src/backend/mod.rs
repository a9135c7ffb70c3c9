//! Storage backend boundary
//!
//! The engine talks to the object store only through the [`Backend`] trait:
//! stack init, pool/container attach, namespace mount, file objects, event
//! queues and asynchronous reads/writes keyed by an event. Implementations:
//! - [`MemBackend`]: in-process store with non-FIFO completion delivery

pub mod memory;
pub mod status;
pub mod types;

use uuid::Uuid;

pub use memory::{CallStats, Fault, MemBackend};
pub use status::{ErrorCode, IoOutcome};
pub use types::{
    Completion, ContHandle, EqHandle, Event, FileStat, FsHandle, IoVec, ObjHandle, ObjectClass,
    OpenOptions, PoolHandle, Rejected, SgList, DEFAULT_FILE_MODE,
};

/// Call contract the engine relies on.
///
/// Every method may be invoked from any worker thread. Lifecycle calls
/// (`init` through `umount`) are only issued under the session lock, the
/// rest are issued concurrently by workers against their own queue.
pub trait Backend: Send + Sync {
    /// Display name for logs
    fn name(&self) -> &'static str;

    /// Bring up the client stack. `ErrorCode::ALREADY` means it was already up.
    fn init(&self) -> Result<(), ErrorCode>;

    /// Tear down the client stack
    fn fini(&self) -> Result<(), ErrorCode>;

    /// Connect read/write to a pool through the given service ranks
    fn pool_connect(&self, pool: &Uuid, svc_ranks: &[u32]) -> Result<PoolHandle, ErrorCode>;

    fn pool_disconnect(&self, poh: PoolHandle) -> Result<(), ErrorCode>;

    /// Open a container read/write
    fn cont_open(&self, poh: PoolHandle, cont: &Uuid) -> Result<ContHandle, ErrorCode>;

    fn cont_close(&self, coh: ContHandle) -> Result<(), ErrorCode>;

    /// Mount the POSIX namespace stored in the container
    fn mount(&self, poh: PoolHandle, coh: ContHandle) -> Result<FsHandle, ErrorCode>;

    fn umount(&self, fs: FsHandle) -> Result<(), ErrorCode>;

    /// Open a file at the namespace root, creating it if requested
    fn open(&self, fs: FsHandle, name: &str, opts: &OpenOptions) -> Result<ObjHandle, ErrorCode>;

    /// Release an open file object
    fn release(&self, obj: ObjHandle) -> Result<(), ErrorCode>;

    fn stat(&self, fs: FsHandle, name: &str) -> Result<FileStat, ErrorCode>;

    fn remove(&self, fs: FsHandle, name: &str) -> Result<(), ErrorCode>;

    fn eq_create(&self) -> Result<EqHandle, ErrorCode>;

    /// Destroy a queue. Without `force`, unfinished events fail the call
    /// with `ErrorCode::BUSY`; with `force` they are discarded and their
    /// number returned.
    fn eq_destroy(&self, eq: EqHandle, force: bool) -> Result<usize, ErrorCode>;

    /// Non-blocking poll: move up to `max` finished operations into `out`
    /// and return how many were moved
    fn eq_poll(&self, eq: EqHandle, max: usize, out: &mut Vec<Completion>)
        -> Result<usize, ErrorCode>;

    /// Bind a fresh event to `eq`; `tag` is echoed back in its completion
    fn event_init(&self, eq: EqHandle, tag: u64) -> Result<Event, ErrorCode>;

    /// Release backend resources bound to a completed (or never launched) event
    fn event_fini(&self, event: Event) -> Result<(), ErrorCode>;

    /// Launch an asynchronous write of `sgl` at `offset`
    fn write(
        &self,
        fs: FsHandle,
        obj: ObjHandle,
        sgl: SgList,
        offset: u64,
        event: &Event,
    ) -> Result<(), Rejected>;

    /// Launch an asynchronous read into `sgl` from `offset`
    fn read(
        &self,
        fs: FsHandle,
        obj: ObjHandle,
        sgl: SgList,
        offset: u64,
        event: &Event,
    ) -> Result<(), Rejected>;
}
