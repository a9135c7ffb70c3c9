//! Handles and descriptors exchanged across the backend boundary

use super::status::IoOutcome;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

opaque_handle!(
    /// Connected pool
    PoolHandle
);
opaque_handle!(
    /// Open container
    ContHandle
);
opaque_handle!(
    /// Mounted namespace
    FsHandle
);
opaque_handle!(
    /// Event completion queue
    EqHandle
);
opaque_handle!(
    /// Open file object
    ObjHandle
);

/// Completion event bound to one queue for one outstanding operation.
///
/// `tag` is chosen by the caller at `event_init` and comes back unchanged
/// in the matching [`Completion`], which is how completions are routed to
/// their request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub id: u64,
    pub eq: EqHandle,
    pub tag: u64,
}

/// One I/O segment; `len` bytes of `buf` take part in the transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoVec {
    pub buf: Vec<u8>,
    pub len: usize,
}

/// Scatter/gather list handed to the backend for the life of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgList {
    pub segments: Vec<IoVec>,
    /// Segments actually touched, filled in by the backend
    pub nr_out: usize,
}

impl SgList {
    /// Wrap one buffer; `len` is clamped to the buffer size
    pub fn single(buf: Vec<u8>, len: usize) -> Self {
        let len = len.min(buf.len());
        Self {
            segments: vec![IoVec { buf, len }],
            nr_out: 0,
        }
    }

    /// Total bytes covered by the list
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.len).sum()
    }

    /// Take the first segment's buffer back out
    pub fn into_buffer(mut self) -> Vec<u8> {
        if self.segments.is_empty() {
            Vec::new()
        } else {
            self.segments.swap_remove(0).buf
        }
    }
}

/// Finished asynchronous operation as reported by `eq_poll`
#[derive(Debug)]
pub struct Completion {
    pub event: Event,
    pub outcome: IoOutcome,
    /// Buffers handed over at dispatch, returned to the caller
    pub sgl: Option<SgList>,
}

/// A dispatch the backend refused before queuing; the buffers come back
#[derive(Debug)]
pub struct Rejected {
    pub code: super::ErrorCode,
    pub sgl: SgList,
}

/// Object placement class hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectClass(pub u32);

impl ObjectClass {
    /// Striped across all targets, single replica
    pub const SX: ObjectClass = ObjectClass(214);
    /// Single replica pinned to a caller-chosen rank
    pub const R1S_SPEC_RANK: ObjectClass = ObjectClass(240);

    const RANK_SHIFT: u32 = 20;

    /// Pin a worker's objects to a rank derived from its index, so workers
    /// sharing one container spread over different targets
    pub fn spec_rank(worker_index: usize) -> Self {
        let rank = (worker_index as u32) & ((1 << (32 - Self::RANK_SHIFT)) - 1);
        ObjectClass(Self::R1S_SPEC_RANK.0 | (rank << Self::RANK_SHIFT))
    }

    /// Rank encoded by [`ObjectClass::spec_rank`]
    pub fn rank(self) -> u32 {
        self.0 >> Self::RANK_SHIFT
    }
}

/// Regular file, rwx for everyone
pub const DEFAULT_FILE_MODE: u32 = 0o100777;

/// Parameters for opening (and creating) a file object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub mode: u32,
    pub create: bool,
    pub read_write: bool,
    pub class: ObjectClass,
    /// Chunk size in bytes; 0 selects the backend default
    pub chunk_size: u64,
}

impl OpenOptions {
    pub fn create_rw(class: ObjectClass, chunk_size: u64) -> Self {
        Self {
            mode: DEFAULT_FILE_MODE,
            create: true,
            read_write: true,
            class,
            chunk_size,
        }
    }
}

/// Attributes returned by `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub chunk_size: u64,
}
