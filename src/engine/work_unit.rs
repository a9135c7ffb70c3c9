//! Work units issued by the harness

use std::fmt;

use crate::backend::ErrorCode;

/// Kind of request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
    /// Flush barrier; completes immediately with no backend call
    Sync,
    /// Not supported by the engine; completes inline with `INVAL`
    Trim,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
            Direction::Sync => write!(f, "sync"),
            Direction::Trim => write!(f, "trim"),
        }
    }
}

/// One harness request against the worker's open file.
///
/// The engine owns the unit (and its buffer) while it is in flight and
/// hands it back through `submit` or `harvest` once it has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Opaque identity chosen by the harness
    pub id: u64,
    pub direction: Direction,
    pub offset: u64,
    pub buf: Vec<u8>,
    /// Bytes to transfer from/into `buf`
    pub len: usize,
    /// Bytes still outstanding; cleared to 0 on success
    pub resid: usize,
    /// Bytes the backend reported as moved
    pub transferred: usize,
    /// Per-request failure reported by the backend
    pub error: Option<ErrorCode>,
}

impl WorkUnit {
    pub fn new(id: u64, direction: Direction, offset: u64, buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self {
            id,
            direction,
            offset,
            buf,
            len,
            resid: len,
            transferred: 0,
            error: None,
        }
    }

    pub fn write(id: u64, offset: u64, data: Vec<u8>) -> Self {
        Self::new(id, Direction::Write, offset, data)
    }

    /// Read `len` bytes into a zeroed buffer
    pub fn read(id: u64, offset: u64, len: usize) -> Self {
        Self::new(id, Direction::Read, offset, vec![0u8; len])
    }

    pub fn sync(id: u64) -> Self {
        Self::new(id, Direction::Sync, 0, Vec::new())
    }

    /// Re-target a recycled unit, keeping its buffer allocation
    pub fn reset(&mut self, direction: Direction, offset: u64, len: usize) {
        if self.buf.len() < len {
            self.buf.resize(len, 0);
        }
        self.direction = direction;
        self.offset = offset;
        self.len = len;
        self.resid = len;
        self.transferred = 0;
        self.error = None;
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Transferred bytes as a slice of the buffer
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len.min(self.buf.len())]
    }
}
