//! Backend status codes
//!
//! Backend calls report a signed status: negative is failure, zero or
//! positive is success (a byte count for transfers). `ErrorCode` carries
//! the failing half so callers never overload one integer for both.

use std::fmt;

/// Negative backend status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    pub const NO_PERM: ErrorCode = ErrorCode(-1001);
    pub const NO_HDL: ErrorCode = ErrorCode(-1002);
    pub const INVAL: ErrorCode = ErrorCode(-1003);
    pub const EXIST: ErrorCode = ErrorCode(-1004);
    pub const NONEXIST: ErrorCode = ErrorCode(-1005);
    pub const UNREACH: ErrorCode = ErrorCode(-1006);
    pub const ALREADY: ErrorCode = ErrorCode(-1008);
    pub const NOMEM: ErrorCode = ErrorCode(-1009);
    pub const BUSY: ErrorCode = ErrorCode(-1012);
    pub const UNINIT: ErrorCode = ErrorCode(-1015);
    pub const IO: ErrorCode = ErrorCode(-2001);

    /// Build from a raw code; positive values are negated
    pub fn new(rc: i32) -> Self {
        if rc > 0 {
            ErrorCode(rc.saturating_neg())
        } else {
            ErrorCode(rc)
        }
    }

    /// Raw (negative) status value
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Split a raw signed status into success count or failure code
    pub fn check(rc: i64) -> Result<u64, ErrorCode> {
        if rc < 0 {
            Err(ErrorCode(i32::try_from(rc).unwrap_or(i32::MIN)))
        } else {
            Ok(rc as u64)
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NO_PERM => "no permission",
            Self::NO_HDL => "invalid handle",
            Self::INVAL => "invalid parameters",
            Self::EXIST => "entity already exists",
            Self::NONEXIST => "entity does not exist",
            Self::UNREACH => "unreachable node",
            Self::ALREADY => "operation already done",
            Self::NOMEM => "out of memory",
            Self::BUSY => "device or resource busy",
            Self::UNINIT => "stack not initialized",
            Self::IO => "I/O error",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.description())
    }
}

/// Result of one asynchronous transfer: bytes moved or the failure code
pub type IoOutcome = Result<usize, ErrorCode>;
