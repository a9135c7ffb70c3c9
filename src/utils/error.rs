//! Error types for dfs-bench

use std::io;
use thiserror::Error;

use crate::backend::ErrorCode;

/// Top-level engine error
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// The completion-queue poll itself failed; in-flight state is undefined
    #[error("Event poll failed: {0}")]
    Poll(ErrorCode),

    #[error("Worker {0} has no open file")]
    NoOpenFile(usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Worker error: {0}")]
    Worker(String),
}

/// Missing or malformed configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required option: {0}")]
    Missing(&'static str),

    #[error("Failed to parse {field} uuid: {value}")]
    InvalidUuid { field: &'static str, value: String },

    #[error("Failed to parse service rank list: {0}")]
    InvalidServiceList(String),

    #[error("Queue depth must be at least 1")]
    ZeroQueueDepth,

    #[error("{0}")]
    Invalid(String),
}

/// A backend lifecycle or namespace call failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{op} failed: {code}")]
    Call { op: &'static str, code: ErrorCode },

    #[error("{op}({name}) failed: {code}")]
    Object {
        op: &'static str,
        name: String,
        code: ErrorCode,
    },
}

impl BackendError {
    pub fn call(op: &'static str, code: ErrorCode) -> Self {
        BackendError::Call { op, code }
    }

    pub fn object(op: &'static str, name: &str, code: ErrorCode) -> Self {
        BackendError::Object {
            op,
            name: name.to_string(),
            code,
        }
    }

    /// Status code reported by the backend
    pub fn code(&self) -> ErrorCode {
        match self {
            BackendError::Call { code, .. } | BackendError::Object { code, .. } => *code,
        }
    }
}

/// Local allocation failures during worker init
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Failed to allocate request slot pool of depth {depth}")]
    SlotPool { depth: usize },

    #[error("Failed to create event queue: {0}")]
    EventQueue(ErrorCode),
}

pub type Result<T> = std::result::Result<T, EngineError>;
