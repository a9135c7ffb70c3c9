//! Utility modules

pub mod error;

pub use error::{BackendError, ConfigError, EngineError, ResourceError, Result};
