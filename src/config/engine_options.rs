//! Engine options: where the shared session connects
//!
//! Identifiers arrive as strings from the job description and are only
//! resolved (and validated) once, when the first worker acquires the session.

use std::fmt;

use uuid::Uuid;

use crate::utils::ConfigError;

/// Default object chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1_048_576;

/// Target identifiers and object hints for the backend session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Pool uuid
    pub pool: Option<String>,
    /// Container uuid
    pub cont: Option<String>,
    /// Pool service replica ranks, colon-delimited ("0:1:2")
    pub svcl: Option<String>,
    /// Object chunk size in bytes (0 = backend default)
    pub chunk_size: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pool: None,
            cont: None,
            svcl: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Identifiers after parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub pool: Uuid,
    pub cont: Uuid,
    pub svc_ranks: Vec<u32>,
}

impl EngineOptions {
    pub fn new(pool: &str, cont: &str, svcl: &str) -> Self {
        Self {
            pool: Some(pool.to_string()),
            cont: Some(cont.to_string()),
            svcl: Some(svcl.to_string()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Check presence of every required identifier, then parse them
    pub fn resolve(&self) -> Result<ResolvedTarget, ConfigError> {
        let pool = required(&self.pool, "pool")?;
        let cont = required(&self.cont, "container")?;
        let svcl = required(&self.svcl, "svcl")?;

        Ok(ResolvedTarget {
            pool: parse_uuid(pool, "pool")?,
            cont: parse_uuid(cont, "container")?,
            svc_ranks: parse_rank_list(svcl)?,
        })
    }
}

impl fmt::Display for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool_id={}, container_id={}, svcl={}, chunk_size={}",
            self.pool.as_deref().unwrap_or("-"),
            self.cont.as_deref().unwrap_or("-"),
            self.svcl.as_deref().unwrap_or("-"),
            self.chunk_size
        )
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_uuid(value: &str, field: &'static str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(value).map_err(|_| ConfigError::InvalidUuid {
        field,
        value: value.to_string(),
    })
}

/// Parse a colon-delimited rank list
pub fn parse_rank_list(value: &str) -> Result<Vec<u32>, ConfigError> {
    value
        .split(':')
        .map(|r| {
            r.trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidServiceList(value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = "6d3c2f8e-2b1f-4c55-9a47-5d2e9c0b1a01";
    const CONT: &str = "a1b2c3d4-0000-4000-8000-000000000002";

    #[test]
    fn test_resolve() {
        let target = EngineOptions::new(POOL, CONT, "0:1:2").resolve().unwrap();
        assert_eq!(target.pool, Uuid::parse_str(POOL).unwrap());
        assert_eq!(target.svc_ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_identifiers() {
        let opts = EngineOptions::new("", CONT, "0");
        assert_eq!(opts.resolve(), Err(ConfigError::Missing("pool")));

        let opts = EngineOptions {
            svcl: None,
            ..EngineOptions::new(POOL, CONT, "0")
        };
        assert_eq!(opts.resolve(), Err(ConfigError::Missing("svcl")));
    }

    #[test]
    fn test_malformed_identifiers() {
        let opts = EngineOptions::new("not-a-uuid", CONT, "0");
        assert!(matches!(
            opts.resolve(),
            Err(ConfigError::InvalidUuid { field: "pool", .. })
        ));

        for bad in ["", "0::1", "0:x", "1:-2"] {
            assert!(parse_rank_list(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_default_chunk_size() {
        assert_eq!(EngineOptions::default().chunk_size, 1_048_576);
        assert!(EngineOptions::default()
            .to_string()
            .contains("chunk_size=1048576"));
    }
}
