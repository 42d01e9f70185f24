//! Serializable factory configuration.
//!
//! # Example
//!
//! ```ignore
//! let config = FactoryConfig::from_json(r#"{ "idle_timeout_ms": 5000 }"#)?;
//! let factory = ClientFactory::builder().config(config).build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::buffer_pool::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED};

// ============================================================================
// Constants
// ============================================================================

/// Default idle timeout applied when a client sets none.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// FactoryConfig
// ============================================================================

/// Factory settings. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Default idle timeout in milliseconds. Zero disables it.
    pub idle_timeout_ms: u64,
    /// Worker threads of the owned runtime. `None` uses tokio's default.
    /// Ignored when an external executor is supplied.
    pub worker_threads: Option<usize>,
    /// Idle buffers retained by the buffer pool.
    pub max_pooled_buffers: usize,
    /// Capacity of pooled buffers and the socket read size.
    pub buffer_size: usize,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            worker_threads: None,
            max_pooled_buffers: DEFAULT_MAX_POOLED,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl FactoryConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns the default idle timeout.
    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == Some(0) {
            return Err(Error::config("worker_threads must be at least 1"));
        }
        if self.buffer_size == 0 {
            return Err(Error::config("buffer_size must be greater than 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FactoryConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_millis(30_000));
        assert_eq!(config.worker_threads, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = FactoryConfig::from_json(r#"{"idle_timeout_ms": 500, "worker_threads": 2}"#)
            .unwrap();
        assert_eq!(config.idle_timeout_ms, 500);
        assert_eq!(config.worker_threads, Some(2));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = FactoryConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = FactoryConfig {
            worker_threads: Some(0),
            ..FactoryConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("worker_threads"));
    }

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(saturating_millis(Duration::from_micros(999)), 0);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
        assert_eq!(
            saturating_millis(Duration::from_millis(u64::MAX)),
            u64::MAX
        );
    }

    #[test]
    fn test_json_round_trip() {
        let config = FactoryConfig {
            idle_timeout_ms: 0,
            ..FactoryConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(FactoryConfig::from_json(&json).unwrap(), config);
    }
}
