//! Error types for the SPDY client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use spdy_client::{Result, Error};
//!
//! async fn example(client: &Client, addr: SocketAddr) -> Result<()> {
//!     let session = client.connect(addr, Arc::new(()))?.await?;
//!     session.go_away();
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | State | [`Error::NotRunning`] |
//! | Configuration | [`Error::Config`], [`Error::UnsupportedVersion`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Negotiation | [`Error::Negotiation`], [`Error::Tls`] |
//! | Protocol | [`Error::Protocol`] |
//! | Promise | [`Error::Cancelled`], [`Error::ConnectFailed`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::sync::Arc;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // State Errors
    // ========================================================================
    /// The client factory is not running.
    ///
    /// Returned by `connect` before `start()` or after `stop()`, and used to
    /// fail connects still in flight when the factory stops.
    #[error("ClientFactory is not started")]
    NotRunning,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when factory or client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Protocol version without a flow-control strategy.
    #[error("Unsupported protocol version: {version}")]
    UnsupportedVersion {
        /// The rejected version number.
        version: u16,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out waiting for a session.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Channel closed before or during session construction.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Negotiation Errors
    // ========================================================================
    /// Application protocol negotiation did not select a protocol.
    #[error("Protocol negotiation failed: {message}")]
    Negotiation {
        /// Description of the negotiation failure.
        message: String,
    },

    /// TLS record-layer or handshake error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed frame or codec failure.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Promise Errors
    // ========================================================================
    /// The connect promise was cancelled.
    #[error("Connect cancelled")]
    Cancelled,

    /// The connect promise failed.
    ///
    /// The underlying failure is shared between every observer of the promise.
    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] Arc<Error>),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unsupported version error.
    #[inline]
    pub fn unsupported_version(version: u16) -> Self {
        Self::UnsupportedVersion { version }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a negotiation error.
    #[inline]
    pub fn negotiation(message: impl Into<String>) -> Self {
        Self::Negotiation {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a lifecycle state error.
    ///
    /// Looks through [`Error::ConnectFailed`].
    #[inline]
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        match self {
            Self::NotRunning => true,
            Self::ConnectFailed(inner) => inner.is_state_error(),
            _ => false,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionTimeout { .. } => true,
            Self::ConnectFailed(inner) => inner.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::ConnectionTimeout { .. }
            | Self::ConnectionClosed
            | Self::Io(_) => true,
            Self::ConnectFailed(inner) => inner.is_connection_error(),
            _ => false,
        }
    }

    /// Returns `true` if the promise was cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ============================================================================
// Tests
// ============================================================================
