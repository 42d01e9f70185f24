//! Socket transport layer.
//!
//! This module carries a connect from a fresh socket to a running protocol
//! connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  register  ┌─────────────────┐  spawn   ┌──────────────────┐
//! │ Client       │ ─────────► │ SelectorManager │ ───────► │ channel task     │
//! │ ::connect    │            │   (loop task)   │          │ connect          │
//! └──────────────┘            └─────────────────┘          │ → EndPoint       │
//!                                                          │ → [TLS + ALPN]   │
//!                                                          │ → SpdyConnection │
//!                                                          └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `buffer_pool` | Shared byte buffers |
//! | `scheduler` | Delayed tasks (idle timeouts) |
//! | `channel` | Closeable socket handle |
//! | `endpoint` | Connected socket with idle watchdog |
//! | `tls` | rustls record layer and negotiation registry |
//! | `selector` | Connect event loop |
//! | `connection` | Session construction and connection loop |

// ============================================================================
// Submodules
// ============================================================================

/// Shared byte-buffer pool.
pub mod buffer_pool;

/// Closeable socket handle.
pub mod channel;

/// Session construction and connection event loop.
pub mod connection;

/// Connected endpoint and idle timeout.
pub mod endpoint;

/// Delayed-task scheduler.
pub mod scheduler;

/// Connect event loop.
pub mod selector;

/// TLS context, record layer and negotiation registry.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use buffer_pool::BufferPool;
pub use channel::Channel;
pub use connection::{ClientConnectionFactory, SpdyConnection};
pub use endpoint::{EndPoint, IdleTimeout};
pub use scheduler::{ScheduledTask, Scheduler};
pub use selector::SelectorManager;
pub use tls::{NegotiationHandler, NegotiationRegistry, TlsContext, TlsStream};
