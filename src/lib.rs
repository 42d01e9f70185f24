//! SPDY client - connection and session lifecycle for SPDY/2 and SPDY/3.
//!
//! This library opens TCP connections, optionally secures them with TLS and
//! ALPN protocol negotiation, and delivers established sessions through
//! promises. A [`ClientFactory`] tracks every session it produced and
//! retires them all with GOAWAY when stopped.
//!
//! # Architecture
//!
//! - [`ClientFactory`] owns the executor, scheduler, selector, buffer pool
//!   and the set of open sessions
//! - [`Client`] is bound to one protocol version and its flow-control
//!   strategy
//! - [`Client::connect`] returns a [`SessionPromise`] without blocking
//! - Each channel is driven by its own task: connect, TLS handshake,
//!   negotiation, then the connection loop
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use spdy_client::{ClientFactory, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let factory = ClientFactory::builder()
//!         .executor(tokio::runtime::Handle::current())
//!         .build()?;
//!     factory.start()?;
//!
//!     let client = factory.new_client(3)?;
//!     let session = client.connect("127.0.0.1:8080".parse().unwrap(), Arc::new(()))?.await?;
//!     println!("Session {} window {}", session.id(), session.window_size());
//!
//!     factory.stop();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Factory, builder, client and promise |
//! | [`session`] | Established sessions and their listener |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Versions, flow control, frame codec, compression |
//! | [`transport`] | Sockets, TLS, selector and connection loop |

// ============================================================================
// Modules
// ============================================================================

/// Factory, builder, client and promise.
///
/// Use [`ClientFactory::builder()`] to create a configured factory.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for channels and sessions.
pub mod identifiers;

/// Protocol collaborators: versions, flow control, frame codec, compression.
pub mod protocol;

/// Established sessions.
pub mod session;

/// Socket transport layer.
///
/// Mostly internal; [`TlsContext`] is the entry point for secure factories.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    Client, ClientFactory, ClientFactoryBuilder, FactoryConfig, Security, SessionPromise,
};

// Session types
pub use session::{Session, SessionFrameListener};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelId, SessionId};

// Protocol types
pub use protocol::{FlowControlKind, FlowControlStrategy, Version, new_flow_control_strategy};

// Transport types
pub use transport::TlsContext;
