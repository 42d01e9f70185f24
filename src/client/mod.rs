//! Client-facing API.
//!
//! A [`ClientFactory`] is configured through [`ClientFactoryBuilder`],
//! started, and then hands out one [`Client`] per protocol version. Each
//! `connect` returns a [`SessionPromise`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `factory` | Lifecycle and session registry |
//! | `builder` | Fluent factory configuration |
//! | `config` | Serializable settings |
//! | `handle` | Per-version client |
//! | `promise` | Pending connect result |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent factory configuration.
pub mod builder;

/// Serializable factory settings.
pub mod config;

/// Factory lifecycle and session registry.
pub mod factory;

/// Per-version client handle.
pub mod handle;

/// Pending connect result.
pub mod promise;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientFactoryBuilder;
pub use config::{DEFAULT_IDLE_TIMEOUT_MS, FactoryConfig};
pub use factory::{ClientFactory, Security};
pub use handle::Client;
pub use promise::SessionPromise;
