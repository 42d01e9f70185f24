//! Builder pattern for factory configuration.
//!
//! Provides a fluent API for configuring and creating [`ClientFactory`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use spdy_client::ClientFactory;
//!
//! # fn example() -> spdy_client::Result<()> {
//! let factory = ClientFactory::builder()
//!     .idle_timeout(Duration::from_secs(10))
//!     .worker_threads(2)
//!     .build()?;
//! factory.start()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{Error, Result};
use crate::protocol::{CompressionFactory, IdentityCompressionFactory};
use crate::transport::tls::TlsContext;

use super::config::{FactoryConfig, saturating_millis};
use super::factory::{ClientFactory, Security};

// ============================================================================
// ClientFactoryBuilder
// ============================================================================

/// Builder for configuring a [`ClientFactory`] instance.
///
/// Use [`ClientFactory::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ClientFactoryBuilder {
    /// External executor; an owned runtime is created when absent.
    executor: Option<Handle>,
    /// TLS configuration; plain TCP when absent.
    tls: Option<TlsContext>,
    /// Header-block compression.
    compression: Option<Arc<dyn CompressionFactory>>,
    /// Serializable settings.
    config: FactoryConfig,
}

// ============================================================================
// ClientFactoryBuilder Implementation
// ============================================================================

impl ClientFactoryBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the factory's tasks on an existing runtime.
    #[inline]
    #[must_use]
    pub fn executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }

    /// Secures every connection with TLS.
    #[inline]
    #[must_use]
    pub fn tls(mut self, context: TlsContext) -> Self {
        self.tls = Some(context);
        self
    }

    /// Sets the default idle timeout. Zero disables it.
    #[inline]
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_ms = saturating_millis(timeout);
        self
    }

    /// Sets the worker thread count of the owned runtime.
    #[inline]
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = Some(threads);
        self
    }

    /// Replaces the header-block compression factory.
    #[inline]
    #[must_use]
    pub fn compression_factory(mut self, factory: Arc<dyn CompressionFactory>) -> Self {
        self.compression = Some(factory);
        self
    }

    /// Replaces all serializable settings.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: FactoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the factory with validation. The factory is not started.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a setting is out of range
    pub fn build(self) -> Result<ClientFactory> {
        self.validate()?;

        let security = match self.tls {
            Some(context) => Security::Tls(context),
            None => Security::Plain,
        };
        let compression = self
            .compression
            .unwrap_or_else(|| Arc::new(IdentityCompressionFactory));

        Ok(ClientFactory::new(
            self.config,
            self.executor,
            security,
            compression,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientFactoryBuilder {
    fn validate(&self) -> Result<()> {
        self.config.validate()?;

        if self.executor.is_some() && self.config.worker_threads.is_some() {
            return Err(Error::config(
                "worker_threads only applies to the owned runtime.\n\
                 Remove .worker_threads() when supplying .executor()",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
