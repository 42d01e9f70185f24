//! Client handle.
//!
//! A [`Client`] is bound to one protocol version and one factory. It holds
//! the per-client connect settings and opens connections.
//!
//! # Example
//!
//! ```ignore
//! let client = factory.new_client(3)?;
//! client.set_idle_timeout(Some(Duration::from_secs(10)));
//!
//! let session = client.connect(addr, Arc::new(()))?.await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::RwLock;
use rustls::ClientConfig;
use tokio::net::TcpSocket;
use tracing::debug;

use crate::client::factory::FactoryInner;
use crate::client::promise::SessionPromise;
use crate::error::Result;
use crate::protocol::{FlowControlStrategy, Version, new_flow_control_strategy};
use crate::session::{DEFAULT_INITIAL_WINDOW_SIZE, SessionFrameListener};
use crate::transport::channel::Channel;
use crate::transport::tls::NegotiationHandler;

// ============================================================================
// Client
// ============================================================================

/// Per-version connection handle created by `ClientFactory::new_client`.
///
/// Cloning shares the same settings.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    version: Version,
    flow_control: &'static dyn FlowControlStrategy,
    factory: Arc<FactoryInner>,
    /// ALPN-specialised TLS configuration, when the factory uses TLS.
    tls_config: Option<Arc<ClientConfig>>,
    bind_address: RwLock<Option<SocketAddr>>,
    idle_timeout: RwLock<Option<Duration>>,
    initial_window_size: AtomicI32,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("version", &self.inner.version)
            .field("flow_control", &self.inner.flow_control.kind())
            .field("bind_address", &self.bind_address())
            .field("idle_timeout", &self.idle_timeout())
            .field("initial_window_size", &self.initial_window_size())
            .finish()
    }
}

// ============================================================================
// Client - Constructor
// ============================================================================

impl Client {
    pub(crate) fn new(
        factory: Arc<FactoryInner>,
        version: Version,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                version,
                flow_control: new_flow_control_strategy(version),
                factory,
                tls_config,
                bind_address: RwLock::new(None),
                idle_timeout: RwLock::new(None),
                initial_window_size: AtomicI32::new(DEFAULT_INITIAL_WINDOW_SIZE),
            }),
        }
    }
}

// ============================================================================
// Client - Settings
// ============================================================================

impl Client {
    /// Returns the protocol version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// Returns the flow-control strategy for this client's version.
    #[inline]
    #[must_use]
    pub fn flow_control_strategy(&self) -> &'static dyn FlowControlStrategy {
        self.inner.flow_control
    }

    /// Returns the local address sockets bind to, if any.
    #[must_use]
    pub fn bind_address(&self) -> Option<SocketAddr> {
        *self.inner.bind_address.read()
    }

    /// Sets the local address for subsequent connects.
    pub fn set_bind_address(&self, address: Option<SocketAddr>) {
        *self.inner.bind_address.write() = address;
    }

    /// Returns the idle timeout override. `None` means the factory default.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        *self.inner.idle_timeout.read()
    }

    /// Overrides the idle timeout for subsequent connects.
    ///
    /// `None` restores the factory default; zero disables the timeout.
    pub fn set_idle_timeout(&self, timeout: Option<Duration>) {
        *self.inner.idle_timeout.write() = timeout;
    }

    /// Returns the initial window size for new sessions.
    #[inline]
    #[must_use]
    pub fn initial_window_size(&self) -> i32 {
        self.inner.initial_window_size.load(Ordering::Acquire)
    }

    /// Sets the initial window size for subsequent sessions.
    pub fn set_initial_window_size(&self, size: i32) {
        self.inner.initial_window_size.store(size, Ordering::Release);
    }

    /// Picks this client's protocol if the server offers it.
    #[must_use]
    pub fn select_protocol(&self, server_protocols: &[String]) -> Option<String> {
        let ours = self.inner.version.protocol();
        server_protocols
            .iter()
            .any(|p| p == ours)
            .then(|| ours.to_string())
    }

    /// Returns the TLS configuration advertising this client's protocol.
    pub(crate) fn tls_config(&self) -> Option<&Arc<ClientConfig>> {
        self.inner.tls_config.as_ref()
    }
}

impl NegotiationHandler for Client {
    fn select_protocol(&self, server_protocols: &[String]) -> Option<String> {
        Client::select_protocol(self, server_protocols)
    }
}

// ============================================================================
// Client - Connect
// ============================================================================

impl Client {
    /// Starts connecting to `address`.
    ///
    /// Returns immediately with a promise that completes once the session is
    /// established. `listener` receives the session's events.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`](crate::Error::NotRunning) if the factory is
    ///   not running; no socket is opened
    /// - [`Error::Io`](crate::Error::Io) if the socket cannot be created or
    ///   bound
    pub fn connect(
        &self,
        address: SocketAddr,
        listener: Arc<dyn SessionFrameListener>,
    ) -> Result<SessionPromise> {
        let selector = self.inner.factory.selector()?;

        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(bind) = self.bind_address() {
            socket.bind(bind)?;
        }
        socket.set_nodelay(true)?;

        let channel = Channel::new(address);
        let promise = SessionPromise::new(channel.clone(), self.clone(), listener);
        let connect = socket.connect(address).boxed();

        if let Err(e) = selector.connect(channel.clone(), connect, promise.clone()) {
            channel.close();
            return Err(e);
        }

        debug!(channel = %channel.id(), ?address, version = %self.inner.version, "Connect started");
        Ok(promise)
    }
}

// ============================================================================
// Tests
// ============================================================================
