//! Client factory.
//!
//! The factory owns everything its clients share: the executor, the
//! timeout scheduler, the selector, the buffer pool, the TLS context and the
//! set of open sessions. Stopping it retires every session with GOAWAY and
//! tears down what `start()` created, in reverse order.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──► Starting ──► Running ──stop()──► Stopping ──► Stopped
//! ```
//!
//! Sessions are only added or removed while `Running`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::runtime::{Builder as RuntimeBuilder, Handle, Runtime};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{CompressionFactory, Version};
use crate::session::Session;
use crate::transport::buffer_pool::BufferPool;
use crate::transport::connection::ClientConnectionFactory;
use crate::transport::scheduler::Scheduler;
use crate::transport::selector::SelectorManager;
use crate::transport::tls::{NegotiationRegistry, TlsContext};

use super::builder::ClientFactoryBuilder;
use super::config::FactoryConfig;
use super::handle::Client;

// ============================================================================
// Security
// ============================================================================

/// Transport security, fixed when the factory is built.
#[derive(Debug, Clone)]
pub enum Security {
    /// Plain TCP.
    Plain,
    /// TLS with ALPN protocol negotiation.
    Tls(TlsContext),
}

impl Security {
    /// Returns `true` for TLS.
    #[inline]
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LifecycleState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// A sub-resource created by `start()`.
enum Component {
    Executor(Runtime),
    Scheduler(Arc<Scheduler>),
    Selector(Arc<SelectorManager>),
}

impl Component {
    fn name(&self) -> &'static str {
        match self {
            Self::Executor(_) => "executor",
            Self::Scheduler(_) => "scheduler",
            Self::Selector(_) => "selector",
        }
    }

    fn stop(self) {
        match self {
            Self::Executor(runtime) => runtime.shutdown_background(),
            Self::Scheduler(scheduler) => scheduler.stop(),
            Self::Selector(selector) => selector.stop(),
        }
    }
}

/// Components of a running factory, in start order.
struct Running {
    selector: Arc<SelectorManager>,
    components: Vec<Component>,
}

impl Running {
    fn stop(self) {
        for component in self.components.into_iter().rev() {
            debug!(component = component.name(), "Stopping component");
            component.stop();
        }
    }
}

// ============================================================================
// FactoryInner
// ============================================================================

/// State shared by the factory handle, its clients and its connections.
pub(crate) struct FactoryInner {
    config: FactoryConfig,
    executor: Option<Handle>,
    security: Security,
    compression: Arc<dyn CompressionFactory>,
    buffer_pool: Arc<BufferPool>,
    negotiation: NegotiationRegistry,
    state: AtomicU8,
    /// Serialises `start()` and `stop()`.
    lifecycle: Mutex<()>,
    running: RwLock<Option<Running>>,
    sessions: RwLock<FxHashMap<SessionId, Session>>,
}

impl FactoryInner {
    #[inline]
    fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    #[inline]
    pub(crate) fn idle_timeout(&self) -> Duration {
        self.config.idle_timeout()
    }

    #[inline]
    pub(crate) fn security(&self) -> &Security {
        &self.security
    }

    #[inline]
    pub(crate) fn negotiation(&self) -> &NegotiationRegistry {
        &self.negotiation
    }

    /// Returns the selector of a running factory.
    pub(crate) fn selector(&self) -> Result<Arc<SelectorManager>> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        self.running
            .read()
            .as_ref()
            .map(|running| Arc::clone(&running.selector))
            .ok_or(Error::NotRunning)
    }

    /// Tracks a new session. Refused unless running.
    pub(crate) fn session_opened(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write();
        if !self.is_running() {
            debug!(session_id = %session.id(), "Session refused, factory not running");
            return false;
        }
        sessions.insert(session.id(), session.clone());
        true
    }

    /// Stops tracking a session. A no-op unless running.
    pub(crate) fn session_closed(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write();
        if !self.is_running() {
            return false;
        }
        sessions.remove(&session.id()).is_some()
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        let _guard = self.lifecycle.lock();
        if self.is_running() {
            return Ok(());
        }

        self.set_state(LifecycleState::Starting);
        match self.start_components() {
            Ok(running) => {
                *self.running.write() = Some(running);
                self.set_state(LifecycleState::Running);
                info!(
                    tls = self.security.is_tls(),
                    idle_timeout_ms = self.config.idle_timeout_ms,
                    "ClientFactory started"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    fn start_components(self: &Arc<Self>) -> Result<Running> {
        let mut components = Vec::new();

        let handle = match &self.executor {
            Some(handle) => handle.clone(),
            None => {
                let mut builder = RuntimeBuilder::new_multi_thread();
                if let Some(threads) = self.config.worker_threads {
                    builder.worker_threads(threads);
                }
                let runtime = builder.thread_name("spdy-client").enable_all().build()?;
                let handle = runtime.handle().clone();
                components.push(Component::Executor(runtime));
                handle
            }
        };

        let scheduler = Arc::new(Scheduler::new(handle.clone()));
        components.push(Component::Scheduler(Arc::clone(&scheduler)));

        let connector = ClientConnectionFactory::new(
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.compression),
        );
        let selector = SelectorManager::start(handle, scheduler, Arc::downgrade(self), connector);
        components.push(Component::Selector(Arc::clone(&selector)));

        Ok(Running {
            selector,
            components,
        })
    }

    fn stop(&self) {
        let _guard = self.lifecycle.lock();
        if !self.is_running() {
            return;
        }

        self.set_state(LifecycleState::Stopping);

        let retired = {
            let mut sessions = self.sessions.write();
            for session in sessions.values() {
                session.go_away();
            }
            let count = sessions.len();
            sessions.clear();
            count
        };

        let running = self.running.write().take();
        if let Some(running) = running {
            running.stop();
        }

        self.set_state(LifecycleState::Stopped);
        info!(sessions = retired, "ClientFactory stopped");
    }
}

impl Drop for FactoryInner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.stop();
        }
    }
}

// ============================================================================
// ClientFactory
// ============================================================================

/// Creates clients and tracks the sessions they open.
///
/// Cloning shares the same factory.
///
/// # Example
///
/// ```ignore
/// let factory = ClientFactory::builder().build()?;
/// factory.start()?;
///
/// let client = factory.new_client(3)?;
/// let session = client.connect(addr, Arc::new(()))?.await?;
///
/// factory.stop();
/// ```
#[derive(Clone)]
pub struct ClientFactory {
    inner: Arc<FactoryInner>,
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("state", &self.inner.state())
            .field("security", &self.inner.security)
            .field("sessions", &self.session_count())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ============================================================================
// ClientFactory - Constructor
// ============================================================================

impl ClientFactory {
    /// Creates a builder for configuring the factory.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientFactoryBuilder {
        ClientFactoryBuilder::new()
    }

    pub(crate) fn new(
        config: FactoryConfig,
        executor: Option<Handle>,
        security: Security,
        compression: Arc<dyn CompressionFactory>,
    ) -> Self {
        let buffer_pool = Arc::new(BufferPool::new(config.buffer_size, config.max_pooled_buffers));
        Self {
            inner: Arc::new(FactoryInner {
                config,
                executor,
                security,
                compression,
                buffer_pool,
                negotiation: NegotiationRegistry::new(),
                state: AtomicU8::new(LifecycleState::Stopped as u8),
                lifecycle: Mutex::new(()),
                running: RwLock::new(None),
                sessions: RwLock::new(FxHashMap::default()),
            }),
        }
    }
}

// ============================================================================
// ClientFactory - Lifecycle
// ============================================================================

impl ClientFactory {
    /// Starts the executor (unless external), scheduler and selector.
    ///
    /// A no-op while running. After `stop()`, starts fresh components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the owned runtime cannot be created.
    pub fn start(&self) -> Result<()> {
        self.inner.start()
    }

    /// Sends GOAWAY on every session, forgets them and stops the components
    /// started by `start()`, in reverse order.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Returns `true` while running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

// ============================================================================
// ClientFactory - Clients & Sessions
// ============================================================================

impl ClientFactory {
    /// Creates a client for protocol `version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`] for anything but 2 or 3.
    pub fn new_client(&self, version: u16) -> Result<Client> {
        let version = Version::try_from(version)?;
        let tls_config = match &self.inner.security {
            Security::Tls(context) => Some(context.client_config(version)),
            Security::Plain => None,
        };
        Ok(Client::new(Arc::clone(&self.inner), version, tls_config))
    }

    /// Returns a snapshot of the open sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.read().values().cloned().collect()
    }

    /// Returns the number of open sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Returns the default idle timeout.
    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout()
    }

    /// Returns the transport security.
    #[inline]
    #[must_use]
    pub fn security(&self) -> &Security {
        &self.inner.security
    }

    /// Returns the shared buffer pool.
    #[inline]
    #[must_use]
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.inner.buffer_pool
    }

    /// Returns the number of channels awaiting protocol negotiation.
    #[inline]
    #[must_use]
    pub fn pending_negotiations(&self) -> usize {
        self.inner.negotiation.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
