//! Selector manager.
//!
//! Receives connect registrations on a single loop task and hands each
//! channel to its own executor task. That task waits for the connect,
//! builds the endpoint, runs the TLS handshake and negotiation when the
//! factory is secure, constructs the session and then drives the
//! connection until it closes.
//!
//! # Channel lifecycle
//!
//! ```text
//! register ─► pending ─► connected ─► [TLS + negotiation] ─► opened ─► closed
//!                │            │                  │
//!                └────────────┴──────────────────┴──► promise failed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::factory::{FactoryInner, Security};
use crate::client::promise::SessionPromise;
use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::session::Session;
use crate::transport::channel::Channel;
use crate::transport::connection::{ClientConnectionFactory, SpdyConnection};
use crate::transport::endpoint::EndPoint;
use crate::transport::scheduler::Scheduler;
use crate::transport::tls::TlsContext;

// ============================================================================
// Types
// ============================================================================

/// Pending socket connect.
pub(crate) type ConnectFuture = BoxFuture<'static, io::Result<TcpStream>>;

/// Commands for the selector loop.
enum SelectorCommand {
    /// A channel to watch for connect readiness.
    Connect {
        channel: Channel,
        connect: ConnectFuture,
        promise: SessionPromise,
    },
    /// Stop accepting registrations.
    Shutdown,
}

// ============================================================================
// SelectorManager
// ============================================================================

/// Connect event loop for one factory.
pub struct SelectorManager {
    /// Executor running per-channel tasks.
    handle: Handle,
    /// Idle-timeout scheduler.
    scheduler: Arc<Scheduler>,
    /// Owning factory.
    factory: Weak<FactoryInner>,
    /// Session construction.
    connector: ClientConnectionFactory,
    /// Registration queue into the loop.
    commands: mpsc::UnboundedSender<SelectorCommand>,
    /// Every channel not yet closed.
    channels: Mutex<FxHashMap<ChannelId, Channel>>,
    /// Promises still waiting for a session.
    pending: Mutex<FxHashMap<ChannelId, SessionPromise>>,
    /// Channels with a protocol connection running.
    opened: Mutex<FxHashSet<ChannelId>>,
    /// Cleared on stop.
    running: AtomicBool,
    /// Serializes registration against stop.
    registration: Mutex<()>,
    /// Runs inside a registration, after the running check.
    #[cfg(test)]
    registration_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl fmt::Debug for SelectorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorManager")
            .field("channels", &self.channel_count())
            .field("pending", &self.pending_count())
            .field("opened", &self.opened_count())
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================================================
// SelectorManager - Lifecycle
// ============================================================================

impl SelectorManager {
    /// Creates the selector and spawns its loop on `handle`.
    pub(crate) fn start(
        handle: Handle,
        scheduler: Arc<Scheduler>,
        factory: Weak<FactoryInner>,
        connector: ClientConnectionFactory,
    ) -> Arc<Self> {
        let (commands, rx) = mpsc::unbounded_channel();

        let selector = Arc::new(Self {
            handle: handle.clone(),
            scheduler,
            factory,
            connector,
            commands,
            channels: Mutex::new(FxHashMap::default()),
            pending: Mutex::new(FxHashMap::default()),
            opened: Mutex::new(FxHashSet::default()),
            running: AtomicBool::new(true),
            registration: Mutex::new(()),
            #[cfg(test)]
            registration_hook: Mutex::new(None),
        });

        handle.spawn(Arc::clone(&selector).run(rx));
        debug!("Selector started");
        selector
    }

    /// Returns `true` until stopped.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the loop, fails every pending promise and closes every channel.
    ///
    /// Waits for a registration in progress, so every connect accepted
    /// before the stop is drained here.
    pub fn stop(&self) {
        let (pending, channels) = {
            let _registration = self.registration.lock();
            if !self.running.swap(false, Ordering::AcqRel) {
                return;
            }
            let _ = self.commands.send(SelectorCommand::Shutdown);

            let pending: Vec<_> = self.pending.lock().drain().collect();
            let channels: Vec<_> = self.channels.lock().drain().collect();
            self.opened.lock().clear();
            (pending, channels)
        };

        let failed = pending.len();
        for (_, promise) in pending {
            promise.failed(Error::NotRunning);
        }

        let closed = channels.len();
        for (_, channel) in channels {
            channel.close();
        }

        debug!(closed, failed, "Selector stopped");
    }

    /// Returns the number of tracked channels.
    #[inline]
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Returns the number of connects still waiting for a session.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the number of channels with a running protocol connection.
    #[inline]
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.opened.lock().len()
    }
}

// ============================================================================
// SelectorManager - Registration
// ============================================================================

impl SelectorManager {
    /// Registers a connecting channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] if the selector has stopped.
    pub(crate) fn connect(
        &self,
        channel: Channel,
        connect: ConnectFuture,
        promise: SessionPromise,
    ) -> Result<()> {
        let _registration = self.registration.lock();
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        #[cfg(test)]
        self.run_registration_hook();

        let id = channel.id();
        self.channels.lock().insert(id, channel.clone());
        self.pending.lock().insert(id, promise.clone());

        let command = SelectorCommand::Connect {
            channel,
            connect,
            promise,
        };
        if self.commands.send(command).is_err() {
            self.forget(id);
            return Err(Error::NotRunning);
        }
        Ok(())
    }

    /// Records that `channel` now carries a protocol connection.
    fn connection_opened(&self, channel: ChannelId) {
        self.pending.lock().remove(&channel);
        self.opened.lock().insert(channel);
    }

    #[cfg(test)]
    fn run_registration_hook(&self) {
        let hook = self.registration_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn forget(&self, channel: ChannelId) {
        self.channels.lock().remove(&channel);
        self.pending.lock().remove(&channel);
        self.opened.lock().remove(&channel);
    }
}

// ============================================================================
// SelectorManager - Event Loop
// ============================================================================

impl SelectorManager {
    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<SelectorCommand>) {
        debug!("Selector loop started");

        while let Some(command) = commands.recv().await {
            match command {
                SelectorCommand::Connect {
                    channel,
                    connect,
                    promise,
                } => {
                    let selector = Arc::clone(&self);
                    self.handle.spawn(async move {
                        selector.handle_channel(channel, connect, promise).await;
                    });
                }

                SelectorCommand::Shutdown => {
                    debug!("Shutdown command received");
                    break;
                }
            }
        }

        debug!("Selector loop terminated");
    }

    /// Drives one channel from connect to close.
    async fn handle_channel(&self, channel: Channel, connect: ConnectFuture, promise: SessionPromise) {
        let id = channel.id();
        let peer = channel.peer_addr();

        let connected = tokio::select! {
            result = connect => result,
            () = channel.closed() => {
                debug!(channel = %id, "Channel closed while connecting");
                promise.failed(Error::ConnectionClosed);
                self.forget(id);
                return;
            }
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                debug!(channel = %id, ?peer, error = %e, "Connect failed");
                promise.failed(Error::Io(e));
                channel.close();
                self.forget(id);
                return;
            }
        };

        debug!(channel = %id, ?peer, "Connected");

        if let Err(e) = self.connection_ready(&channel, stream, &promise).await {
            if e.is_cancelled() || promise.is_cancelled() {
                debug!(channel = %id, "Connect cancelled during construction");
            } else {
                warn!(channel = %id, ?peer, error = %e, "Connection handling failed");
            }
            promise.failed(e);
        }

        channel.close();
        if let Some(factory) = self.factory.upgrade() {
            factory.negotiation().remove(id);
        }
        self.forget(id);
    }

    /// Builds the endpoint and session, then runs the connection.
    async fn connection_ready(
        &self,
        channel: &Channel,
        stream: TcpStream,
        promise: &SessionPromise,
    ) -> Result<()> {
        let factory = self.factory.upgrade().ok_or(Error::NotRunning)?;
        let endpoint = self.new_end_point(&factory, channel.clone(), stream, promise)?;

        let establish = async {
            let endpoint = match factory.security() {
                Security::Plain => endpoint,
                Security::Tls(context) => {
                    self.negotiate(&factory, context, endpoint, promise).await?
                }
            };
            self.connector.new_connection(&factory, endpoint, promise)
        };

        let (connection, session) = tokio::select! {
            result = establish => result?,
            () = channel.closed() => return Err(Error::ConnectionClosed),
        };

        self.connection_opened(channel.id());
        self.run_connection(&factory, connection, session).await
    }

    /// Creates the endpoint with the effective idle timeout and arms it.
    fn new_end_point(
        &self,
        factory: &FactoryInner,
        channel: Channel,
        stream: TcpStream,
        promise: &SessionPromise,
    ) -> Result<EndPoint> {
        let idle_timeout = effective_idle_timeout(promise.client().idle_timeout(), factory.idle_timeout());
        let endpoint = EndPoint::new(channel.clone(), stream, idle_timeout)?;
        endpoint.idle().arm(&self.scheduler, channel);
        Ok(endpoint)
    }

    /// Wraps `endpoint` in TLS, handshakes and negotiates the protocol.
    async fn negotiate(
        &self,
        factory: &FactoryInner,
        context: &TlsContext,
        endpoint: EndPoint,
        promise: &SessionPromise,
    ) -> Result<EndPoint> {
        let client = promise.client();
        let id = endpoint.channel().id();
        let config = client
            .tls_config()
            .cloned()
            .ok_or_else(|| Error::config("Client has no TLS configuration"))?;

        let engine = context.new_engine(config, endpoint.remote_addr())?;
        let mut endpoint = endpoint.into_tls(engine)?;
        factory.negotiation().put(id, Arc::new(client.clone()));

        endpoint.handshake().await?;

        let handler = factory
            .negotiation()
            .remove(id)
            .ok_or_else(|| Error::negotiation("Negotiation handler missing"))?;
        let offered: Vec<String> = endpoint
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .into_iter()
            .collect();

        let selected = handler.select_protocol(&offered).ok_or_else(|| {
            Error::negotiation(format!("No common protocol, server offered {offered:?}"))
        })?;
        debug!(channel = %id, protocol = %selected, "Protocol negotiated");

        Ok(endpoint)
    }

    async fn run_connection(
        &self,
        factory: &FactoryInner,
        connection: SpdyConnection,
        session: Session,
    ) -> Result<()> {
        let result = connection.run().await;
        session.connection_closed();
        factory.session_closed(&session);
        debug!(session_id = %session.id(), "Session closed");
        result
    }
}

/// Client override when set, factory default otherwise.
#[inline]
fn effective_idle_timeout(client: Option<Duration>, factory: Duration) -> Duration {
    client.unwrap_or(factory)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::mpsc as std_mpsc;
    use std::thread;

    use futures_util::FutureExt;

    use crate::client::factory::ClientFactory;
    use crate::protocol::IdentityCompressionFactory;
    use crate::transport::BufferPool;

    fn selector(handle: &Handle) -> Arc<SelectorManager> {
        let connector = ClientConnectionFactory::new(
            Arc::new(BufferPool::default()),
            Arc::new(IdentityCompressionFactory),
        );
        SelectorManager::start(
            handle.clone(),
            Arc::new(Scheduler::new(handle.clone())),
            Weak::new(),
            connector,
        )
    }

    fn never_connects() -> ConnectFuture {
        futures_util::future::pending::<io::Result<TcpStream>>().boxed()
    }

    #[test]
    fn test_stop_during_registration_fails_promise() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let selector = selector(rt.handle());

        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        *selector.registration_hook.lock() = Some(Box::new(move || {
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }));

        let factory = ClientFactory::builder()
            .executor(rt.handle().clone())
            .build()
            .unwrap();
        let client = factory.new_client(3).unwrap();
        let channel = Channel::new("127.0.0.1:9".parse().unwrap());
        let promise = SessionPromise::new(channel.clone(), client, Arc::new(()));

        let registering = {
            let selector = Arc::clone(&selector);
            let promise = promise.clone();
            thread::spawn(move || selector.connect(channel, never_connects(), promise))
        };
        entered_rx.recv().unwrap();

        let stopping = {
            let selector = Arc::clone(&selector);
            thread::spawn(move || selector.stop())
        };

        // Stop cannot pass the registration in progress
        thread::sleep(Duration::from_millis(50));
        assert!(!stopping.is_finished());
        assert!(selector.is_running());

        release_tx.send(()).unwrap();
        assert!(registering.join().unwrap().is_ok());
        stopping.join().unwrap();

        match promise.try_result() {
            Some(Err(Error::ConnectFailed(inner))) => {
                assert!(matches!(*inner, Error::NotRunning));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(selector.pending_count(), 0);
        assert_eq!(selector.channel_count(), 0);
    }

    #[test]
    fn test_connect_after_stop_is_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let selector = selector(rt.handle());
        selector.stop();
        selector.stop();

        let factory = ClientFactory::builder()
            .executor(rt.handle().clone())
            .build()
            .unwrap();
        let client = factory.new_client(3).unwrap();
        let channel = Channel::new("127.0.0.1:9".parse().unwrap());
        let promise = SessionPromise::new(channel.clone(), client, Arc::new(()));

        assert!(matches!(
            selector.connect(channel, never_connects(), promise),
            Err(Error::NotRunning)
        ));
        assert_eq!(selector.pending_count(), 0);
        assert_eq!(selector.channel_count(), 0);
    }

    #[test]
    fn test_effective_idle_timeout() {
        let default = Duration::from_millis(30_000);
        assert_eq!(effective_idle_timeout(None, default), default);
        assert_eq!(
            effective_idle_timeout(Some(Duration::from_millis(500)), default),
            Duration::from_millis(500)
        );
        assert_eq!(
            effective_idle_timeout(Some(Duration::ZERO), default),
            Duration::ZERO
        );
    }
}
