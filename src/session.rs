//! Established protocol session.
//!
//! A [`Session`] is what a [`SessionPromise`](crate::SessionPromise)
//! completes with. It is a cheap clone over shared state; the factory keeps
//! one clone for teardown and the connection's parser holds another as its
//! frame listener.
//!
//! # Frame handling
//!
//! | Inbound frame | Reaction |
//! |---------------|----------|
//! | SETTINGS | `INITIAL_WINDOW_SIZE` routed through the flow-control strategy |
//! | PING (even id) | Echoed back to the server |
//! | PING (odd id) | Reply to our own ping |
//! | GOAWAY | Recorded; listener notified |
//! | Anything else | Passed to the listener as-is |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::frame::SETTINGS_INITIAL_WINDOW_SIZE;
use crate::protocol::{FlowControlStrategy, Frame, FrameListener, Generator, Setting, Version};
use crate::transport::channel::Channel;
use crate::transport::connection::Outbound;

// ============================================================================
// Constants
// ============================================================================

/// Initial window size of a new session.
pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65_536;

// ============================================================================
// SessionFrameListener
// ============================================================================

/// Application callbacks for session-level events.
///
/// Every method has an empty default; `()` is the no-op listener.
#[allow(unused_variables)]
pub trait SessionFrameListener: Send + Sync {
    /// The peer sent SETTINGS.
    fn on_settings(&self, session: &Session, clear: bool, settings: &[Setting]) {}

    /// A PING arrived: either the server's (echoed already) or the reply to
    /// ours.
    fn on_ping(&self, session: &Session, id: u32) {}

    /// The peer sent GOAWAY.
    fn on_go_away(&self, session: &Session, last_good_stream_id: u32, status: u32) {}

    /// A frame the session does not interpret.
    fn on_frame(&self, session: &Session, frame: &Frame) {}

    /// The connection under the session closed.
    fn on_closed(&self, session: &Session) {}
}

impl SessionFrameListener for () {}

// ============================================================================
// Session
// ============================================================================

/// Everything a session is built from.
pub(crate) struct SessionParts {
    pub version: Version,
    pub flow_control: &'static dyn FlowControlStrategy,
    pub initial_window_size: i32,
    pub idle_timeout: Duration,
    pub listener: Arc<dyn SessionFrameListener>,
    pub generator: Generator,
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub channel: Channel,
    pub remote_addr: SocketAddr,
    pub secure: bool,
}

/// Handle to an established session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    version: Version,
    flow_control: &'static dyn FlowControlStrategy,
    /// Current session window.
    window_size: AtomicI32,
    idle_timeout: Duration,
    listener: Arc<dyn SessionFrameListener>,
    generator: Mutex<Generator>,
    outbound: mpsc::UnboundedSender<Outbound>,
    channel: Channel,
    remote_addr: SocketAddr,
    secure: bool,
    /// Next client ping ID (odd).
    next_ping_id: AtomicU32,
    go_away_sent: AtomicBool,
    go_away_received: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("version", &self.inner.version)
            .field("remote_addr", &self.inner.remote_addr)
            .field("window_size", &self.window_size())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    pub(crate) fn new(parts: SessionParts) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::next(),
                version: parts.version,
                flow_control: parts.flow_control,
                window_size: AtomicI32::new(parts.initial_window_size),
                idle_timeout: parts.idle_timeout,
                listener: parts.listener,
                generator: Mutex::new(parts.generator),
                outbound: parts.outbound,
                channel: parts.channel,
                remote_addr: parts.remote_addr,
                secure: parts.secure,
                next_ping_id: AtomicU32::new(1),
                go_away_sent: AtomicBool::new(false),
                go_away_received: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the session identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Returns the protocol version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// Returns the flow-control strategy selected by the client.
    #[inline]
    #[must_use]
    pub fn flow_control_strategy(&self) -> &'static dyn FlowControlStrategy {
        self.inner.flow_control
    }

    /// Returns the current session window size.
    #[inline]
    #[must_use]
    pub fn window_size(&self) -> i32 {
        self.inner.window_size.load(Ordering::Acquire)
    }

    /// Returns the idle timeout of the underlying endpoint.
    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Returns `true` if the session runs over TLS.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.inner.secure
    }

    /// Returns `true` once GOAWAY has been queued.
    #[inline]
    #[must_use]
    pub fn is_go_away_sent(&self) -> bool {
        self.inner.go_away_sent.load(Ordering::Acquire)
    }

    /// Returns `true` once the peer has sent GOAWAY.
    #[inline]
    #[must_use]
    pub fn is_go_away_received(&self) -> bool {
        self.inner.go_away_received.load(Ordering::Acquire)
    }

    /// Returns `true` once the underlying connection has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

// ============================================================================
// Session - Operations
// ============================================================================

impl Session {
    /// Sends GOAWAY and closes the connection once it is written.
    ///
    /// Only the first call has any effect. Returns `true` if this call
    /// queued the frame.
    pub fn go_away(&self) -> bool {
        if self.inner.go_away_sent.swap(true, Ordering::AcqRel) {
            return false;
        }

        let frame = Frame::GoAway {
            last_good_stream_id: 0,
            status: 0,
        };
        if let Err(e) = self.write(&frame) {
            debug!(session_id = %self.id(), error = %e, "GOAWAY not sent");
        }
        // Queue is gone once the connection has ended
        let _ = self.inner.outbound.send(Outbound::Close);

        debug!(session_id = %self.id(), "GOAWAY sent");
        true
    }

    /// Sends a PING and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection has ended.
    pub fn ping(&self) -> Result<u32> {
        let id = self.inner.next_ping_id.fetch_add(2, Ordering::Relaxed);
        self.write(&Frame::Ping { id })?;
        Ok(id)
    }

    /// Sends SETTINGS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection has ended.
    pub fn settings(&self, clear: bool, entries: Vec<Setting>) -> Result<()> {
        self.write(&Frame::Settings { clear, entries })
    }

    /// Closes the connection without GOAWAY.
    pub fn close(&self) {
        self.inner.channel.close();
    }

    /// Called once the connection loop has ended.
    pub(crate) fn connection_closed(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.listener.on_closed(self);
        }
    }

    fn write(&self, frame: &Frame) -> Result<()> {
        let bytes = self.inner.generator.lock().generate(self.inner.version, frame)?;
        self.inner
            .outbound
            .send(Outbound::Frame(bytes))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn on_settings(&self, clear: bool, entries: &[Setting]) {
        for entry in entries {
            if entry.id == SETTINGS_INITIAL_WINDOW_SIZE {
                let announced = i32::try_from(entry.value).unwrap_or(i32::MAX);
                let current = self.window_size();
                let updated = self
                    .inner
                    .flow_control
                    .initial_window_size_changed(current, announced);
                self.inner.window_size.store(updated, Ordering::Release);
                debug!(
                    session_id = %self.id(),
                    current,
                    announced,
                    updated,
                    "Initial window size changed"
                );
            }
        }
        self.inner.listener.on_settings(self, clear, entries);
    }

    fn on_ping(&self, id: u32) {
        // Server-initiated pings carry even IDs
        if id % 2 == 0
            && let Err(e) = self.write(&Frame::Ping { id })
        {
            debug!(session_id = %self.id(), error = %e, "PING echo not sent");
        }
        self.inner.listener.on_ping(self, id);
    }
}

impl FrameListener for Session {
    fn on_frame(&self, version: Option<Version>, frame: Frame) {
        trace!(session_id = %self.id(), ?version, ?frame, "Frame received");

        match frame {
            Frame::Settings { clear, entries } => self.on_settings(clear, &entries),

            Frame::Ping { id } => self.on_ping(id),

            Frame::GoAway {
                last_good_stream_id,
                status,
            } => {
                self.inner.go_away_received.store(true, Ordering::Release);
                debug!(session_id = %self.id(), last_good_stream_id, status, "GOAWAY received");
                self.inner
                    .listener
                    .on_go_away(self, last_good_stream_id, status);
            }

            other => self.inner.listener.on_frame(self, &other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
