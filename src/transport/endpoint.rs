//! Connected endpoint.
//!
//! An [`EndPoint`] owns the connected socket, plain or TLS-wrapped, along
//! with the channel handle and its [`IdleTimeout`]. Every read and write
//! counts as activity.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustls::ClientConnection;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::client::config::saturating_millis;
use crate::error::{Error, Result};
use crate::transport::channel::Channel;
use crate::transport::scheduler::Scheduler;
use crate::transport::tls::TlsStream;

// ============================================================================
// IdleTimeout
// ============================================================================

/// Idle watchdog for one endpoint.
///
/// A zero timeout disables the watchdog.
pub struct IdleTimeout {
    /// Allowed inactivity.
    timeout: Duration,
    /// Last read or write.
    last_activity: Mutex<Instant>,
}

impl fmt::Debug for IdleTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleTimeout")
            .field("timeout", &self.timeout)
            .field("idle_for", &self.idle_for())
            .finish()
    }
}

impl IdleTimeout {
    /// Creates a watchdog with `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Returns the configured timeout.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Records activity.
    #[inline]
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Returns the time since the last activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Starts watching `channel`, closing it once idle for the timeout.
    ///
    /// The check re-arms itself for the remaining time after any activity
    /// and stops once the channel closes or the scheduler stops.
    pub fn arm(self: &Arc<Self>, scheduler: &Arc<Scheduler>, channel: Channel) {
        if self.timeout.is_zero() {
            return;
        }
        self.schedule_check(scheduler, channel, self.timeout);
    }

    fn schedule_check(self: &Arc<Self>, scheduler: &Arc<Scheduler>, channel: Channel, delay: Duration) {
        let idle = Arc::clone(self);
        let weak = Arc::downgrade(scheduler);
        scheduler.schedule(delay, move || {
            if !channel.is_open() {
                return;
            }
            let idle_for = idle.idle_for();
            if idle_for >= idle.timeout {
                debug!(
                    channel = %channel.id(),
                    timeout_ms = saturating_millis(idle.timeout),
                    "Idle timeout expired"
                );
                channel.close();
            } else if let Some(scheduler) = weak.upgrade() {
                idle.schedule_check(&scheduler, channel, idle.timeout - idle_for);
            }
        });
    }
}

// ============================================================================
// EndPoint
// ============================================================================

/// Socket transport under an endpoint.
enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

/// Connected socket with its channel handle and idle watchdog.
pub struct EndPoint {
    channel: Channel,
    transport: Transport,
    idle: Arc<IdleTimeout>,
    local: SocketAddr,
    remote: SocketAddr,
}

impl fmt::Debug for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndPoint")
            .field("channel", &self.channel.id())
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("secure", &self.is_secure())
            .field("idle_timeout", &self.idle.timeout())
            .finish()
    }
}

impl EndPoint {
    /// Creates a plain endpoint over a connected socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the socket addresses cannot be read.
    pub fn new(channel: Channel, stream: TcpStream, idle_timeout: Duration) -> Result<Self> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        Ok(Self {
            channel,
            transport: Transport::Plain(stream),
            idle: Arc::new(IdleTimeout::new(idle_timeout)),
            local,
            remote,
        })
    }

    /// Returns the channel handle.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Returns the idle watchdog.
    #[inline]
    #[must_use]
    pub fn idle(&self) -> &Arc<IdleTimeout> {
        &self.idle
    }

    /// Returns the effective idle timeout.
    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle.timeout()
    }

    /// Returns the local address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Returns `true` if the endpoint is TLS-wrapped.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// Returns the ALPN protocol selected by the server.
    #[must_use]
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        match &self.transport {
            Transport::Plain(_) => None,
            Transport::Tls(tls) => tls.alpn_protocol(),
        }
    }

    /// Wraps the socket with `engine`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is already secure.
    pub fn into_tls(self, engine: ClientConnection) -> Result<Self> {
        let Self {
            channel,
            transport,
            idle,
            local,
            remote,
        } = self;
        match transport {
            Transport::Plain(stream) => Ok(Self {
                channel,
                transport: Transport::Tls(Box::new(TlsStream::new(stream, engine))),
                idle,
                local,
                remote,
            }),
            Transport::Tls(_) => Err(Error::config("Endpoint is already TLS-wrapped")),
        }
    }

    /// Runs the TLS handshake. A no-op on plain endpoints.
    pub async fn handshake(&mut self) -> Result<()> {
        if let Transport::Tls(tls) = &mut self.transport {
            tls.handshake().await?;
            self.idle.touch();
        }
        Ok(())
    }

    /// Reads bytes into `buf`. Returns 0 at end of stream. Cancel-safe.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.transport {
            Transport::Plain(stream) => stream.read(buf).await?,
            Transport::Tls(tls) => tls.read(buf).await?,
        };
        self.idle.touch();
        Ok(n)
    }

    /// Writes all of `data`.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.write_all(data).await?,
            Transport::Tls(tls) => tls.write_all(data).await?,
        }
        self.idle.touch();
        Ok(())
    }

    /// Flushes buffered output, including queued TLS records.
    pub async fn flush(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.flush().await,
            Transport::Tls(tls) => tls.flush().await,
        }
    }

    /// Shuts the write side down.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.shutdown().await,
            Transport::Tls(tls) => tls.shutdown().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
