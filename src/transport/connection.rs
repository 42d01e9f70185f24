//! Protocol connection.
//!
//! [`ClientConnectionFactory`] assembles a session on top of a connected
//! endpoint; [`SpdyConnection`] then drives the endpoint until it closes.
//!
//! # Event loop
//!
//! ```text
//! ┌──────────────┐  outbound   ┌────────────────┐  write  ┌──────────┐
//! │   Session    │ ──────────► │ SpdyConnection │ ──────► │ EndPoint │
//! │ (any thread) │             │   (one task)   │ ◄────── │          │
//! └──────────────┘             └────────────────┘  read   └──────────┘
//!        ▲                             │ parse
//!        └──────── FrameListener ──────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::client::factory::FactoryInner;
use crate::client::promise::SessionPromise;
use crate::error::{Error, Result};
use crate::protocol::{CompressionFactory, Generator, Parser};
use crate::session::{Session, SessionParts};
use crate::transport::buffer_pool::BufferPool;
use crate::transport::endpoint::EndPoint;

// ============================================================================
// Outbound
// ============================================================================

/// Work queued by a session for its connection.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Serialised frame, returned to the pool once written.
    Frame(Vec<u8>),
    /// Flush and close.
    Close,
}

// ============================================================================
// ClientConnectionFactory
// ============================================================================

/// Builds the protocol connection and session for a connected endpoint.
pub struct ClientConnectionFactory {
    buffer_pool: Arc<BufferPool>,
    compression: Arc<dyn CompressionFactory>,
}

impl fmt::Debug for ClientConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnectionFactory")
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl ClientConnectionFactory {
    /// Creates a factory drawing buffers from `buffer_pool`.
    #[must_use]
    pub fn new(buffer_pool: Arc<BufferPool>, compression: Arc<dyn CompressionFactory>) -> Self {
        Self {
            buffer_pool,
            compression,
        }
    }

    /// Builds the session for `endpoint` and completes `promise` with it.
    ///
    /// The session is registered with the factory before the promise
    /// completes.
    ///
    /// # Errors
    ///
    /// - [`Error::NotRunning`] if the factory refused the session
    /// - [`Error::Cancelled`] if the promise was cancelled meanwhile
    pub(crate) fn new_connection(
        &self,
        registry: &FactoryInner,
        endpoint: EndPoint,
        promise: &SessionPromise,
    ) -> Result<(SpdyConnection, Session)> {
        let client = promise.client();

        let mut parser = Parser::new(self.compression.new_decompressor());
        let generator = Generator::new(
            Arc::clone(&self.buffer_pool),
            self.compression.new_compressor(),
        );
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let session = Session::new(SessionParts {
            version: client.version(),
            flow_control: client.flow_control_strategy(),
            initial_window_size: client.initial_window_size(),
            idle_timeout: endpoint.idle_timeout(),
            listener: promise.listener(),
            generator,
            outbound: outbound_tx,
            channel: endpoint.channel().clone(),
            remote_addr: endpoint.remote_addr(),
            secure: endpoint.is_secure(),
        });
        parser.add_listener(Arc::new(session.clone()));

        if !registry.session_opened(&session) {
            return Err(Error::NotRunning);
        }

        if !promise.completed(session.clone()) {
            registry.session_closed(&session);
            return Err(Error::Cancelled);
        }

        debug!(
            session_id = %session.id(),
            channel = %endpoint.channel().id(),
            version = %session.version(),
            secure = session.is_secure(),
            "Session established"
        );

        let connection = SpdyConnection::new(
            endpoint,
            parser,
            outbound_rx,
            Arc::clone(&self.buffer_pool),
        );
        Ok((connection, session))
    }
}

// ============================================================================
// SpdyConnection
// ============================================================================

/// Drives one endpoint: parses inbound bytes and writes queued frames.
pub struct SpdyConnection {
    endpoint: EndPoint,
    parser: Parser,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    pool: Arc<BufferPool>,
}

impl fmt::Debug for SpdyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpdyConnection")
            .field("endpoint", &self.endpoint)
            .field("pending_bytes", &self.parser.pending_len())
            .finish_non_exhaustive()
    }
}

impl SpdyConnection {
    pub(crate) fn new(
        endpoint: EndPoint,
        parser: Parser,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            endpoint,
            parser,
            outbound,
            pool,
        }
    }

    /// Runs until the peer disconnects, the session asks to close, or the
    /// channel is closed. Frames queued before a close are still written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on socket failure or [`Error::Protocol`] on a
    /// malformed inbound frame.
    pub async fn run(self) -> Result<()> {
        let Self {
            mut endpoint,
            mut parser,
            mut outbound,
            pool,
        } = self;

        let channel = endpoint.channel().clone();
        let mut buf = vec![0u8; pool.buffer_size()];

        let result = loop {
            tokio::select! {
                biased;

                () = channel.closed() => {
                    debug!(channel = %channel.id(), "Channel closed");
                    break drain(&mut endpoint, &mut outbound, &pool).await;
                }

                command = outbound.recv() => {
                    match command {
                        Some(Outbound::Frame(bytes)) => {
                            let written = endpoint.write_all(&bytes).await;
                            trace!(channel = %channel.id(), len = bytes.len(), "Frame written");
                            pool.release(bytes);
                            if let Err(e) = written {
                                break Err(e.into());
                            }
                        }

                        Some(Outbound::Close) => {
                            debug!(channel = %channel.id(), "Session requested close");
                            break endpoint.flush().await.map_err(Error::from);
                        }

                        None => {
                            debug!(channel = %channel.id(), "Outbound queue closed");
                            break Ok(());
                        }
                    }
                }

                read = endpoint.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            debug!(channel = %channel.id(), "Connection closed by remote");
                            break Ok(());
                        }

                        Ok(n) => {
                            if let Err(e) = parser.parse(&buf[..n]) {
                                break Err(e);
                            }
                            // TLS may owe the peer records after a read
                            if let Err(e) = endpoint.flush().await {
                                break Err(e.into());
                            }
                        }

                        Err(e) => break Err(e.into()),
                    }
                }
            }
        };

        // The peer may already be gone
        let _ = endpoint.shutdown().await;
        channel.close();

        debug!(channel = %channel.id(), "Connection loop terminated");
        result
    }
}

/// Writes whatever is still queued, then flushes.
async fn drain(
    endpoint: &mut EndPoint,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    pool: &BufferPool,
) -> Result<()> {
    while let Ok(command) = outbound.try_recv() {
        if let Outbound::Frame(bytes) = command {
            let written = endpoint.write_all(&bytes).await;
            pool.release(bytes);
            written?;
        }
    }
    endpoint.flush().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::protocol::{IdentityCompressionFactory, Version, new_flow_control_strategy};
    use crate::session::DEFAULT_INITIAL_WINDOW_SIZE;
    use crate::transport::channel::Channel;

    /// Client-side connection plus the raw server socket.
    async fn connection_pair() -> (SpdyConnection, Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());

        let endpoint = EndPoint::new(Channel::new(addr), client.unwrap(), Duration::ZERO).unwrap();
        let pool = Arc::new(BufferPool::default());
        let compression = IdentityCompressionFactory;

        let mut parser = Parser::new(compression.new_decompressor());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(SessionParts {
            version: Version::V3,
            flow_control: new_flow_control_strategy(Version::V3),
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            idle_timeout: endpoint.idle_timeout(),
            listener: Arc::new(()),
            generator: Generator::new(Arc::clone(&pool), compression.new_compressor()),
            outbound: tx,
            channel: endpoint.channel().clone(),
            remote_addr: endpoint.remote_addr(),
            secure: false,
        });
        parser.add_listener(Arc::new(session.clone()));

        let connection = SpdyConnection::new(endpoint, parser, rx, pool);
        (connection, session, accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_ping_echo_over_socket() {
        let (connection, _session, mut server) = connection_pair().await;
        let task = tokio::spawn(connection.run());

        server
            .write_all(&[0x80, 3, 0, 6, 0, 0, 0, 4, 0, 0, 0, 2])
            .await
            .unwrap();

        let mut echo = [0u8; 12];
        server.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo, [0x80, 3, 0, 6, 0, 0, 0, 4, 0, 0, 0, 2]);

        drop(server);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_go_away_is_written_then_connection_closes() {
        let (connection, session, mut server) = connection_pair().await;
        let task = tokio::spawn(connection.run());

        assert!(session.go_away());

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, [0x80, 3, 0, 7, 0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0, 0]);

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_channel_close_ends_loop() {
        let (connection, session, mut server) = connection_pair().await;
        let task = tokio::spawn(connection.run());

        session.close();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_fails_loop() {
        let (connection, _session, mut server) = connection_pair().await;
        let task = tokio::spawn(connection.run());

        server
            .write_all(&[0x80, 9, 0, 6, 0, 0, 0, 4, 0, 0, 0, 1])
            .await
            .unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
