//! TLS support.
//!
//! A rustls [`ClientConnection`] is driven by hand over the tokio socket:
//! ciphertext is moved with `read_tls`/`write_tls`, plaintext through the
//! engine's reader and writer. The handshake runs on the channel's own task
//! before the protocol connection reads any application bytes.
//!
//! | Type | Role |
//! |------|------|
//! | [`TlsContext`] | Factory-wide client configuration |
//! | [`TlsStream`] | Record layer over one socket |
//! | [`NegotiationRegistry`] | Per-channel protocol negotiation handlers |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::Version;

// ============================================================================
// Constants
// ============================================================================

/// Size of the socket read buffer used for ciphertext.
const CIPHERTEXT_CHUNK: usize = 16 * 1024;

// ============================================================================
// TlsContext
// ============================================================================

/// Factory-wide TLS client configuration.
///
/// Each client derives its own configuration from this one, advertising its
/// protocol version through ALPN.
#[derive(Clone)]
pub struct TlsContext {
    /// Base configuration; ALPN is overwritten per client.
    config: Arc<ClientConfig>,
    /// Name to verify instead of the peer IP.
    server_name: Option<ServerName<'static>>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Wraps an existing rustls client configuration.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            server_name: None,
        }
    }

    /// Builds a configuration trusting `roots`, using the ring provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the provider rejects the default protocol
    /// versions.
    pub fn with_roots(roots: RootCertStore) -> Result<Self> {
        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()?
                .with_root_certificates(roots)
                .with_no_client_auth();
        Ok(Self::new(config))
    }

    /// Verifies the peer certificate against `name` rather than the peer IP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `name` is not a valid DNS name or IP.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = ServerName::try_from(name.into())
            .map_err(|e| Error::config(format!("Invalid TLS server name: {e}")))?;
        self.server_name = Some(name);
        Ok(self)
    }

    /// Returns the server-name override, if any.
    #[inline]
    #[must_use]
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        self.server_name.as_ref()
    }

    /// Derives a client configuration advertising `version` through ALPN.
    #[must_use]
    pub(crate) fn client_config(&self, version: Version) -> Arc<ClientConfig> {
        let mut config = ClientConfig::clone(&self.config);
        config.alpn_protocols = vec![version.protocol().as_bytes().to_vec()];
        Arc::new(config)
    }

    /// Creates a client-mode engine for `peer`.
    pub(crate) fn new_engine(
        &self,
        config: Arc<ClientConfig>,
        peer: SocketAddr,
    ) -> Result<ClientConnection> {
        let name = self
            .server_name
            .clone()
            .unwrap_or_else(|| ServerName::from(peer.ip()));
        Ok(ClientConnection::new(config, name)?)
    }
}

// ============================================================================
// TlsStream
// ============================================================================

/// TLS record layer over one socket.
pub struct TlsStream {
    /// Underlying socket.
    tcp: TcpStream,
    /// rustls engine.
    engine: ClientConnection,
    /// Ciphertext read from the socket but not yet consumed by the engine.
    incoming: Vec<u8>,
    /// Socket read buffer.
    scratch: Box<[u8]>,
}

impl fmt::Debug for TlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream")
            .field("handshaking", &self.engine.is_handshaking())
            .field("incoming", &self.incoming.len())
            .finish_non_exhaustive()
    }
}

impl TlsStream {
    /// Wraps `tcp` with `engine`. No bytes move until [`handshake`](Self::handshake).
    #[must_use]
    pub fn new(tcp: TcpStream, engine: ClientConnection) -> Self {
        Self {
            tcp,
            engine,
            incoming: Vec::new(),
            scratch: vec![0; CIPHERTEXT_CHUNK].into_boxed_slice(),
        }
    }

    /// Returns the underlying socket.
    #[inline]
    #[must_use]
    pub fn tcp(&self) -> &TcpStream {
        &self.tcp
    }

    /// Returns the protocol selected by the server, if any.
    #[inline]
    #[must_use]
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.engine.alpn_protocol()
    }

    /// Drives the handshake to completion.
    ///
    /// # Errors
    ///
    /// - [`Error::Tls`] if the peer is rejected or sends a bad record
    /// - [`Error::Connection`] if the peer closes mid-handshake
    /// - [`Error::Io`] on socket failure
    pub async fn handshake(&mut self) -> Result<()> {
        while self.engine.is_handshaking() {
            self.flush().await?;
            if !self.engine.is_handshaking() {
                break;
            }

            if self.incoming.is_empty() {
                let n = self.tcp.read(&mut self.scratch).await?;
                if n == 0 {
                    return Err(Error::connection("Peer closed during TLS handshake"));
                }
                self.incoming.extend_from_slice(&self.scratch[..n]);
            }

            if let Err(e) = self.feed() {
                // Best effort: deliver the alert rustls queued
                let _ = self.flush().await;
                return Err(e);
            }
        }

        self.flush().await?;
        trace!(alpn = ?self.alpn_protocol(), "TLS handshake complete");
        Ok(())
    }

    /// Reads decrypted bytes. Returns 0 once the peer has sent `close_notify`.
    ///
    /// Cancel-safe: the socket read is the only suspension point and
    /// everything it returns is buffered before the next iteration.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] when the socket closes
    /// without `close_notify`, since the stream may have been truncated.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.engine.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        debug!("TLS peer closed without close_notify");
                    }
                    return Err(e);
                }
            }

            if !self.incoming.is_empty() {
                self.feed().map_err(into_io)?;
                continue;
            }

            let n = self.tcp.read(&mut self.scratch).await?;
            if n == 0 {
                // Records the socket EOF; the reader then reports how it ended
                self.engine.read_tls(&mut io::empty())?;
                continue;
            }
            self.incoming.extend_from_slice(&self.scratch[..n]);
        }
    }

    /// Encrypts and writes all of `data`.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.engine.writer().write(rest)?;
            rest = &rest[n..];
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes any records the engine has queued.
    pub async fn flush(&mut self) -> io::Result<()> {
        let mut out = Vec::new();
        while self.engine.wants_write() {
            out.clear();
            self.engine.write_tls(&mut out)?;
            self.tcp.write_all(&out).await?;
        }
        self.tcp.flush().await
    }

    /// Sends `close_notify` and shuts the socket down.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.engine.send_close_notify();
        // The peer may already be gone
        let _ = self.flush().await;
        self.tcp.shutdown().await
    }

    /// Hands buffered ciphertext to the engine and processes it.
    fn feed(&mut self) -> Result<()> {
        let mut pending = self.incoming.as_slice();
        let before = pending.len();
        self.engine.read_tls(&mut pending)?;
        let consumed = before - pending.len();
        self.incoming.drain(..consumed);
        self.engine.process_new_packets()?;
        Ok(())
    }
}

fn into_io(error: Error) -> io::Error {
    match error {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

// ============================================================================
// NegotiationRegistry
// ============================================================================

/// Chooses the application protocol once the handshake completes.
pub trait NegotiationHandler: Send + Sync {
    /// Picks a protocol from those offered by the server.
    fn select_protocol(&self, server_protocols: &[String]) -> Option<String>;
}

/// Negotiation handlers keyed by channel.
///
/// Entries are added when a channel is wrapped in TLS and removed either
/// when negotiation runs or when the TLS connection closes.
#[derive(Default)]
pub struct NegotiationRegistry {
    handlers: Mutex<FxHashMap<ChannelId, Arc<dyn NegotiationHandler>>>,
}

impl fmt::Debug for NegotiationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl NegotiationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `channel`, replacing any previous one.
    pub fn put(&self, channel: ChannelId, handler: Arc<dyn NegotiationHandler>) {
        self.handlers.lock().insert(channel, handler);
    }

    /// Removes and returns the handler for `channel`.
    ///
    /// Removing an absent entry is a no-op.
    pub fn remove(&self, channel: ChannelId) -> Option<Arc<dyn NegotiationHandler>> {
        self.handlers.lock().remove(&channel)
    }

    /// Returns the number of registered handlers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Returns `true` if no handler is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl NegotiationHandler for Fixed {
        fn select_protocol(&self, server_protocols: &[String]) -> Option<String> {
            server_protocols.iter().find(|p| *p == self.0).cloned()
        }
    }

    #[test]
    fn test_registry_put_and_remove() {
        let registry = NegotiationRegistry::new();
        let id = ChannelId::next();

        registry.put(id, Arc::new(Fixed("spdy/3")));
        assert_eq!(registry.len(), 1);

        let handler = registry.remove(id).expect("registered");
        let offered = vec!["spdy/3".to_string(), "http/1.1".to_string()];
        assert_eq!(handler.select_protocol(&offered).as_deref(), Some("spdy/3"));

        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    fn context() -> TlsContext {
        TlsContext::with_roots(RootCertStore::empty()).unwrap()
    }

    #[test]
    fn test_client_config_advertises_version() {
        let ctx = context();
        assert_eq!(ctx.client_config(Version::V3).alpn_protocols, vec![b"spdy/3".to_vec()]);
        assert_eq!(ctx.client_config(Version::V2).alpn_protocols, vec![b"spdy/2".to_vec()]);
        assert!(ctx.config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_server_name_override() {
        let ctx = context().with_server_name("localhost").unwrap();
        assert!(matches!(ctx.server_name(), Some(ServerName::DnsName(_))));
        assert!(context().with_server_name("not a name!").is_err());
    }

    #[test]
    fn test_new_engine_defaults_to_peer_ip() {
        let ctx = context();
        let config = ctx.client_config(Version::V3);
        let engine = ctx.new_engine(config, "127.0.0.1:443".parse().unwrap()).unwrap();
        assert!(engine.is_handshaking());
    }
}
