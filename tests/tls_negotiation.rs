//! TLS handshake and ALPN negotiation against a rustls server.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener as StdListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{
    ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection, StreamOwned,
};
use spdy_client::transport::TlsStream;
use spdy_client::{ClientFactory, Error, TlsContext};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

const GO_AWAY_V3: [u8; 16] = [0x80, 3, 0, 7, 0, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0, 0];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the server observed on its one connection.
struct Observed {
    alpn: Option<Vec<u8>>,
    received: Vec<u8>,
}

fn generate_self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    (CertificateDer::from(cert.cert), key.into())
}

fn server_config(
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
    alpn: &[&str],
) -> Arc<ServerConfig> {
    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Arc::new(config)
}

/// Accepts one TLS connection on a blocking thread and reads it to the end.
fn tls_server(alpn: &[&str]) -> (SocketAddr, TlsContext, JoinHandle<io::Result<Observed>>) {
    let (cert, key) = generate_self_signed();

    let mut roots = RootCertStore::empty();
    roots.add(cert.clone()).unwrap();
    let context = TlsContext::with_roots(roots)
        .unwrap()
        .with_server_name("localhost")
        .unwrap();

    let config = server_config(cert, key, alpn);
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (sock, _) = listener.accept()?;
        sock.set_read_timeout(Some(WAIT))?;

        let conn = ServerConnection::new(config).map_err(io::Error::other)?;
        let mut tls = StreamOwned::new(conn, sock);
        while tls.conn.is_handshaking() {
            tls.conn.complete_io(&mut tls.sock)?;
        }
        let alpn = tls.conn.alpn_protocol().map(<[u8]>::to_vec);

        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match tls.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Observed { alpn, received })
    });

    (addr, context, server)
}

/// Completes one handshake, sends `greeting` and closes the socket, with or
/// without `close_notify` first.
fn closing_server(
    greeting: &'static [u8],
    close_notify: bool,
) -> (SocketAddr, RootCertStore, JoinHandle<io::Result<()>>) {
    let (cert, key) = generate_self_signed();
    let mut roots = RootCertStore::empty();
    roots.add(cert.clone()).unwrap();

    let config = server_config(cert, key, &[]);
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (sock, _) = listener.accept()?;
        sock.set_read_timeout(Some(WAIT))?;

        let conn = ServerConnection::new(config).map_err(io::Error::other)?;
        let mut tls = StreamOwned::new(conn, sock);
        while tls.conn.is_handshaking() {
            tls.conn.complete_io(&mut tls.sock)?;
        }

        tls.conn.writer().write_all(greeting)?;
        if close_notify {
            tls.conn.send_close_notify();
        }
        while tls.conn.wants_write() {
            tls.conn.write_tls(&mut tls.sock)?;
        }
        tls.sock.shutdown(Shutdown::Write)?;

        // Hold the socket until the client lets go
        let mut sink = [0u8; 256];
        while matches!(tls.sock.read(&mut sink), Ok(n) if n > 0) {}
        Ok(())
    });

    (addr, roots, server)
}

async fn connect_tls(addr: SocketAddr, roots: RootCertStore) -> anyhow::Result<TlsStream> {
    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
    let engine = ClientConnection::new(Arc::new(config), ServerName::try_from("localhost")?)?;

    let mut stream = TlsStream::new(TcpStream::connect(addr).await?, engine);
    stream.handshake().await?;
    Ok(stream)
}

/// Reads until the stream ends, returning the plaintext and how it ended.
async fn read_to_close(stream: &mut TlsStream) -> (Vec<u8>, io::Result<()>) {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match tokio::time::timeout(WAIT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => return (received, Ok(())),
            Ok(Ok(n)) => received.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return (received, Err(e)),
            Err(_) => return (received, Err(io::ErrorKind::TimedOut.into())),
        }
    }
}

fn started_factory(context: TlsContext) -> ClientFactory {
    init_tracing();
    let factory = ClientFactory::builder()
        .executor(Handle::current())
        .tls(context)
        .build()
        .unwrap();
    factory.start().unwrap();
    factory
}

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tls_session_negotiates_spdy3() {
    let (addr, context, server) = tls_server(&["spdy/3", "http/1.1"]);
    let factory = started_factory(context);
    assert!(factory.security().is_tls());

    let session = factory
        .new_client(3)
        .unwrap()
        .connect(addr, Arc::new(()))
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();

    assert!(session.is_secure());
    assert_eq!(factory.session_count(), 1);
    assert_eq!(factory.pending_negotiations(), 0);

    factory.stop();

    let observed = tokio::task::spawn_blocking(move || server.join().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(observed.alpn.as_deref(), Some(b"spdy/3".as_slice()));
    assert_eq!(observed.received, GO_AWAY_V3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_without_alpn_fails_negotiation() {
    let (addr, context, _server) = tls_server(&[]);
    let factory = started_factory(context);

    let err = factory
        .new_client(3)
        .unwrap()
        .connect(addr, Arc::new(()))
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap_err();

    match err {
        Error::ConnectFailed(inner) => assert!(matches!(*inner, Error::Negotiation { .. })),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(factory.session_count(), 0);
    eventually(|| factory.pending_negotiations() == 0).await;

    factory.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_without_common_protocol_fails_connect() {
    let (addr, context, _server) = tls_server(&["http/1.1"]);
    let factory = started_factory(context);

    let err = factory
        .new_client(3)
        .unwrap()
        .connect(addr, Arc::new(()))
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConnectFailed(_)));
    assert_eq!(factory.session_count(), 0);
    eventually(|| factory.pending_negotiations() == 0).await;

    factory.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_handshake() {
    // Accepts but never answers the ClientHello
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move { listener.accept().await.unwrap().0 });

    let (_, context, _server) = tls_server(&["spdy/3"]);
    let factory = started_factory(context);

    let promise = factory
        .new_client(3)
        .unwrap()
        .connect(addr, Arc::new(()))
        .unwrap();
    eventually(|| factory.pending_negotiations() == 1).await;
    assert!(!promise.is_done());

    assert!(promise.cancel());
    assert!(promise.cancel());
    assert!(promise.is_cancelled());
    assert!(promise.wait().await.unwrap_err().is_cancelled());

    let mut peer = silent.await.unwrap();
    let mut sink = Vec::new();
    tokio::time::timeout(WAIT, peer.read_to_end(&mut sink))
        .await
        .unwrap()
        .unwrap();

    eventually(|| factory.pending_negotiations() == 0).await;
    assert_eq!(factory.session_count(), 0);

    factory.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_notify_ends_stream_cleanly() -> anyhow::Result<()> {
    init_tracing();
    let (addr, roots, server) = closing_server(b"hello", true);

    let mut stream = connect_tls(addr, roots).await?;
    let (received, ended) = read_to_close(&mut stream).await;

    assert_eq!(received, b"hello");
    ended?;

    drop(stream);
    tokio::task::spawn_blocking(move || server.join().unwrap()).await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_without_close_notify_is_truncation() -> anyhow::Result<()> {
    init_tracing();
    let (addr, roots, server) = closing_server(b"hello", false);

    let mut stream = connect_tls(addr, roots).await?;
    let (received, ended) = read_to_close(&mut stream).await;

    assert_eq!(received, b"hello");
    assert_eq!(ended.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);

    drop(stream);
    tokio::task::spawn_blocking(move || server.join().unwrap()).await??;
    Ok(())
}
