//! Connect and frame-parsing benchmark suite.
//!
//! Benchmarks session establishment and parser throughput:
//! - Concurrent connects: 1, 16, 64 sessions over loopback
//! - Parser input: PING/SETTINGS streams split into 1 KiB reads
//!
//! Run with: cargo bench --bench connect
//! Results saved to: target/criterion/

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use spdy_client::protocol::{
    CompressionFactory, Frame, FrameListener, Generator, IdentityCompressionFactory, Parser,
    Setting,
};
use spdy_client::transport::BufferPool;
use spdy_client::{ClientFactory, Version};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const SESSION_COUNTS: &[usize] = &[1, 16, 64];
const FRAME_COUNTS: &[usize] = &[100, 1_000];
const READ_SIZE: usize = 1024;

// ============================================================================
// Benchmark: Session Connect
// ============================================================================

fn bench_session_connect(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (factory, addr) = rt.block_on(async {
        let factory = ClientFactory::builder()
            .executor(tokio::runtime::Handle::current())
            .build()
            .unwrap();
        factory.start().unwrap();
        (factory, sink_server().await)
    });
    let client = factory.new_client(3).unwrap();

    let mut group = c.benchmark_group("session_connect");
    group.sample_size(20);

    for &count in SESSION_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("concurrent", count), &count, |b, &n| {
            b.to_async(&rt).iter(|| async {
                let promises: Vec<_> = (0..n)
                    .map(|_| client.connect(addr, Arc::new(())).unwrap().into_future())
                    .collect();
                let sessions = futures_util::future::try_join_all(promises)
                    .await
                    .unwrap();
                for session in &sessions {
                    session.close();
                }
            });
        });
    }

    group.finish();
    factory.stop();
}

// ============================================================================
// Benchmark: Frame Parsing
// ============================================================================

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");

    for &count in FRAME_COUNTS {
        let bytes = frame_stream(count);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("chunked", count), &bytes, |b, bytes| {
            b.iter(|| {
                let mut parser = Parser::new(IdentityCompressionFactory.new_decompressor());
                parser.add_listener(Arc::new(Discard));
                let mut delivered = 0;
                for piece in bytes.chunks(READ_SIZE) {
                    delivered += parser.parse(piece).unwrap();
                }
                assert_eq!(delivered, count);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Accepts connections forever, reading each to EOF.
async fn sink_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; READ_SIZE];
                while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });

    addr
}

fn frame_stream(count: usize) -> Vec<u8> {
    let mut generator = Generator::new(
        Arc::new(BufferPool::default()),
        IdentityCompressionFactory.new_compressor(),
    );

    (0..count)
        .flat_map(|i| {
            let frame = if i % 2 == 0 {
                Frame::Ping { id: i as u32 }
            } else {
                Frame::Settings {
                    clear: false,
                    entries: vec![Setting {
                        id: 7,
                        flags: 0,
                        value: 65_536,
                    }],
                }
            };
            generator.generate(Version::V3, &frame).unwrap()
        })
        .collect()
}

struct Discard;

impl FrameListener for Discard {
    fn on_frame(&self, _version: Option<Version>, _frame: Frame) {}
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_session_connect, bench_frame_parse);
criterion_main!(benches);
