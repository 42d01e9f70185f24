//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization
//! - A loopback SPDY peer

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
    pub no_wait: bool,
    pub version: u16,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
            version: if args.iter().any(|a| a == "--spdy2") { 2 } else { 3 },
        }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "spdy_client=debug"
    } else {
        "spdy_client=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

/// Wait for Ctrl+C or skip if `--no-wait` flag is set.
pub async fn wait_for_exit(no_wait: bool) {
    if no_wait {
        println!("[--no-wait] Skipping wait");
        return;
    }

    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();
}

/// Starts a loopback peer that greets each connection with SETTINGS and a
/// PING, then prints every frame header it receives.
pub async fn loopback_peer(version: u16) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let v = version as u8;

    tokio::spawn(async move {
        while let Ok((mut stream, peer)) = listener.accept().await {
            tokio::spawn(async move {
                println!("        [peer] Accepted {peer}");

                // SETTINGS: one INITIAL_WINDOW_SIZE entry of 131072
                let settings = match v {
                    2 => [0x80, v, 0, 4, 0, 0, 0, 12, 0, 0, 0, 1, 7, 0, 0, 0, 0, 2, 0, 0],
                    _ => [0x80, v, 0, 4, 0, 0, 0, 12, 0, 0, 0, 1, 0, 0, 0, 7, 0, 2, 0, 0],
                };
                let ping = [0x80, v, 0, 6, 0, 0, 0, 4, 0, 0, 0, 2];
                if stream.write_all(&settings).await.is_err()
                    || stream.write_all(&ping).await.is_err()
                {
                    return;
                }

                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    println!("        [peer] Received {n} bytes: {:02x?}", &buf[..n.min(16)]);
                }
                println!("        [peer] Closed {peer}");
            });
        }
    });

    Ok(addr)
}
