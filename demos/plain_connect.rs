//! Plain TCP connect and factory shutdown.
//!
//! Demonstrates:
//! - Building and starting a factory on the current runtime
//! - Connecting a client and awaiting the session promise
//! - Session-level callbacks (SETTINGS, PING, close)
//! - Stopping the factory, which sends GOAWAY on every session
//!
//! Usage:
//!   cargo run --example plain_connect
//!   cargo run --example plain_connect -- --no-wait
//!   cargo run --example plain_connect -- --debug
//!   cargo run --example plain_connect -- --spdy2

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use common::Args;
use spdy_client::protocol::Setting;
use spdy_client::{ClientFactory, Result, Session, SessionFrameListener};

// ============================================================================
// Listener
// ============================================================================

struct Printer;

impl SessionFrameListener for Printer {
    fn on_settings(&self, session: &Session, _clear: bool, settings: &[Setting]) {
        println!(
            "        [session {}] SETTINGS {settings:?}, window now {}",
            session.id(),
            session.window_size()
        );
    }

    fn on_ping(&self, session: &Session, id: u32) {
        println!("        [session {}] PING {id}", session.id());
    }

    fn on_closed(&self, session: &Session) {
        println!("        [session {}] closed", session.id());
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Plain Connect ===\n");

    // ========================================================================
    // Start Factory
    // ========================================================================

    println!("[Setup] Starting factory...");
    let factory = ClientFactory::builder()
        .executor(tokio::runtime::Handle::current())
        .idle_timeout(Duration::from_secs(10))
        .build()?;
    factory.start()?;
    println!("        ✓ Running, idle timeout {:?}\n", factory.idle_timeout());

    let addr = common::loopback_peer(args.version).await?;

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[Connect] SPDY/{} to {addr}...", args.version);
    let client = factory.new_client(args.version)?;
    let session = client
        .connect(addr, Arc::new(Printer))?
        .wait_timeout(Duration::from_secs(5))
        .await?;
    println!(
        "        ✓ Session {} ({}, flow control {:?})\n",
        session.id(),
        session.version(),
        session.flow_control_strategy().kind()
    );

    let id = session.ping()?;
    println!("[Ping] Sent PING {id}\n");
    tokio::time::sleep(Duration::from_millis(200)).await;

    common::wait_for_exit(args.no_wait).await;

    // ========================================================================
    // Stop
    // ========================================================================

    println!("\n[Shutdown] Stopping factory...");
    factory.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!(
        "        ✓ GOAWAY sent: {}, sessions left: {}",
        session.is_go_away_sent(),
        factory.session_count()
    );

    println!("\n=== Done ===");
    Ok(())
}
