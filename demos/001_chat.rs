//! Basic namespace connection and events.
//!
//! Demonstrates:
//! - Connecting to the default namespace
//! - Listening for `connect`, `disconnect` and custom events
//! - Emitting events, before and after the handshake
//!
//! Usage:
//!   cargo run --example 001_chat
//!   cargo run --example 001_chat -- --url http://localhost:3000
//!   cargo run --example 001_chat -- --debug --no-wait

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use sockeye::{ConnectOptions, Result, Value};

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
    println!("=== 001: Chat ===\n");

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[1] Connecting to {}...", args.url);
    let socket = sockeye::connect(&args.url, ConnectOptions::new())?;

    socket.on("connect", |_| println!("    ✓ Connected"));
    socket.on("connect_error", |message| {
        println!("    ✗ Connection refused: {:?}", message.args);
    });
    socket.on("disconnect", |message| {
        println!("    Disconnected: {:?}", message.args);
    });
    socket.on("chat message", |message| {
        println!("    <- {:?}", message.args);
    });

    // ========================================================================
    // Emit
    // ========================================================================

    // Buffered until the namespace handshake completes.
    println!("[2] Sending greeting...");
    socket.emit("chat message", vec![Value::from("hello from sockeye")])?;

    common::wait_for_exit(args.no_wait).await;

    socket.disconnect();
    println!("\n=== Done ===");
    Ok(())
}
