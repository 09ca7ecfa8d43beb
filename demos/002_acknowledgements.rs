//! Acknowledgements, timeouts and the retry queue.
//!
//! Demonstrates:
//! - Awaiting an acknowledgement
//! - Per-emit timeouts
//! - Answering acknowledgements requested by the server
//! - Guaranteed delivery with `retries`
//!
//! Usage:
//!   cargo run --example 002_acknowledgements
//!   cargo run --example 002_acknowledgements -- --debug --no-wait

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::Context;
use common::Args;
use sockeye::{ConnectOptions, SocketOptions, Value};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init_logging(args.debug);

    println!("=== 002: Acknowledgements ===\n");

    let options = ConnectOptions::new().with_socket(
        SocketOptions::new()
            .with_retries(3)
            .with_ack_timeout(Duration::from_secs(2)),
    );
    let socket = sockeye::connect(&args.url, options).context("invalid server URL")?;

    // ========================================================================
    // Server -> client
    // ========================================================================

    socket.on("ping", |message| {
        if let Some(ack) = message.ack {
            ack.send(vec![Value::from("pong")]);
        }
    });

    // ========================================================================
    // Client -> server
    // ========================================================================

    println!("[1] Awaiting acknowledgement...");
    match socket
        .timeout(Duration::from_secs(5))
        .emit_await("hello", vec![Value::from("world")])
        .await
    {
        Ok(reply) => println!("    ✓ Server replied: {reply:?}"),
        Err(e) if e.is_timeout() => println!("    ✗ No reply in time"),
        Err(e) => return Err(e).context("emit failed"),
    }

    println!("[2] Callback style...");
    socket.emit_with_ack("hello", vec![Value::from(42_i64)], |result| match result {
        Ok(reply) => println!("    ✓ Callback got {reply:?}"),
        Err(e) => println!("    ✗ Callback failed: {e}"),
    })?;

    common::wait_for_exit(args.no_wait).await;
    socket.disconnect();
    Ok(())
}
