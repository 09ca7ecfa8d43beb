//! Several namespaces over one connection.
//!
//! Demonstrates:
//! - Sharing a manager through a `Client` registry
//! - Manager lifecycle events
//! - Forcing a dedicated manager
//!
//! Usage:
//!   cargo run --example 003_multiplexing
//!   cargo run --example 003_multiplexing -- --debug --no-wait

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use sockeye::{Client, ConnectOptions, ManagerEvent, Result};

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
    println!("=== 003: Multiplexing ===\n");

    let client = Client::new();
    let base = args.url.trim_end_matches('/');

    // ========================================================================
    // Shared manager
    // ========================================================================

    println!("[1] Connecting /chat and /news...");
    let chat = client.connect(&format!("{base}/chat"), ConnectOptions::new())?;
    let news = client.connect(&format!("{base}/news"), ConnectOptions::new())?;
    println!("    Same manager: {}", chat.manager() == news.manager());

    chat.manager().on("reconnect_attempt", |event| {
        if let ManagerEvent::ReconnectAttempt { attempt } = event {
            println!("    Reconnect attempt {attempt}");
        }
    });
    chat.manager().on("reconnect", |_| println!("    ✓ Reconnected"));

    // ========================================================================
    // Dedicated manager
    // ========================================================================

    println!("[2] Connecting /chat again...");
    let again = client.connect(&format!("{base}/chat"), ConnectOptions::new())?;
    println!("    Dedicated manager: {}", again.manager() != chat.manager());

    common::wait_for_exit(args.no_wait).await;

    chat.disconnect();
    news.disconnect();
    again.disconnect();
    for key in client.keys() {
        client.evict(&key);
    }
    println!("\n=== Done ===");
    Ok(())
}
