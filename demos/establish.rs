//! Establish a channel, exchange a few frames and print the tree.
//!
//! Demonstrates:
//! - Building a service with a mode and an ignore list
//! - Establishing a channel with a custom observer
//! - Sending frames and watching the echo
//! - Exporting the structural tree as JSON
//!
//! Usage:
//!   cargo run --example establish -- ws://127.0.0.1:8080/echo
//!   cargo run --example establish -- ws://127.0.0.1:8080/echo --no-wait
//!   cargo run --example establish -- ws://127.0.0.1:8080/echo --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use ws_intercept::{
    ChannelInfo, ChannelObserver, ChannelState, HandshakeConfig, Initiator, MessageRecord, Opcode,
    OperatingMode, Result, WebSocketService,
};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_TARGET: &str = "ws://127.0.0.1:8080/";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    target: String,
    debug: bool,
    no_wait: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self {
            target: args
                .iter()
                .find(|a| !a.starts_with("--"))
                .cloned()
                .unwrap_or_else(|| DEFAULT_TARGET.to_string()),
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
        }
    }
}

/// Prints every frame and state change.
struct Printer;

impl ChannelObserver for Printer {
    fn on_message_frame(&self, channel: &ChannelInfo, message: &MessageRecord) -> bool {
        println!(
            "    {} {:?} {} {}",
            channel.id,
            message.direction,
            message.opcode,
            message.payload_text().unwrap_or("<binary>")
        );
        true
    }

    fn on_state_change(&self, state: ChannelState, channel: &ChannelInfo) {
        println!("    {} is {state}", channel.id);
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Establish ===\n");

    // ========================================================================
    // Create Service
    // ========================================================================

    println!("[1] Creating service...");

    let service = WebSocketService::builder()
        .mode(OperatingMode::Standard)
        .ignore_channel(r".*/telemetry")
        .build()?;

    println!("    ✓ Service ready ({})\n", service.mode());

    // ========================================================================
    // Establish
    // ========================================================================

    println!("[2] Establishing {}...", args.target);

    let config = HandshakeConfig::for_uri(&args.target)?.observer(Arc::new(Printer));
    let channel = service.establish(config).await?;

    println!("    ✓ Channel {} open", channel.id());
    if let Some(subprotocol) = &channel.info().subprotocol {
        println!("    Subprotocol: {subprotocol}");
    }
    println!();

    // ========================================================================
    // Exchange Frames
    // ========================================================================

    println!("[3] Sending frames...");

    channel.send(Opcode::Text, "hello", Initiator::ManualRequest).await?;
    channel.send(Opcode::Ping, "ping", Initiator::ManualRequest).await?;
    sleep(Duration::from_millis(500)).await;
    println!();

    // ========================================================================
    // Structure
    // ========================================================================

    println!("[4] Structural tree:");
    println!("{}\n", service.tree().read().snapshot()?);

    if !args.no_wait {
        println!("Press Ctrl+C to exit...");
        tokio::signal::ctrl_c().await.ok();
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    println!("\n[Cleanup] Shutting down...");
    service.shutdown().await;
    println!("          ✓ Done");

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug {
        "ws_intercept=debug"
    } else {
        "ws_intercept=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
