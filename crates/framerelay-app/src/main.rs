//! FrameRelay — relays encoded frames to one local consumer.
//!
//! ```text
//! framerelay send   capture → JPEG → relay ──► Unix socket (rtc_SSFD)
//!                                          └─► WebSocket clients (:8766)
//! framerelay sink   Unix socket listener that logs received envelopes
//! ```
//!
//! Every option can also be set through a `FRAMERELAY_*` environment
//! variable; `RUST_LOG=debug` logs each frame.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod capture;
mod cli;
mod pipeline;
#[cfg(unix)]
mod sink;
mod stats;

use cli::{Cli, Command, SinkArgs};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    info!("FrameRelay v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Command::Send(args) => pipeline::run(args).await,
        Command::Sink(args) => run_sink(args).await,
    };

    match result {
        Ok(()) => {
            info!("FrameRelay exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

#[cfg(unix)]
async fn run_sink(args: SinkArgs) -> Result<()> {
    sink::run(args).await
}

#[cfg(not(unix))]
async fn run_sink(_args: SinkArgs) -> Result<()> {
    anyhow::bail!("the sink needs Unix-domain sockets")
}
