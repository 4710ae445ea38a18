use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use framerelay_core::{RelayConfig, Target};
use framerelay_service::FrameSkipper;

#[derive(Parser, Debug)]
#[command(name = "framerelay")]
#[command(about = "Relay encoded frames to a single local consumer", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture synthetic frames, JPEG-encode them and relay them
    Send(SendArgs),
    /// Listen on a Unix socket and log the envelopes a relay delivers
    Sink(SinkArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Unix socket to dial [default: <tmp>/rtc_SSFD]
    #[arg(long, env = "FRAMERELAY_SOCKET", conflicts_with = "ws_port")]
    pub socket: Option<PathBuf>,

    /// Serve WebSocket clients on this port instead of dialing a socket
    #[arg(long, env = "FRAMERELAY_WS_PORT")]
    pub ws_port: Option<u16>,

    #[arg(long, env = "FRAMERELAY_WS_BIND", default_value = "0.0.0.0")]
    pub ws_bind: IpAddr,

    #[arg(long, env = "FRAMERELAY_CAPTURE_FPS", default_value_t = 24)]
    pub capture_fps: u32,

    /// Delivered frame rate; the capture rate is divided down to it
    #[arg(long, env = "FRAMERELAY_TARGET_FPS", default_value_t = 8)]
    pub target_fps: u32,

    /// Forward every Nth frame (overrides --target-fps)
    #[arg(long, env = "FRAMERELAY_DIVISOR")]
    pub divisor: Option<u32>,

    #[arg(long, env = "FRAMERELAY_QUALITY", default_value_t = 70)]
    pub quality: u8,

    /// Downscale factor applied before compression
    #[arg(long, env = "FRAMERELAY_SCALE", default_value_t = 0.5)]
    pub scale: f32,

    #[arg(long, env = "FRAMERELAY_WIDTH", default_value_t = 1280)]
    pub width: u32,

    #[arg(long, env = "FRAMERELAY_HEIGHT", default_value_t = 720)]
    pub height: u32,

    /// Stop after this many captured frames
    #[arg(long, env = "FRAMERELAY_FRAME_LIMIT")]
    pub frame_limit: Option<u64>,

    /// JSON file holding relay tuning (chunkSize, maxReconnectAttempts, ...)
    #[arg(long, env = "FRAMERELAY_CONFIG")]
    pub config: Option<PathBuf>,
}

impl SendArgs {
    pub fn target(&self) -> Target {
        match self.ws_port {
            Some(port) => Target::WebSocket { port, bind: self.ws_bind },
            None => Target::unix(self.socket.clone().unwrap_or_else(default_socket)),
        }
    }

    pub fn skipper(&self) -> FrameSkipper {
        match self.divisor {
            Some(d) => FrameSkipper::new(d),
            None => FrameSkipper::for_rates(self.capture_fps, self.target_fps),
        }
    }

    pub fn relay_config(&self) -> Result<RelayConfig> {
        load_relay_config(self.config.as_deref())
    }
}

#[derive(Args, Debug, Clone)]
pub struct SinkArgs {
    /// Socket path to listen on [default: <tmp>/rtc_SSFD]
    #[arg(long, env = "FRAMERELAY_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Largest payload accepted, in bytes
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub max_payload: usize,
}

impl SinkArgs {
    pub fn socket_path(&self) -> PathBuf {
        self.socket.clone().unwrap_or_else(default_socket)
    }
}

fn default_socket() -> PathBuf {
    Target::default_socket_path(std::env::temp_dir())
}

/// Defaults when `path` is `None`; otherwise the file must parse and validate.
pub fn load_relay_config(path: Option<&Path>) -> Result<RelayConfig> {
    let Some(path) = path else {
        return Ok(RelayConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading relay config {}", path.display()))?;
    let config: RelayConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing relay config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
