//! Sender pipeline: capture → skip → encode → relay.
//!
//! ```text
//! SyntheticCapture ──► FrameSkipper ──► JpegEncoder ──► FrameRelay ──► consumer
//!   (capture fps)       (every Nth)      (quality,        (one frame
//!                                          scale)          in flight)
//! ```
//!
//! Frames the relay rejects are simply dropped; the next capture replaces
//! them. While an envelope is still draining the frame is skipped before
//! compression. Encoding runs on the blocking pool. Once per second the
//! relay stats are logged.

use std::time::Duration;

use anyhow::{Context, Result};
use framerelay_core::{RelayConfig, RelayState, Target};
use framerelay_service::{FrameEncoder, FrameRelay, JpegEncoder};
#[cfg(unix)]
use framerelay_transport::UnixSocketTransport;
use framerelay_transport::WebSocketTransport;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::capture::SyntheticCapture;
use crate::cli::SendArgs;
use crate::stats::FpsCounter;

pub async fn run(args: SendArgs) -> Result<()> {
    let target = args.target();
    let encoder = JpegEncoder::new(args.quality, args.scale);
    let mut config = args.relay_config()?;
    config.content_type = encoder.content_type().to_owned();

    let relay = build_relay(&target, config)?;
    let mut skipper = args.skipper();
    let mut capture =
        SyntheticCapture::new(args.width, args.height, args.capture_fps, args.frame_limit);

    let (out_w, out_h) = encoder.output_size(args.width, args.height);
    info!(
        "Capturing {}x{} @ {} fps → every {} frame(s), JPEG q{} {}x{} → {}",
        args.width,
        args.height,
        args.capture_fps,
        skipper.divisor(),
        encoder.quality(),
        out_w,
        out_h,
        target
    );

    relay.start(target.clone()).await.context("starting relay")?;
    let state_log = tokio::spawn(log_states(relay.subscribe()));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stats_tick = tokio::time::interval(Duration::from_secs(1));
    let mut fps = FpsCounter::new();
    let mut skipped_busy = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted; stopping relay");
                break;
            }

            maybe_raw = capture.next_frame() => {
                let Some(raw) = maybe_raw else {
                    info!("Capture finished after {} frames", capture.produced());
                    break;
                };
                if !skipper.should_send() {
                    continue;
                }
                if !worth_encoding(relay.is_ready(), &relay.state()) {
                    skipped_busy += 1;
                    continue;
                }
                let mut enc = encoder.clone();
                match tokio::task::spawn_blocking(move || enc.encode(&raw)).await {
                    Ok(Ok(jpeg)) => {
                        if relay.submit_frame(jpeg) {
                            fps.tick();
                        }
                    }
                    Ok(Err(e)) => warn!("Encode failed: {}", e),
                    Err(e) => warn!("Encode task failed: {}", e),
                }
            }

            _ = stats_tick.tick() => {
                let stats = relay.stats();
                info!(
                    "{} | {:.1} fps | sent {} dropped {} busy {} skipped {} reconnects {}",
                    stats.status_line(),
                    fps.fps(),
                    stats.frames_sent,
                    stats.frames_dropped,
                    stats.busy_rejections,
                    skipped_busy,
                    stats.reconnect_attempts,
                );
                if !stats.is_running {
                    warn!(
                        "Relay gave up on {}: {}",
                        target,
                        stats.last_error.as_deref().unwrap_or("unknown error")
                    );
                    break;
                }
            }
        }
    }

    relay.stop().await;
    state_log.abort();

    let stats = relay.stats();
    info!(
        "Session summary: sent {} dropped {} busy {} skipped before encode {}",
        stats.frames_sent, stats.frames_dropped, stats.busy_rejections, skipped_busy
    );
    Ok(())
}

/// Whether a captured frame should be compressed now. A parked lazy relay
/// still needs the submission to reconnect.
fn worth_encoding(ready: bool, state: &RelayState) -> bool {
    ready || *state == RelayState::Disconnected
}

fn build_relay(target: &Target, config: RelayConfig) -> Result<FrameRelay> {
    let relay = match target {
        #[cfg(unix)]
        Target::UnixSocket { .. } => FrameRelay::new(UnixSocketTransport::new(), config)?,
        #[cfg(not(unix))]
        Target::UnixSocket { .. } => {
            anyhow::bail!("Unix sockets are not available on this platform")
        }
        Target::WebSocket { .. } => FrameRelay::new(WebSocketTransport::new(), config)?,
    };
    Ok(relay)
}

async fn log_states(mut states: watch::Receiver<RelayState>) {
    while states.changed().await.is_ok() {
        let label = states.borrow_and_update().label();
        info!("Relay: {}", label);
    }
}
