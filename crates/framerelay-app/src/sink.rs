//! Local stand-in consumer: accepts relay connections on a Unix socket and
//! logs every envelope it parses.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use framerelay_core::EnvelopeReader;
use tokio::io::AsyncRead;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::cli::SinkArgs;
use crate::stats::FpsCounter;

pub async fn run(args: SinkArgs) -> Result<()> {
    let path = args.socket_path();
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding {}", path.display()))?;
    info!("Sink listening on {}", path.display());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("accepting producer")?;
                info!("Producer connected");
                let max_payload = args.max_payload;
                tokio::spawn(async move {
                    match consume(stream, max_payload).await {
                        Ok(n) => info!("Producer disconnected after {} frames", n),
                        Err(e) => warn!("Producer stream error: {:#}", e),
                    }
                });
            }
        }
    }

    let _ = std::fs::remove_file(&path);
    info!("Sink stopped");
    Ok(())
}

/// Read envelopes until the producer disconnects. Returns the number of
/// frames received.
pub async fn consume<R: AsyncRead + Unpin>(stream: R, max_payload: usize) -> Result<u64> {
    let mut reader = EnvelopeReader::new(stream).with_max_payload(max_payload);
    let mut fps = FpsCounter::new();
    let mut last_report = Instant::now();
    let mut last_index = 0u64;
    let mut received = 0u64;

    while let Some((header, payload)) = reader.next_envelope().await? {
        if header.frame_index <= last_index {
            warn!("Frame index went backwards: #{} after #{}", header.frame_index, last_index);
        } else if last_index != 0 && header.frame_index > last_index + 1 {
            debug!("Indices {}..{} never arrived", last_index + 1, header.frame_index);
        }
        last_index = header.frame_index;
        received += 1;
        fps.tick();

        debug!(
            "Frame #{}: {} {} bytes t={:.3} rotate {}°{}",
            header.frame_index,
            header.content_type,
            payload.len(),
            header.timestamp,
            header.orientation.rotation_degrees(),
            if header.orientation.is_mirrored() { " mirrored" } else { "" }
        );
        if last_report.elapsed() >= Duration::from_secs(1) {
            info!(
                "Receiving {:.1} fps, last frame #{} ({} bytes)",
                fps.fps(),
                header.frame_index,
                payload.len()
            );
            last_report = Instant::now();
        }
    }
    Ok(received)
}
