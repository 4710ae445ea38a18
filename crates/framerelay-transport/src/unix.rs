//! Unix-domain stream socket **dialer** (socket variant).
//!
//! The conferencing extension listens on `<container>/rtc_SSFD`; this
//! transport connects to it and carries concatenated envelopes. Writes use
//! `try_write` so the relay task is never blocked by a slow consumer, and
//! write-space is signalled through tokio's readiness API.

use std::path::PathBuf;

use async_trait::async_trait;
use framerelay_core::{CloseReason, ConnectError, Target, WriteError};
use tokio::io::Interest;
use tokio::net::UnixStream;
use tracing::{debug, info};

use crate::{wrong_target, Framing, Transport, TransportEvent};

/// Consumers do not talk back; anything they send is read and discarded so
/// the kernel buffer never fills and EOF is noticed promptly.
const SCRATCH_BYTES: usize = 512;

// ── UnixSocketTransport ───────────────────────────────────────────────────────

pub struct UnixSocketTransport {
    stream: Option<UnixStream>,
    path: Option<PathBuf>,
    pending_open: bool,
    scratch: Vec<u8>,
}

impl UnixSocketTransport {
    pub fn new() -> Self {
        Self { stream: None, path: None, pending_open: false, scratch: vec![0; SCRATCH_BYTES] }
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Socket path of the current (or last) connection.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Default for UnixSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn connect(&mut self, target: &Target) -> Result<(), ConnectError> {
        self.close();

        let Target::UnixSocket { path } = target else {
            return Err(wrong_target("Unix socket", target));
        };

        if !target.exists() {
            return Err(ConnectError::TargetUnavailable {
                target: target.to_string(),
                reason: "socket file not present".into(),
            });
        }

        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| ConnectError::from_io(target.to_string(), e))?;

        info!("Connected to {}", target);
        self.stream = Some(stream);
        self.path = Some(path.clone());
        self.pending_open = true;
        Ok(())
    }

    async fn ready(&mut self, want_write: bool) -> TransportEvent {
        if self.pending_open {
            self.pending_open = false;
            return TransportEvent::Open;
        }

        let Some(stream) = self.stream.as_ref() else {
            return TransportEvent::Closed(CloseReason::NotConnected);
        };

        let interest = if want_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        loop {
            let ready = match stream.ready(interest).await {
                Ok(r) => r,
                Err(e) => return TransportEvent::Closed(e.into()),
            };

            if ready.is_readable() || ready.is_read_closed() {
                match stream.try_read(&mut self.scratch) {
                    Ok(0) => return TransportEvent::Closed(CloseReason::PeerClosed),
                    Ok(n) => debug!("Discarded {} bytes from consumer", n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return TransportEvent::Closed(e.into()),
                }
            }

            if ready.is_write_closed() {
                return TransportEvent::Closed(CloseReason::PeerClosed);
            }
            if want_write && ready.is_writable() {
                return TransportEvent::SpaceAvailable;
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        let stream = self.stream.as_ref().ok_or(WriteError::NotConnected)?;
        match stream.try_write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(WriteError::Io(e)),
        }
    }

    fn close(&mut self) {
        self.pending_open = false;
        if let Some(stream) = self.stream.take() {
            // Dropping the stream closes the descriptor immediately so the
            // same path can be dialed again by the next session.
            drop(stream);
            debug!("Closed Unix socket {:?}", self.path);
        }
    }

    fn framing(&self) -> Framing {
        Framing::Envelope
    }

    fn has_peer(&self) -> bool {
        self.stream.is_some()
    }
}
