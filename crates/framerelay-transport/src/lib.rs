//! framerelay-transport — byte transports between the relay and its consumer.
//!
//! # Variants
//!
//! ```text
//! FrameRelay ── UnixSocketTransport ──► <container>/rtc_SSFD   (envelope stream)
//! FrameRelay ── WebSocketTransport  ◄── ws://127.0.0.1:8766     (one binary message per frame)
//! ```
//!
//! Both implement [`Transport`]. The relay task owns the transport
//! exclusively and drives it through [`Transport::ready`], which replaces the
//! `didOpen` / `hasSpaceAvailable` / `didClose` callbacks of platform stream
//! APIs with an awaited [`TransportEvent`].

use async_trait::async_trait;
use framerelay_core::{CloseReason, ConnectError, Target, WriteError};

pub mod registry;
#[cfg(unix)]
pub mod unix;
pub mod websocket;

pub use registry::{ClientConnection, ClientRegistry};
#[cfg(unix)]
pub use unix::UnixSocketTransport;
pub use websocket::WebSocketTransport;

// MARK: - Events

/// State change reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A consumer is attached and writes may begin.
    Open,
    /// The transport can accept more bytes.
    SpaceAvailable,
    /// The consumer went away but the transport itself is still up
    /// (listener variant); wait for the next `Open`.
    PeerLost,
    /// The transport failed or was closed; reconnection policy applies.
    Closed(CloseReason),
}

/// How the relay must frame bytes for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Stream transport: envelopes, written in bounded chunks.
    Envelope,
    /// Message transport: raw payload, one write per frame, accepted whole
    /// or not at all.
    RawPayload,
}

// MARK: - Transport trait

/// Ordered, reliable byte path to exactly one consumer.
///
/// Implementations:
/// - [`UnixSocketTransport`] — dials a Unix-domain stream socket
/// - [`WebSocketTransport`] — listens on a TCP port, serves one client
#[async_trait]
pub trait Transport: Send {
    /// Establish the transport, tearing down any previous one first.
    async fn connect(&mut self, target: &Target) -> Result<(), ConnectError>;

    /// Wait for the next event. With `want_write == false` the transport only
    /// watches for open/close, so an idle relay never spins.
    ///
    /// Must be cancel-safe: the relay drops this future whenever another
    /// branch of its event loop fires.
    async fn ready(&mut self, want_write: bool) -> TransportEvent;

    /// Write as much of `buf` as fits without blocking; `Ok(0)` means "no
    /// space right now".
    fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError>;

    /// Release every resource. No-op when already closed.
    fn close(&mut self);

    fn framing(&self) -> Framing;

    /// Whether a consumer is currently attached.
    fn has_peer(&self) -> bool;

    /// Drop the current consumer. Listener transports keep listening;
    /// dialing transports close outright.
    fn reset_peer(&mut self) {
        self.close();
    }
}

pub(crate) fn wrong_target(expected: &str, target: &Target) -> ConnectError {
    ConnectError::TransportError {
        target: target.to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{expected} transport cannot serve {target}"),
        ),
    }
}
