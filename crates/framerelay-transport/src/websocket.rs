//! Local WebSocket **server** (WebSocket variant).
//!
//! Binds a TCP port (8766 by default) and serves exactly one client at a
//! time. Each frame is one binary message carrying the raw JPEG payload, no
//! envelope headers, so a web view can hand it straight to an `<img>`/blob.
//!
//! ```text
//! connect(ws://0.0.0.0:8766) ─► bind listener            (relay: waiting for consumer)
//! client handshake          ─► ClientRegistry::adopt    ─► TransportEvent::Open
//! client closes             ─► ClientRegistry forget    ─► TransportEvent::PeerLost
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use framerelay_core::{CloseReason, ConnectError, Target, WriteError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::registry::{ClientRegistry, WsStream};
use crate::{wrong_target, Framing, Transport, TransportEvent};

type Handshake = (u64, WsStream, SocketAddr);

// ── WebSocketTransport ────────────────────────────────────────────────────────

pub struct WebSocketTransport {
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    /// Bumped per bind so handshakes finishing after a rebind are discarded.
    generation: u64,
    registry: ClientRegistry,
    handshake_tx: mpsc::UnboundedSender<Handshake>,
    handshake_rx: mpsc::UnboundedReceiver<Handshake>,
    closed_tx: mpsc::UnboundedSender<u64>,
    closed_rx: mpsc::UnboundedReceiver<u64>,
    pending_open: bool,
    announced: bool,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        Self {
            listener: None,
            local_addr: None,
            generation: 0,
            registry: ClientRegistry::new(),
            handshake_tx,
            handshake_rx,
            closed_tx,
            closed_rx,
            pending_open: false,
            announced: false,
        }
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    fn spawn_handshake(&self, tcp: TcpStream, addr: SocketAddr) {
        let tx = self.handshake_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let _ = tcp.set_nodelay(true);
            match tokio_tungstenite::accept_async(tcp).await {
                Ok(ws) => {
                    let _ = tx.send((generation, ws, addr));
                }
                Err(e) => debug!("WebSocket handshake from {} failed: {}", addr, e),
            }
        });
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn notified(space: Option<Arc<Notify>>) {
    if let Some(space) = space {
        space.notified().await;
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self, target: &Target) -> Result<(), ConnectError> {
        self.close();

        let Target::WebSocket { port, bind } = target else {
            return Err(wrong_target("WebSocket", target));
        };

        let listener = TcpListener::bind((*bind, *port))
            .await
            .map_err(|e| ConnectError::from_io(target.to_string(), e))?;
        self.local_addr = listener.local_addr().ok();
        self.generation += 1;
        self.listener = Some(listener);

        info!("WebSocket frame server listening on {:?}", self.local_addr);
        Ok(())
    }

    async fn ready(&mut self, want_write: bool) -> TransportEvent {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return TransportEvent::Closed(CloseReason::NotConnected);
            };

            if self.pending_open {
                self.pending_open = false;
                self.announced = true;
                return TransportEvent::Open;
            }
            if self.announced && !self.registry.has_client() {
                self.announced = false;
                return TransportEvent::PeerLost;
            }

            let space = match self.registry.active() {
                Some(client) if want_write => {
                    if client.has_capacity() {
                        return TransportEvent::SpaceAvailable;
                    }
                    Some(client.space_notify())
                }
                _ => None,
            };
            let watch_space = space.is_some();

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((tcp, addr)) => {
                        debug!("Incoming TCP connection from {}", addr);
                        self.spawn_handshake(tcp, addr);
                    }
                    Err(e) => {
                        warn!("WebSocket accept failed: {}", e);
                        return TransportEvent::Closed(e.into());
                    }
                },
                Some((generation, ws, addr)) = self.handshake_rx.recv() => {
                    if generation == self.generation {
                        self.registry.adopt(ws, addr, self.closed_tx.clone());
                        self.pending_open = true;
                    }
                }
                Some(id) = self.closed_rx.recv() => {
                    self.registry.client_closed(id);
                }
                _ = notified(space), if watch_space => {}
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        if self.listener.is_none() {
            return Err(WriteError::NotConnected);
        }
        // No client, or its slot is occupied: nothing accepted. A vanished
        // client surfaces as `PeerLost` on the next `ready`.
        match self.registry.active() {
            Some(client) if client.try_send(Bytes::copy_from_slice(buf)) => Ok(buf.len()),
            _ => Ok(0),
        }
    }

    fn close(&mut self) {
        self.registry.reset();
        self.pending_open = false;
        self.announced = false;
        if self.listener.take().is_some() {
            info!("WebSocket frame server on {:?} stopped", self.local_addr);
        }
    }

    fn framing(&self) -> Framing {
        Framing::RawPayload
    }

    fn has_peer(&self) -> bool {
        self.registry.has_client()
    }

    fn reset_peer(&mut self) {
        if self.registry.reset() {
            info!("Active WebSocket client reset");
        }
    }
}
