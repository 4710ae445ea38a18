//! Single-active-client registry for the WebSocket variant.
//!
//! Each adopted client gets two tasks: a writer draining a one-slot outgoing
//! queue into the socket, and a reader that only watches for close. Adopting
//! a new client closes the previous one first.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

pub(crate) type WsStream = WebSocketStream<TcpStream>;

/// How long a closing client gets to flush its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ── ClientConnection ──────────────────────────────────────────────────────────

/// Handle to one adopted WebSocket client. Closing (or dropping) it shuts
/// the socket down.
pub struct ClientConnection {
    id: u64,
    addr: SocketAddr,
    outgoing: mpsc::Sender<Bytes>,
    space: Arc<Notify>,
    open: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
}

impl ClientConnection {
    fn spawn(
        id: u64,
        addr: SocketAddr,
        ws: WsStream,
        closed_tx: mpsc::UnboundedSender<u64>,
    ) -> Self {
        let (sink, stream) = ws.split();
        let (outgoing, outgoing_rx) = mpsc::channel::<Bytes>(1);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let space = Arc::new(Notify::new());
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_loop(
            id,
            sink,
            outgoing_rx,
            shutdown_rx,
            Arc::clone(&space),
            Arc::clone(&open),
            closed_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop(id, stream, Arc::clone(&open), closed_tx));

        Self { id, addr, outgoing, space, open, shutdown: Some(shutdown), reader }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Room for one more message in the outgoing slot.
    pub fn has_capacity(&self) -> bool {
        self.outgoing.capacity() > 0
    }

    /// Notified each time the writer finishes sending a message.
    pub(crate) fn space_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.space)
    }

    /// Queue one binary message. `false` when the slot is occupied or the
    /// client is gone.
    pub fn try_send(&self, data: Bytes) -> bool {
        self.is_open() && self.outgoing.try_send(data).is_ok()
    }

    pub fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            self.reader.abort();
            debug!("Client #{} ({}) closed", self.id, self.addr);
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    id: u64,
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    mut shutdown_rx: oneshot::Receiver<()>,
    space: Arc<Notify>,
    open: Arc<AtomicBool>,
    closed_tx: mpsc::UnboundedSender<u64>,
) {
    loop {
        let data = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            msg = outgoing_rx.recv() => match msg {
                Some(data) => data,
                None => break,
            },
        };
        // A client that stops reading must not pin the socket open past
        // its eviction.
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            res = sink.send(Message::Binary(data.to_vec())) => {
                if let Err(e) = res {
                    debug!("Client #{} send failed: {}", id, e);
                    open.store(false, Ordering::Release);
                    let _ = closed_tx.send(id);
                    return;
                }
                space.notify_one();
            }
        }
    }
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        debug!("Client #{} did not complete the close handshake", id);
    }
}

async fn read_loop(
    id: u64,
    mut stream: SplitStream<WsStream>,
    open: Arc<AtomicBool>,
    closed_tx: mpsc::UnboundedSender<u64>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite on the next flush; anything
            // else from the client is ignored.
            Ok(_) => {}
            Err(e) => {
                debug!("Client #{} read error: {}", id, e);
                break;
            }
        }
    }
    open.store(false, Ordering::Release);
    let _ = closed_tx.send(id);
}

// ── ClientRegistry ────────────────────────────────────────────────────────────

/// Holds at most one active consumer.
#[derive(Default)]
pub struct ClientRegistry {
    active: Option<ClientConnection>,
    next_id: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ws` the sole active client, closing any previous one. Returns
    /// the new client's id.
    pub(crate) fn adopt(
        &mut self,
        ws: WsStream,
        addr: SocketAddr,
        closed_tx: mpsc::UnboundedSender<u64>,
    ) -> u64 {
        if let Some(mut previous) = self.active.take() {
            info!("Evicting client #{} ({}) for new client {}", previous.id, previous.addr, addr);
            previous.close();
        }
        self.next_id += 1;
        let id = self.next_id;
        self.active = Some(ClientConnection::spawn(id, addr, ws, closed_tx));
        info!("Client #{} connected from {}", id, addr);
        id
    }

    pub fn has_client(&self) -> bool {
        self.active.as_ref().is_some_and(ClientConnection::is_open)
    }

    pub fn active(&self) -> Option<&ClientConnection> {
        self.active.as_ref().filter(|c| c.is_open())
    }

    /// Forget client `id` if it is the active one. Stale ids from evicted
    /// clients are ignored.
    pub fn client_closed(&mut self, id: u64) -> bool {
        if self.active.as_ref().is_some_and(|c| c.id == id) {
            if let Some(mut client) = self.active.take() {
                info!("Client #{} ({}) disconnected", id, client.addr);
                client.close();
            }
            return true;
        }
        false
    }

    /// Forcibly close the active client. Returns whether one was open.
    pub fn reset(&mut self) -> bool {
        match self.active.take() {
            Some(mut client) => {
                let was_open = client.is_open();
                client.close();
                was_open
            }
            None => false,
        }
    }
}
