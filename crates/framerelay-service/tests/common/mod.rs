//! Shared helpers for relay integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use framerelay_core::{CloseReason, ConnectError, RelayConfig, Target, WriteError};
use framerelay_transport::{Framing, Transport, TransportEvent};
use tokio::sync::mpsc;

// ── Scripted transport ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockState {
    pub connect_calls: u32,
    /// Whether `connect` succeeds.
    pub available: bool,
    /// Bytes the next writes may accept in total.
    pub write_budget: usize,
    /// Byte count accepted by each write call.
    pub writes: Vec<usize>,
    pub written: Vec<u8>,
}

/// Transport whose events are injected by the test through [`MockHandle`].
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    connected: bool,
    pending_open: bool,
}

#[derive(Clone)]
pub struct MockHandle {
    pub state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

pub fn mock(available: bool) -> (MockTransport, MockHandle) {
    let state = Arc::new(Mutex::new(MockState {
        connect_calls: 0,
        available,
        write_budget: 0,
        writes: Vec::new(),
        written: Vec::new(),
    }));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockTransport {
            state: Arc::clone(&state),
            events: rx,
            connected: false,
            pending_open: false,
        },
        MockHandle { state, events: tx },
    )
}

impl MockHandle {
    /// Grant `budget` more bytes and signal write space.
    pub fn space(&self, budget: usize) {
        self.state.lock().unwrap().write_budget += budget;
        let _ = self.events.send(TransportEvent::SpaceAvailable);
    }

    /// Announce a new consumer on the already-open transport.
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Open);
    }

    pub fn fail(&self, reason: CloseReason) {
        let _ = self.events.send(TransportEvent::Closed(reason));
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().available = available;
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.lock().unwrap().connect_calls
    }

    pub fn writes(&self) -> Vec<usize> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn clear_written(&self) {
        let mut s = self.state.lock().unwrap();
        s.written.clear();
        s.writes.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, target: &Target) -> Result<(), ConnectError> {
        self.close();
        let mut s = self.state.lock().unwrap();
        s.connect_calls += 1;
        if !s.available {
            return Err(ConnectError::TargetUnavailable {
                target: target.to_string(),
                reason: "mock target absent".into(),
            });
        }
        self.connected = true;
        self.pending_open = true;
        Ok(())
    }

    async fn ready(&mut self, _want_write: bool) -> TransportEvent {
        if !self.connected {
            return TransportEvent::Closed(CloseReason::NotConnected);
        }
        if self.pending_open {
            self.pending_open = false;
            return TransportEvent::Open;
        }
        match self.events.recv().await {
            Some(ev) => {
                if matches!(ev, TransportEvent::Closed(_)) {
                    self.connected = false;
                }
                ev
            }
            None => std::future::pending().await,
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        if !self.connected {
            return Err(WriteError::NotConnected);
        }
        let mut s = self.state.lock().unwrap();
        let n = buf.len().min(s.write_budget);
        s.write_budget -= n;
        s.writes.push(n);
        s.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        self.connected = false;
        self.pending_open = false;
    }

    fn framing(&self) -> Framing {
        Framing::Envelope
    }

    fn has_peer(&self) -> bool {
        self.connected
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Fast retry timings so failure paths finish quickly.
pub fn fast_config() -> RelayConfig {
    RelayConfig {
        max_reconnect_attempts: 3,
        reconnect_delay_ms: 20,
        connect_timeout_ms: 1_000,
        ..Default::default()
    }
}

pub fn mock_target() -> Target {
    Target::unix("/mock/rtc_SSFD")
}

/// Poll `cond` every few milliseconds, failing the test after 5 s.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation timed out")
}
