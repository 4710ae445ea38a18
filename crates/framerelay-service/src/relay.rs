//! `FrameRelay` — owns one transport and drives frame-by-frame delivery.
//!
//! # Handoff
//!
//! The producer calls [`FrameRelay::submit_frame`] from any thread. An atomic
//! `ready` flag is the at-most-one-in-flight gate: the caller that flips it
//! `true → false` gets to push its frame into a one-slot channel; everyone
//! else is rejected immediately. The session task sets `ready` again only
//! after the previous envelope has fully drained, so the slot never holds
//! more than one frame and nothing is ever queued behind it.
//!
//! # Session task
//!
//! ```text
//! start(target)
//!   └─ connect ──ok──► drive (Open → writes on SpaceAvailable) ──Closed──┐
//!        │  ▲                                                             │
//!        │  └──────────── backoff (or wait for a frame, lazy mode) ◄──────┘
//!        └─ fail × max_reconnect_attempts ──► Disconnected (until start())
//! ```
//!
//! The task exclusively owns the transport and hands it back on exit so the
//! next `start` can reuse it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use framerelay_core::{
    build_envelope, CloseReason, ConfigError, ConnectError, Frame, RelayConfig, RelayState,
    RelayStats, SessionCounters, Target,
};
use framerelay_transport::{Framing, Transport, TransportEvent};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Transport was lost when the previous session ended abnormally")]
    TransportLost,
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// State shared between the producer-facing handle and the session task.
struct Shared {
    /// The at-most-one-in-flight gate.
    ready: AtomicBool,
    /// A consumer is attached (between `Open` and `PeerLost`/`Closed`).
    attached: AtomicBool,
    running: AtomicBool,
    /// Lazy mode: the task is parked waiting for a frame to trigger a reconnect.
    parked: AtomicBool,
    next_index: AtomicU64,
    counters: SessionCounters,
    state: watch::Sender<RelayState>,
    target: Mutex<Option<Target>>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn set_state(&self, next: RelayState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("Relay state {:?} → {:?}", current, next);
            *current = next;
            true
        });
    }

    fn set_last_error(&self, err: Option<String>) {
        *lock(&self.last_error) = err;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Control {
    Stop,
    /// Lazy reconnect trigger from `submit_frame`.
    Kick,
    ResetPeer,
}

struct QueuedFrame {
    index: u64,
    frame: Frame,
}

enum SessionSlot {
    Idle(Option<Box<dyn Transport>>),
    Running(JoinHandle<Box<dyn Transport>>),
}

// ── FrameRelay ────────────────────────────────────────────────────────────────

/// Frame relay service.
///
/// Construct once with its transport; `start`/`stop` may be called any number
/// of times. All methods take `&self` so the relay can sit in an `Arc`
/// shared between the capture callback and the UI.
pub struct FrameRelay {
    config: RelayConfig,
    shared: Arc<Shared>,
    frames: Mutex<Option<mpsc::Sender<QueuedFrame>>>,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    session: tokio::sync::Mutex<SessionSlot>,
}

impl FrameRelay {
    pub fn new(
        transport: impl Transport + 'static,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        let (state, _) = watch::channel(RelayState::Disconnected);
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                ready: AtomicBool::new(false),
                attached: AtomicBool::new(false),
                running: AtomicBool::new(false),
                parked: AtomicBool::new(false),
                next_index: AtomicU64::new(0),
                counters: SessionCounters::default(),
                state,
                target: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
            frames: Mutex::new(None),
            control: Mutex::new(None),
            session: tokio::sync::Mutex::new(SessionSlot::Idle(Some(Box::new(transport)))),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Begin a new session against `target`.
    ///
    /// Any running session is stopped first. Counters and the frame index
    /// reset to zero.
    pub async fn start(&self, target: Target) -> Result<(), RelayError> {
        let mut slot = self.session.lock().await;
        self.stop_locked(&mut slot).await;

        let SessionSlot::Idle(idle) = &mut *slot else {
            return Err(RelayError::TransportLost);
        };
        let transport = idle.take().ok_or(RelayError::TransportLost)?;

        self.shared.counters.reset();
        self.shared.next_index.store(0, Ordering::Relaxed);
        self.shared.ready.store(false, Ordering::Release);
        self.shared.attached.store(false, Ordering::Release);
        self.shared.parked.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        self.shared.set_last_error(None);
        *lock(&self.shared.target) = Some(target.clone());
        self.shared.set_state(RelayState::Connecting { attempt: 1 });

        let (frames_tx, frames_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *lock(&self.frames) = Some(frames_tx);
        *lock(&self.control) = Some(control_tx);

        info!("Relay session starting → {}", target);
        let session = Session {
            transport,
            target,
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            frames: frames_rx,
            control: control_rx,
        };
        *slot = SessionSlot::Running(tokio::spawn(session.run()));
        Ok(())
    }

    /// Tear down the transport and return to `Disconnected`. Idempotent.
    ///
    /// Returns once the transport's resources have been released.
    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;
        self.stop_locked(&mut slot).await;
    }

    async fn stop_locked(&self, slot: &mut SessionSlot) {
        self.shared.ready.store(false, Ordering::Release);
        if let Some(control) = lock(&self.control).take() {
            let _ = control.send(Control::Stop);
        }
        lock(&self.frames).take();

        // An idle slot keeps its transport for the next `start`.
        if matches!(slot, SessionSlot::Running(_)) {
            if let SessionSlot::Running(handle) = std::mem::replace(slot, SessionSlot::Idle(None)) {
                match handle.await {
                    Ok(transport) => *slot = SessionSlot::Idle(Some(transport)),
                    Err(e) => warn!("Relay session task ended abnormally: {}", e),
                }
                info!("Relay session stopped");
            }
        }

        self.shared.attached.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.shared.set_state(RelayState::Disconnected);
    }

    // ── Producer entry point ──────────────────────────────────────────────────

    /// Offer one encoded frame stamped with the current time.
    ///
    /// Non-blocking. `true` means the frame was taken for sending; `false`
    /// means it was rejected and the caller should simply move on.
    pub fn submit_frame(&self, payload: impl Into<Bytes>) -> bool {
        self.submit(Frame::new(payload))
    }

    /// Offer a frame with explicit timestamp and orientation.
    pub fn submit(&self, frame: Frame) -> bool {
        let shared = &self.shared;

        if shared
            .ready
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            if shared.attached.load(Ordering::Acquire) {
                // Previous envelope still draining.
                shared.counters.record_busy();
            } else {
                shared.counters.record_dropped();
                if shared.parked.swap(false, Ordering::AcqRel) {
                    if let Some(control) = lock(&self.control).as_ref() {
                        debug!("Frame submitted while disconnected; triggering reconnect");
                        let _ = control.send(Control::Kick);
                    }
                }
            }
            return false;
        }

        let index = shared.next_index.fetch_add(1, Ordering::Relaxed) + 1;
        let queued = lock(&self.frames)
            .as_ref()
            .map(|tx| tx.try_send(QueuedFrame { index, frame }).is_ok())
            .unwrap_or(false);
        if !queued {
            shared.counters.record_dropped();
        }
        queued
    }

    // ── Observation ───────────────────────────────────────────────────────────

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> RelayState {
        self.shared.state.borrow().clone()
    }

    /// Whether the next `submit_frame` would be accepted.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RelayStats {
        let c = &self.shared.counters;
        RelayStats {
            is_running: self.shared.running.load(Ordering::Acquire),
            has_client: self.shared.attached.load(Ordering::Acquire),
            target: lock(&self.shared.target).as_ref().map(ToString::to_string),
            state: self.state(),
            frames_sent: c.frames_sent(),
            frames_dropped: c.frames_dropped(),
            busy_rejections: c.busy_rejections(),
            reconnect_attempts: c.reconnect_attempts(),
            last_error: lock(&self.shared.last_error).clone(),
        }
    }

    /// Close the current consumer and zero the session counters, keeping the
    /// session (and a WebSocket listener) alive.
    pub fn reset_client(&self) {
        self.shared.counters.reset();
        if let Some(control) = lock(&self.control).as_ref() {
            let _ = control.send(Control::ResetPeer);
        }
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

struct Session {
    transport: Box<dyn Transport>,
    target: Target,
    config: RelayConfig,
    shared: Arc<Shared>,
    frames: mpsc::Receiver<QueuedFrame>,
    control: mpsc::UnboundedReceiver<Control>,
}

enum Drive {
    Stopped,
    Failed(CloseReason),
}

struct InFlight {
    index: u64,
    buf: Bytes,
    offset: usize,
}

/// Resolves on `Stop` or when the handle is dropped; other control messages
/// are irrelevant while not connected.
async fn stopped(control: &mut mpsc::UnboundedReceiver<Control>) {
    loop {
        match control.recv().await {
            Some(Control::Stop) | None => return,
            Some(Control::Kick) | Some(Control::ResetPeer) => {}
        }
    }
}

/// Resolves on `Kick`; `false` if a stop arrived instead.
async fn kicked(control: &mut mpsc::UnboundedReceiver<Control>) -> bool {
    loop {
        match control.recv().await {
            Some(Control::Kick) => return true,
            Some(Control::Stop) | None => return false,
            Some(Control::ResetPeer) => {}
        }
    }
}

impl Session {
    async fn run(mut self) -> Box<dyn Transport> {
        let max = self.config.max_reconnect_attempts;
        let mut failures: u32 = 0;
        let mut retrying = false;
        let mut was_connected = false;

        'session: loop {
            let attempt = failures + 1;
            if retrying {
                self.shared.counters.record_reconnect();
                self.shared.set_state(RelayState::Reconnecting { attempt });
            } else {
                self.shared.set_state(RelayState::Connecting { attempt });
            }

            let result = tokio::select! {
                _ = stopped(&mut self.control) => break 'session,
                r = tokio::time::timeout(
                    self.config.connect_timeout(),
                    self.transport.connect(&self.target),
                ) => r.unwrap_or_else(|_| Err(ConnectError::Timeout {
                    target: self.target.to_string(),
                    ms: self.config.connect_timeout_ms,
                })),
            };

            match result {
                Ok(()) => {
                    failures = 0;
                    was_connected = true;
                    self.shared.set_last_error(None);
                    self.shared.set_state(RelayState::WaitingForConsumer);

                    match self.drive().await {
                        Drive::Stopped => break 'session,
                        Drive::Failed(reason) => {
                            warn!("Transport to {} failed: {}", self.target, reason);
                            self.shared.set_last_error(Some(reason.to_string()));
                            self.shared.set_state(RelayState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!("Connect attempt {}/{} to {} failed: {}", failures, max, self.target, e);
                    self.shared.set_last_error(Some(e.to_string()));
                    if failures >= max {
                        warn!("Giving up on {} after {} attempts", self.target, failures);
                        break 'session;
                    }
                    if e.is_target_unavailable() {
                        self.shared.set_state(RelayState::WaitingForConsumer);
                    }
                }
            }

            self.transport.close();
            retrying = true;

            let deadline = Instant::now() + self.config.reconnect_delay();
            if was_connected && !self.config.auto_reconnect {
                self.shared.set_state(RelayState::Disconnected);
                self.shared.parked.store(true, Ordering::Release);
                let resume = kicked(&mut self.control).await;
                self.shared.parked.store(false, Ordering::Release);
                if !resume {
                    break 'session;
                }
            }
            tokio::select! {
                _ = stopped(&mut self.control) => break 'session,
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }

        self.transport.close();
        self.shared.ready.store(false, Ordering::Release);
        self.shared.attached.store(false, Ordering::Release);
        self.shared.parked.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.drain_handoff();
        self.shared.set_state(RelayState::Disconnected);
        self.transport
    }

    /// Connected phase: feed frames to the transport until it fails or the
    /// session is stopped.
    async fn drive(&mut self) -> Drive {
        let framing = self.transport.framing();
        let chunk = self.config.chunk_size;
        let mut inflight: Option<InFlight> = None;
        let mut delivered_here = false;

        let outcome = loop {
            let want_write = inflight.is_some();
            tokio::select! {
                biased;

                ctl = self.control.recv() => match ctl {
                    Some(Control::Stop) | None => break Drive::Stopped,
                    Some(Control::ResetPeer) => self.transport.reset_peer(),
                    Some(Control::Kick) => {}
                },

                Some(queued) = self.frames.recv(), if inflight.is_none() => {
                    let buf = match framing {
                        Framing::Envelope => build_envelope(
                            &self.config.content_type,
                            &queued.frame.payload,
                            queued.index,
                            queued.frame.timestamp,
                            queued.frame.orientation,
                        ),
                        Framing::RawPayload => queued.frame.payload,
                    };
                    debug!("Frame #{} queued ({} bytes)", queued.index, buf.len());
                    inflight = Some(InFlight { index: queued.index, buf, offset: 0 });
                }

                event = self.transport.ready(want_write) => match event {
                    TransportEvent::Open => {
                        // A replacement consumer never gets the tail of a
                        // frame started for its predecessor.
                        if let Some(f) = inflight.take() {
                            debug!("Frame #{} discarded on consumer change", f.index);
                            self.shared.counters.record_dropped();
                        }
                        delivered_here = false;
                        self.drain_handoff();
                        self.shared.attached.store(true, Ordering::Release);
                        self.shared.set_state(RelayState::Connected);
                        self.shared.ready.store(true, Ordering::Release);
                        info!("Consumer attached on {}", self.target);
                    }
                    TransportEvent::SpaceAvailable => {
                        let Some(f) = inflight.as_mut() else { continue };
                        let end = match framing {
                            Framing::Envelope => (f.offset + chunk).min(f.buf.len()),
                            Framing::RawPayload => f.buf.len(),
                        };
                        match self.transport.write(&f.buf[f.offset..end]) {
                            Ok(n) => f.offset += n,
                            Err(e) => break Drive::Failed(e.into()),
                        }
                        if f.offset == f.buf.len() {
                            let sent = self.shared.counters.record_sent();
                            debug!("Frame #{} delivered ({} total)", f.index, sent);
                            inflight = None;
                            if !delivered_here {
                                delivered_here = true;
                                self.shared.set_state(RelayState::Streaming);
                            }
                            self.shared.ready.store(true, Ordering::Release);
                        }
                    }
                    TransportEvent::PeerLost => {
                        self.shared.ready.store(false, Ordering::Release);
                        self.shared.attached.store(false, Ordering::Release);
                        if let Some(f) = inflight.take() {
                            debug!("Frame #{} discarded at offset {}", f.index, f.offset);
                            self.shared.counters.record_dropped();
                        }
                        self.drain_handoff();
                        delivered_here = false;
                        self.shared.set_state(RelayState::WaitingForConsumer);
                        info!("Consumer detached from {}", self.target);
                    }
                    TransportEvent::Closed(reason) => break Drive::Failed(reason),
                }
            }
        };

        self.shared.ready.store(false, Ordering::Release);
        self.shared.attached.store(false, Ordering::Release);
        if let Some(f) = inflight.take() {
            debug!("Frame #{} discarded at offset {}/{}", f.index, f.offset, f.buf.len());
            self.shared.counters.record_dropped();
        }
        self.drain_handoff();
        outcome
    }

    /// Drop any frame that slipped into the handoff slot while no consumer
    /// could take it.
    fn drain_handoff(&mut self) {
        while let Ok(queued) = self.frames.try_recv() {
            debug!("Frame #{} dropped from handoff", queued.index);
            self.shared.counters.record_dropped();
        }
    }
}
