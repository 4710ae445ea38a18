use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// MARK: - Constants

/// Socket file name the conferencing extension listens on inside the shared
/// app container.
pub const SOCKET_FILE_NAME: &str = "rtc_SSFD";

/// Default local port of the WebSocket consumer surface.
pub const DEFAULT_WS_PORT: u16 = 8766;

// MARK: - Orientation

/// Orientation of a captured image, using the EXIF orientation codes (1–8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Up,
    UpMirrored,
    Down,
    DownMirrored,
    LeftMirrored,
    Right,
    RightMirrored,
    Left,
}

impl Orientation {
    pub fn code(self) -> i32 {
        match self {
            Self::Up => 1,
            Self::UpMirrored => 2,
            Self::Down => 3,
            Self::DownMirrored => 4,
            Self::LeftMirrored => 5,
            Self::Right => 6,
            Self::RightMirrored => 7,
            Self::Left => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Up,
            2 => Self::UpMirrored,
            3 => Self::Down,
            4 => Self::DownMirrored,
            5 => Self::LeftMirrored,
            6 => Self::Right,
            7 => Self::RightMirrored,
            8 => Self::Left,
            _ => return None,
        })
    }

    /// Clockwise rotation in degrees needed to display the image upright.
    pub fn rotation_degrees(self) -> u16 {
        match self {
            Self::Up | Self::UpMirrored => 0,
            Self::Down | Self::DownMirrored => 180,
            Self::Right | Self::RightMirrored => 90,
            Self::Left | Self::LeftMirrored => 270,
        }
    }

    pub fn is_mirrored(self) -> bool {
        matches!(
            self,
            Self::UpMirrored | Self::DownMirrored | Self::LeftMirrored | Self::RightMirrored
        )
    }
}

// MARK: - Frame

/// One encoded capture event handed from the producer to the relay.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes (JPEG for the default content type).
    pub payload: Bytes,
    /// Capture time in seconds since the UNIX epoch.
    pub timestamp: f64,
    pub orientation: Orientation,
}

impl Frame {
    /// Frame stamped with the current wall-clock time and upright orientation.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            timestamp: unix_timestamp(),
            orientation: Orientation::Up,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Seconds since the UNIX epoch as a float, the unit of `X-Timestamp`.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// MARK: - Target

/// Address a transport connects to (socket variant) or listens on
/// (WebSocket variant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    UnixSocket {
        path: PathBuf,
    },
    WebSocket {
        #[serde(default = "default_ws_port")]
        port: u16,
        #[serde(default = "default_ws_bind")]
        bind: IpAddr,
    },
}

fn default_ws_port() -> u16 {
    DEFAULT_WS_PORT
}

fn default_ws_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl Target {
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::UnixSocket { path: path.into() }
    }

    /// WebSocket listener on all interfaces.
    pub fn websocket(port: u16) -> Self {
        Self::WebSocket { port, bind: default_ws_bind() }
    }

    /// Well-known socket path inside a shared container directory.
    pub fn default_socket_path(container: impl AsRef<Path>) -> PathBuf {
        container.as_ref().join(SOCKET_FILE_NAME)
    }

    /// Whether the target can be dialed right now. Listener targets are
    /// always considered present.
    pub fn exists(&self) -> bool {
        match self {
            Self::UnixSocket { path } => path.exists(),
            Self::WebSocket { .. } => true,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnixSocket { path } => write!(f, "unix:{}", path.display()),
            Self::WebSocket { port, bind } => write!(f, "ws://{}:{}", bind, port),
        }
    }
}

// MARK: - RelayState

/// Connection state of a relay session, published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Disconnected,
    Connecting { attempt: u32 },
    /// Target absent (socket not created yet) or listener bound without a client.
    WaitingForConsumer,
    /// Connected, no frame delivered yet on this connection.
    Connected,
    /// At least one frame delivered on this connection.
    Streaming,
    Reconnecting { attempt: u32 },
}

impl RelayState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting { .. } => "Connecting…",
            Self::WaitingForConsumer => "Waiting for consumer…",
            Self::Connected => "Connected — Ready",
            Self::Streaming => "Streaming",
            Self::Reconnecting { .. } => "Reconnecting…",
        }
    }

    /// A transport carrying (or able to carry) frames exists.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }
}

// MARK: - SessionCounters

/// Per-session telemetry, written by the relay and read from any thread.
#[derive(Debug, Default)]
pub struct SessionCounters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    busy_rejections: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl SessionCounters {
    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.busy_rejections.store(0, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    pub fn record_sent(&self) -> u64 {
        self.frames_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn busy_rejections(&self) -> u64 {
        self.busy_rejections.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }
}

// MARK: - RelayStats

/// Read-only snapshot for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub is_running: bool,
    pub has_client: bool,
    pub target: Option<String>,
    pub state: RelayState,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub busy_rejections: u64,
    pub reconnect_attempts: u64,
    pub last_error: Option<String>,
}

impl RelayStats {
    /// One-line status for display, e.g. `Streaming (42 frames)`.
    pub fn status_line(&self) -> String {
        match self.state {
            RelayState::Streaming => format!("Streaming ({} frames)", self.frames_sent),
            RelayState::Reconnecting { attempt } => format!("Reconnecting (attempt {attempt})…"),
            ref other => other.label().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_codes_round_trip() {
        for code in 1..=8 {
            let o = Orientation::from_code(code).unwrap();
            assert_eq!(o.code(), code);
        }
        assert_eq!(Orientation::from_code(0), None);
        assert_eq!(Orientation::from_code(9), None);
        assert_eq!(Orientation::Right.rotation_degrees(), 90);
        assert!(Orientation::LeftMirrored.is_mirrored());
    }

    #[test]
    fn target_display_and_socket_path() {
        let path = Target::default_socket_path("/var/containers/group");
        assert!(path.ends_with(SOCKET_FILE_NAME));
        assert_eq!(Target::unix(&path).to_string(), "unix:/var/containers/group/rtc_SSFD");
        assert_eq!(Target::websocket(8766).to_string(), "ws://0.0.0.0:8766");
    }

    #[test]
    fn target_deserializes_with_defaults() {
        let t: Target = serde_json::from_str(r#"{"kind": "web_socket"}"#).unwrap();
        assert_eq!(t, Target::websocket(DEFAULT_WS_PORT));

        let t: Target =
            serde_json::from_str(r#"{"kind": "unix_socket", "path": "/tmp/rtc_SSFD"}"#).unwrap();
        assert_eq!(t, Target::unix("/tmp/rtc_SSFD"));
    }

    #[test]
    fn counters_reset_to_zero() {
        let c = SessionCounters::default();
        c.record_sent();
        c.record_dropped();
        c.record_busy();
        c.record_reconnect();
        assert_eq!(c.frames_sent(), 1);
        c.reset();
        assert_eq!(
            (c.frames_sent(), c.frames_dropped(), c.busy_rejections(), c.reconnect_attempts()),
            (0, 0, 0, 0)
        );
    }

    #[test]
    fn status_line_reports_frame_count() {
        let stats = RelayStats {
            is_running: true,
            has_client: true,
            target: Some("unix:/tmp/rtc_SSFD".into()),
            state: RelayState::Streaming,
            frames_sent: 42,
            frames_dropped: 0,
            busy_rejections: 3,
            reconnect_attempts: 0,
            last_error: None,
        };
        assert_eq!(stats.status_line(), "Streaming (42 frames)");

        let waiting = RelayStats { state: RelayState::WaitingForConsumer, ..stats.clone() };
        assert_eq!(waiting.status_line(), "Waiting for consumer…");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["framesSent"], 42);
        assert_eq!(json["hasClient"], true);
    }
}
