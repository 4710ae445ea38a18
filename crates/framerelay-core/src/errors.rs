use thiserror::Error;

/// Failure to establish a transport connection.
///
/// Both variants are retried by the relay within its attempt budget; the
/// distinction only matters for the status shown to the user.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Target {target} unavailable: {reason}")]
    TargetUnavailable { target: String, reason: String },

    #[error("Transport error on {target}: {source}")]
    TransportError {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connect to {target} timed out after {ms}ms")]
    Timeout { target: String, ms: u64 },
}

impl ConnectError {
    /// Classify an OS error raised while dialing or binding `target`.
    ///
    /// Missing socket files, refused connections and ports still held by a
    /// previous listener mean "consumer not ready yet"; anything else is an
    /// OS-level transport failure.
    pub fn from_io(target: impl Into<String>, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let target = target.into();
        match err.kind() {
            ErrorKind::NotFound
            | ErrorKind::ConnectionRefused
            | ErrorKind::AddrInUse
            | ErrorKind::AddrNotAvailable => Self::TargetUnavailable {
                target,
                reason: err.to_string(),
            },
            _ => Self::TransportError { target, source: err },
        }
    }

    /// `true` for "waiting for consumer" failures, `false` for OS errors.
    pub fn is_target_unavailable(&self) -> bool {
        matches!(self, Self::TargetUnavailable { .. } | Self::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a transport stopped carrying bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    #[error("Connection closed by peer")]
    PeerClosed,

    #[error("Transport not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CloseReason {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<WriteError> for CloseReason {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::NotConnected => Self::NotConnected,
            WriteError::Io(e) => e.into(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Envelope does not start with the boundary marker")]
    MissingBoundary,

    #[error("Malformed header line: {line}")]
    MalformedHeader { line: String },

    #[error("Missing or invalid Content-Length header")]
    MissingContentLength,

    #[error("Incomplete envelope: need {needed} more bytes")]
    Incomplete { needed: usize },

    #[error("Envelope trailer does not match the terminator sequence")]
    TrailerMismatch,

    #[error("Header block exceeds {max} bytes")]
    HeaderTooLarge { max: usize },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },
}
