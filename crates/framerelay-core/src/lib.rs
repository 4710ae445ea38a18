pub mod config;
pub mod envelope;
pub mod errors;
pub mod types;

pub use config::RelayConfig;
pub use envelope::{build_envelope, parse_envelope, EnvelopeHeader, EnvelopeReader};
pub use errors::{CloseReason, ConfigError, ConnectError, EnvelopeError, WriteError};
pub use types::*;
