//! framerelay-service — the frame relay orchestrator.
//!
//! # Architecture
//!
//! ```text
//! capture callback ──► FrameSkipper ──► FrameEncoder ──► FrameRelay::submit_frame
//!                                                            │ (one-slot handoff)
//!                                                            ▼
//!                                                   session task ── Transport ──► consumer
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framerelay_core::{RelayConfig, Target};
//! use framerelay_service::FrameRelay;
//! use framerelay_transport::UnixSocketTransport;
//!
//! # async fn demo(jpeg: Vec<u8>) -> Result<(), framerelay_service::RelayError> {
//! let relay = FrameRelay::new(UnixSocketTransport::new(), RelayConfig::default())?;
//! relay.start(Target::unix("/tmp/group/rtc_SSFD")).await?;
//!
//! // Once per captured frame; `false` means busy or disconnected.
//! let accepted = relay.submit_frame(jpeg);
//! # let _ = accepted;
//! relay.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod encoder;
pub mod relay;
pub mod throttle;

pub use encoder::{EncodeError, FrameEncoder, JpegEncoder, PixelFormat, RawFrame};
pub use relay::{FrameRelay, RelayError};
pub use throttle::FrameSkipper;
