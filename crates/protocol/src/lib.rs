//! Wire protocol types for livelink client-server streaming.
//!
//! Defines the JSON frame envelope exchanged over the WebSocket,
//! the frame type discriminator, and the protocol defaults.

pub mod constants;
pub mod envelope;

pub use constants::{FrameKind, ws_url};
pub use envelope::Frame;
