//! Relay subprotocol definitions
//!
//! This crate defines the wire format spoken over the relay transport:
//! big-endian integer helpers, the frame tags, and typed messages.
//!
//! Every transport message carries exactly one frame. A frame always starts
//! with a 2-byte tag; the rest of the layout depends on the tag:
//!
//! ```text
//! Data               tag(2) | length(4) | payload(length)
//! ConnectSuccessSid  tag(2) | length(4) | sid(length)
//! Ack                tag(2) | ack(8)
//! ReconnectSuccessAck tag(2)
//! ```

pub mod codec;
pub mod messages;

pub use codec::{ProtoError, ProtoResult};
pub use messages::*;

/// Maximum size of a single frame, inherited from the transport message limit
pub const MAX_FRAME_SIZE: usize = 65535;

/// Size of the tag + length header on Data and ConnectSuccessSid frames
pub const DATA_HEADER_SIZE: usize = 6;

/// Largest payload a Data frame may carry (65529 bytes)
pub const MAX_DATA_LENGTH: usize = MAX_FRAME_SIZE - DATA_HEADER_SIZE;

/// Total size of an Ack frame
pub const ACK_FRAME_SIZE: usize = 10;
