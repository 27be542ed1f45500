//! Sidecar wire protocol.
//!
//! Defines request/response types and message framing for socket communication.
//!
//! ## Wire Format
//!
//! Messages are length-prefixed JSON:
//! ```text
//! [4 bytes: length (big-endian u32)][JSON payload]
//! ```
//!
//! The webhook body travels hex-encoded so the gateway sees the exact bytes
//! the host received.

mod request;
mod response;
mod wire;

pub use request::VerifyRequest;
pub use response::{ErrorResponse, VerifyResponse};
pub use wire::{
    read_message, read_message_with_timeout, write_message, write_message_with_timeout,
    DEFAULT_MAX_MESSAGE_SIZE,
};
