//! Phosaic signaling schema.
//!
//! Every message exchanged between a peer and the relay is a JSON text frame
//! carrying a `type` discriminator plus a handful of optional fields. This
//! crate owns the typed view of those frames ([`Envelope`]) and the rules that
//! decide whether a frame is well-formed.

#![forbid(unsafe_code)]

pub mod envelope;
pub mod types;

pub use envelope::{payload_from_value, Envelope, EnvelopeError, MessageType, Payload, Signal};
pub use types::{DisplayGeometry, Role, SessionId};
