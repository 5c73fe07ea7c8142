//! Wire vocabulary of the Chargelink overlay.
//!
//! This crate knows what travels between nodes and how it is laid out on
//! the wire, but nothing about where it goes next:
//!
//! - [`types`]: node ids, request ids, actions, message types, OCPP-J error
//!   codes.
//! - [`path`]: [`NetworkPath`] (the hops a message crossed) and
//!   [`SourceRouting`] (where a caller wants it to go).
//! - [`envelope`]: the decoded form of every frame.
//! - [`codec`]: text (OCPP-J) and binary envelope codecs.
//! - [`payload`]: the per-action payload seam and the signer seam.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod path;
pub mod payload;
pub mod types;

pub use codec::{BinaryCodec, Codec, TextCodec, WireFormat, decode_frame, encode_frame};
pub use envelope::{Envelope, Message, Payload};
pub use error::{DecodeError, DecodeField, ProtocolError};
pub use path::{NetworkPath, SourceRouting};
pub use payload::{JsonPayloadCodec, PayloadCodec, PayloadError, PayloadKind, Signer};
pub use types::{Action, CallError, ErrorCode, MessageType, NodeId, RequestId};
