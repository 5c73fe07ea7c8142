//! Error types for the protocol layer.
//!
//! [`DecodeError`] is the structural error: a frame that does not have the
//! shape of an OCPP envelope. It never escapes as a panic and always names
//! the offending field, so the receiving node can answer with a CALLERROR
//! whenever the request id could be recovered.

use std::fmt;

use crate::{ErrorCode, MessageType, NodeId, RequestId};

/// The envelope field a [`DecodeError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeField {
    /// The frame as a whole (not JSON, not an array, truncated header).
    Frame,
    MessageType,
    ElementCount,
    RequestId,
    Action,
    Destination,
    NetworkPath,
    ErrorCode,
    ErrorDescription,
    Payload,
}

impl fmt::Display for DecodeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Frame => "frame",
            Self::MessageType => "messageType",
            Self::ElementCount => "elementCount",
            Self::RequestId => "requestId",
            Self::Action => "action",
            Self::Destination => "destination",
            Self::NetworkPath => "networkPath",
            Self::ErrorCode => "errorCode",
            Self::ErrorDescription => "errorDescription",
            Self::Payload => "payload",
        };
        f.write_str(name)
    }
}

/// A frame could not be decoded into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {field}: {reason}")]
pub struct DecodeError {
    /// Which field was wrong.
    pub field: DecodeField,
    /// Human-readable detail, suitable for a CALLERROR description.
    pub reason: String,
    /// The request id, when it was readable.
    pub request_id: Option<RequestId>,
    /// The message type, when it was a known one.
    pub message_type: Option<MessageType>,
}

impl DecodeError {
    pub(crate) fn new(field: DecodeField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
            request_id: None,
            message_type: None,
        }
    }

    pub(crate) fn with_request_id(mut self, id: &RequestId) -> Self {
        self.request_id = Some(id.clone());
        self
    }

    pub(crate) fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    /// Whether the sender expects an answer to the broken frame: it has a
    /// readable request id and is not a CALLRESULT or CALLERROR. A frame of
    /// unknown type may be a request and is answered.
    pub fn wants_reply(&self) -> bool {
        self.request_id.is_some()
            && !matches!(
                self.message_type,
                Some(MessageType::CallResult | MessageType::CallError)
            )
    }

    /// The OCPP-J error code a CALLERROR for this failure should carry.
    pub fn error_code(&self) -> ErrorCode {
        match self.field {
            DecodeField::Frame | DecodeField::ElementCount => {
                ErrorCode::RpcFrameworkError
            }
            DecodeField::MessageType => ErrorCode::MessageTypeNotSupported,
            _ => ErrorCode::FormatViolation,
        }
    }
}

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is structurally invalid.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Appending a hop would visit the same node twice.
    #[error("loop detected: {0} already on the network path")]
    LoopDetected(NodeId),

    /// A reply was requested along an empty network path.
    #[error("network path is empty, no sender to reply to")]
    EmptyPath,

    /// Raw payload bytes cannot be carried in a text frame.
    #[error("raw payload cannot be encoded as OCPP-J text")]
    PayloadNotText,

    /// A field is longer than the binary layout can express.
    #[error("{0} exceeds the binary length prefix")]
    FieldTooLong(DecodeField),

    /// Encoding JSON failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}
