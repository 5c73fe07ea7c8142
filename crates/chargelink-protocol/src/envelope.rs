//! The envelope: every frame on the wire decodes into one of these.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ request_id:   "a3f1…"                    │  ← correlation key
//! │ destination:  Some("CSMS")               │  ← binary frames only
//! │ network_path: [CS001, NN-A]              │  ← binary frames only
//! │ ┌──────────────────────────────────────┐ │
//! │ │ message: Call { action, payload }    │ │
//! │ └──────────────────────────────────────┘ │
//! └──────────────────────────────────────────┘
//! ```

use serde_json::Value;

use crate::{Action, CallError, MessageType, NetworkPath, NodeId, RequestId};

/// Content of an envelope: structured JSON or opaque bytes.
///
/// Action payload schemas are the payload codec's business; the envelope
/// only carries them.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(Vec<u8>),
}

impl Payload {
    /// An empty JSON object, the payload of e.g. a Heartbeat request.
    pub fn empty() -> Self {
        Self::Json(Value::Object(serde_json::Map::new()))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// The typed body of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A request for `action`.
    Call { action: Action, payload: Payload },
    /// A successful response.
    CallResult { payload: Payload },
    /// An error response.
    CallError(CallError),
}

/// One protocol message plus its routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Minted by the request's origin, echoed by the response.
    pub request_id: RequestId,

    /// Final destination. `None` means "the node at the other end of the
    /// link", which is always the case for OCPP-J text frames.
    pub destination: Option<NodeId>,

    /// Hops traversed so far.
    pub network_path: NetworkPath,

    pub message: Message,
}

impl Envelope {
    /// A CALL with no routing metadata.
    pub fn call(
        request_id: RequestId,
        action: Action,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::bare(
            request_id,
            Message::Call {
                action,
                payload: payload.into(),
            },
        )
    }

    /// A CALLRESULT with no routing metadata.
    pub fn call_result(request_id: RequestId, payload: impl Into<Payload>) -> Self {
        Self::bare(
            request_id,
            Message::CallResult {
                payload: payload.into(),
            },
        )
    }

    /// A CALLERROR with no routing metadata.
    pub fn call_error(request_id: RequestId, error: CallError) -> Self {
        Self::bare(request_id, Message::CallError(error))
    }

    fn bare(request_id: RequestId, message: Message) -> Self {
        Self {
            request_id,
            destination: None,
            network_path: NetworkPath::new(),
            message,
        }
    }

    /// Sets the final destination.
    pub fn to(mut self, destination: NodeId) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Replaces the network path.
    pub fn with_path(mut self, path: NetworkPath) -> Self {
        self.network_path = path;
        self
    }

    pub fn message_type(&self) -> MessageType {
        match self.message {
            Message::Call { .. } => MessageType::Call,
            Message::CallResult { .. } => MessageType::CallResult,
            Message::CallError(_) => MessageType::CallError,
        }
    }

    /// The action name; present only on CALL.
    pub fn action(&self) -> Option<&Action> {
        match &self.message {
            Message::Call { action, .. } => Some(action),
            _ => None,
        }
    }

    /// `true` for CALLRESULT and CALLERROR.
    pub fn is_response(&self) -> bool {
        !matches!(self.message, Message::Call { .. })
    }
}
