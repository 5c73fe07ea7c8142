//! The seam to per-action payload handling.
//!
//! The engine never looks inside an action's payload. It hands payloads to a
//! [`PayloadCodec`] to turn them into structured data (and back), and asks
//! the same codec for a negative response when a transit node refuses to
//! forward a request. Hundreds of concrete OCPP schemas can sit behind this
//! trait; [`JsonPayloadCodec`] is the schema-less default.
//!
//! An optional [`Signer`] gets a last look at every outgoing request payload.

use std::fmt;

use serde_json::{Value, json};

use crate::{Action, ErrorCode, Payload};

/// Which side of an exchange a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Request,
    Response,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// Errors raised by payload codecs and signers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// The payload does not match what the action expects.
    #[error("malformed {kind} payload for {action}: {reason}")]
    Malformed {
        action: Action,
        kind: PayloadKind,
        reason: String,
    },

    /// The codec does not know this action.
    #[error("no payload schema for {0}")]
    UnknownAction(Action),

    /// A signer refused or failed to sign.
    #[error("signing {action} failed: {reason}")]
    Signing { action: Action, reason: String },
}

impl PayloadError {
    /// The OCPP-J error code a CALLERROR for this failure should carry.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Malformed { .. } => ErrorCode::FormatViolation,
            Self::UnknownAction(_) => ErrorCode::NotImplemented,
            Self::Signing { .. } => ErrorCode::SecurityError,
        }
    }
}

/// Per-action payload encode/decode.
///
/// Implementations must be cheap to share: one instance serves every
/// connection of a node.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Turns a received payload into structured data, validating it.
    fn decode(
        &self,
        action: &Action,
        kind: PayloadKind,
        payload: &Payload,
    ) -> Result<Value, PayloadError>;

    /// Turns structured data into a payload ready for an envelope.
    fn encode(
        &self,
        action: &Action,
        kind: PayloadKind,
        data: Value,
    ) -> Result<Payload, PayloadError>;

    /// The response a transit node sends back instead of forwarding a
    /// request for `action`.
    fn negative_response(&self, action: &Action, rationale: &str) -> Payload;
}

/// Schema-less codec: any JSON object is a valid payload for any action.
///
/// Raw byte payloads are accepted if they hold a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadCodec;

impl JsonPayloadCodec {
    fn require_object(
        action: &Action,
        kind: PayloadKind,
        value: Value,
    ) -> Result<Value, PayloadError> {
        if value.is_object() {
            Ok(value)
        } else {
            Err(PayloadError::Malformed {
                action: action.clone(),
                kind,
                reason: "expected a JSON object".into(),
            })
        }
    }
}

impl PayloadCodec for JsonPayloadCodec {
    fn decode(
        &self,
        action: &Action,
        kind: PayloadKind,
        payload: &Payload,
    ) -> Result<Value, PayloadError> {
        let value = match payload {
            Payload::Json(value) => value.clone(),
            Payload::Raw(bytes) => {
                serde_json::from_slice(bytes).map_err(|e| PayloadError::Malformed {
                    action: action.clone(),
                    kind,
                    reason: e.to_string(),
                })?
            }
        };
        Self::require_object(action, kind, value)
    }

    fn encode(
        &self,
        action: &Action,
        kind: PayloadKind,
        data: Value,
    ) -> Result<Payload, PayloadError> {
        Self::require_object(action, kind, data).map(Payload::Json)
    }

    fn negative_response(&self, _action: &Action, rationale: &str) -> Payload {
        Payload::Json(json!({
            "status": "Rejected",
            "statusInfo": {
                "reasonCode": "Filtered",
                "additionalInfo": rationale,
            }
        }))
    }
}

/// Signs outgoing request payloads.
pub trait Signer: Send + Sync + 'static {
    fn sign(&self, action: &Action, payload: Payload) -> Result<Payload, PayloadError>;
}
