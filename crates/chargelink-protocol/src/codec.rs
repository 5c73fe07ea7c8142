//! Envelope codecs: converting between [`Envelope`]s and transport frames.
//!
//! Two wire formats exist and both implement the [`Codec`] trait:
//!
//! - [`TextCodec`]: OCPP-J, the JSON array form deployed charge points
//!   speak: `[2, id, action, payload]`, `[3, id, payload]`,
//!   `[4, id, errorCode, errorDescription, errorDetails]`.
//! - [`BinaryCodec`]: a compact layout with a fixed four-byte header that
//!   additionally carries the destination and network path, for multi-hop
//!   use between networking nodes.
//!
//! Decoding validates the structural shape (element count per message type,
//! known type code, non-empty request id, action present only on CALL)
//! before anything else looks at the message.

use serde_json::{Value, json};

use chargelink_transport::Frame;

use crate::{
    Action, CallError, DecodeError, DecodeField, Envelope, ErrorCode, Message,
    MessageType, NetworkPath, NodeId, Payload, ProtocolError, RequestId,
};

/// Which of the two wire formats a frame uses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Text,
    Binary,
}

impl WireFormat {
    /// The format of a received frame.
    pub fn of(frame: &Frame) -> Self {
        if frame.is_binary() { Self::Binary } else { Self::Text }
    }
}

/// Converts envelopes to frames and back.
pub trait Codec: Send + Sync + 'static {
    /// The format this codec produces.
    fn format(&self) -> WireFormat;

    /// Encodes an envelope.
    ///
    /// # Errors
    /// Only for envelopes the format cannot express (raw bytes in a text
    /// frame, a field longer than a length prefix).
    fn encode(&self, envelope: &Envelope) -> Result<Frame, ProtocolError>;

    /// Decodes and structurally validates raw frame bytes.
    fn decode(&self, data: &[u8]) -> Result<Envelope, DecodeError>;
}

/// Decodes a frame with the codec matching its kind.
pub fn decode_frame(frame: &Frame) -> Result<Envelope, DecodeError> {
    match frame {
        Frame::Text(text) => TextCodec.decode(text.as_bytes()),
        Frame::Binary(data) => BinaryCodec.decode(data),
    }
}

/// Encodes an envelope in the requested format.
pub fn encode_frame(
    envelope: &Envelope,
    format: WireFormat,
) -> Result<Frame, ProtocolError> {
    match format {
        WireFormat::Text => TextCodec.encode(envelope),
        WireFormat::Binary => BinaryCodec.encode(envelope),
    }
}

// ---------------------------------------------------------------------------
// TextCodec
// ---------------------------------------------------------------------------

/// OCPP-J codec. Text frames carry no routing metadata: `destination` and
/// `network_path` are not written and decode as empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Text
    }

    fn encode(&self, envelope: &Envelope) -> Result<Frame, ProtocolError> {
        let id = envelope.request_id.as_str();
        let array = match &envelope.message {
            Message::Call { action, payload } => {
                json!([MessageType::Call.code(), id, action.as_str(), text_payload(payload)?])
            }
            Message::CallResult { payload } => {
                json!([MessageType::CallResult.code(), id, text_payload(payload)?])
            }
            Message::CallError(err) => json!([
                MessageType::CallError.code(),
                id,
                err.error_code.as_str(),
                err.error_description,
                err.error_details
            ]),
        };
        Ok(Frame::Text(array.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Envelope, DecodeError> {
        let value: Value = serde_json::from_slice(data).map_err(|e| {
            DecodeError::new(DecodeField::Frame, format!("not JSON: {e}"))
        })?;
        let Value::Array(elements) = value else {
            return Err(DecodeError::new(
                DecodeField::Frame,
                "expected a JSON array",
            ));
        };

        // The id is read first so that even a frame of an unknown type can
        // be answered.
        let request_id = match elements.get(1) {
            Some(Value::String(id)) if !id.is_empty() => Some(RequestId::new(id.as_str())),
            _ => None,
        };
        let tag_id = |err: DecodeError| match &request_id {
            Some(id) => err.with_request_id(id),
            None => err,
        };

        let code = elements
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                tag_id(DecodeError::new(DecodeField::MessageType, "must be an integer"))
            })?;
        let message_type = MessageType::from_code(code).ok_or_else(|| {
            tag_id(DecodeError::new(
                DecodeField::MessageType,
                format!("unknown message type {code}"),
            ))
        })?;

        let Some(request_id) = request_id else {
            let reason = match elements.get(1) {
                Some(Value::String(_)) => "must not be empty",
                _ => "must be a string",
            };
            return Err(
                DecodeError::new(DecodeField::RequestId, reason).with_message_type(message_type)
            );
        };

        let allowed: &[usize] = match message_type {
            MessageType::Call => &[4],
            MessageType::CallResult => &[3],
            MessageType::CallError => &[5, 3],
        };
        if !allowed.contains(&elements.len()) {
            return Err(DecodeError::new(
                DecodeField::ElementCount,
                format!(
                    "{message_type} with {} elements, expected {allowed:?}",
                    elements.len()
                ),
            )
            .with_request_id(&request_id)
            .with_message_type(message_type));
        }

        let fail = |field, reason: &str| {
            DecodeError::new(field, reason)
                .with_request_id(&request_id)
                .with_message_type(message_type)
        };
        let count = elements.len();
        let mut rest = elements.into_iter().skip(2);
        let mut next = || rest.next().unwrap_or(Value::Null);

        let message = match message_type {
            MessageType::Call => {
                let action = match next() {
                    Value::String(name) if !name.is_empty() => Action::new(name),
                    _ => return Err(fail(DecodeField::Action, "must be a non-empty string")),
                };
                Message::Call {
                    action,
                    payload: Payload::Json(next()),
                }
            }
            MessageType::CallResult => Message::CallResult {
                payload: Payload::Json(next()),
            },
            MessageType::CallError if count == 5 => {
                let Value::String(code) = next() else {
                    return Err(fail(DecodeField::ErrorCode, "must be a string"));
                };
                let Value::String(description) = next() else {
                    return Err(fail(
                        DecodeField::ErrorDescription,
                        "must be a string",
                    ));
                };
                Message::CallError(
                    CallError::new(ErrorCode::parse(&code), description)
                        .with_details(next()),
                )
            }
            MessageType::CallError => {
                let body = next();
                let code = body
                    .get("errorCode")
                    .and_then(Value::as_str)
                    .ok_or_else(|| fail(DecodeField::ErrorCode, "must be a string"))?;
                let description = body
                    .get("errorDescription")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let details = body
                    .get("errorDetails")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                Message::CallError(
                    CallError::new(ErrorCode::parse(code), description)
                        .with_details(details),
                )
            }
        };

        Ok(Envelope {
            request_id,
            destination: None,
            network_path: NetworkPath::new(),
            message,
        })
    }
}

fn text_payload(payload: &Payload) -> Result<&Value, ProtocolError> {
    match payload {
        Payload::Json(value) => Ok(value),
        Payload::Raw(_) => Err(ProtocolError::PayloadNotText),
    }
}

// ---------------------------------------------------------------------------
// BinaryCodec
// ---------------------------------------------------------------------------

/// Format marker, first header byte (`'O'`).
pub const BINARY_MARKER: u8 = 0x4f;
/// Layout version, second header byte.
pub const BINARY_VERSION: u8 = 1;

const FLAG_RAW_PAYLOAD: u8 = 0x01;
const FLAG_DESTINATION: u8 = 0x02;

/// Compact binary codec.
///
/// ```text
/// ┌────────┬─────────┬──────┬───────┐
/// │ marker │ version │ type │ flags │   fixed 4-byte header
/// └────────┴─────────┴──────┴───────┘
/// u16 len + requestId
/// u16 len + action            (empty unless CALL)
/// u16 len + destination       (only if flags & 0x02)
/// u8 hop count, then per hop: u16 len + nodeId
/// u16 len + errorCode, u16 len + errorDescription   (CALLERROR only)
/// u32 len + payload           (JSON text, or raw bytes if flags & 0x01;
///                              errorDetails JSON for CALLERROR)
/// ```
///
/// All integers are big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Binary
    }

    fn encode(&self, envelope: &Envelope) -> Result<Frame, ProtocolError> {
        let mut flags = 0;
        if envelope.destination.is_some() {
            flags |= FLAG_DESTINATION;
        }
        let payload = match &envelope.message {
            Message::Call { payload, .. } | Message::CallResult { payload } => {
                Some(payload)
            }
            Message::CallError(_) => None,
        };
        if matches!(payload, Some(Payload::Raw(_))) {
            flags |= FLAG_RAW_PAYLOAD;
        }

        let mut out = Writer(Vec::with_capacity(64));
        out.0.extend_from_slice(&[
            BINARY_MARKER,
            BINARY_VERSION,
            envelope.message_type().code(),
            flags,
        ]);
        out.put_str(DecodeField::RequestId, envelope.request_id.as_str())?;
        let action = envelope.action().map(Action::as_str).unwrap_or_default();
        out.put_str(DecodeField::Action, action)?;
        if let Some(destination) = &envelope.destination {
            out.put_str(DecodeField::Destination, destination.as_str())?;
        }

        let hops = envelope.network_path.hops();
        let count = u8::try_from(hops.len())
            .map_err(|_| ProtocolError::FieldTooLong(DecodeField::NetworkPath))?;
        out.0.push(count);
        for hop in hops {
            out.put_str(DecodeField::NetworkPath, hop.as_str())?;
        }

        let body = match &envelope.message {
            Message::CallError(err) => {
                out.put_str(DecodeField::ErrorCode, err.error_code.as_str())?;
                out.put_str(DecodeField::ErrorDescription, &err.error_description)?;
                serde_json::to_vec(&err.error_details).map_err(ProtocolError::Encode)?
            }
            _ => match payload {
                Some(Payload::Json(value)) => {
                    serde_json::to_vec(value).map_err(ProtocolError::Encode)?
                }
                Some(Payload::Raw(bytes)) => bytes.clone(),
                None => Vec::new(),
            },
        };
        let len = u32::try_from(body.len())
            .map_err(|_| ProtocolError::FieldTooLong(DecodeField::Payload))?;
        out.0.extend_from_slice(&len.to_be_bytes());
        out.0.extend_from_slice(&body);

        Ok(Frame::Binary(out.0))
    }

    fn decode(&self, data: &[u8]) -> Result<Envelope, DecodeError> {
        let mut input = Reader { data, pos: 0 };

        let header = input.take(DecodeField::Frame, 4)?;
        if header[0] != BINARY_MARKER {
            return Err(DecodeError::new(
                DecodeField::Frame,
                format!("bad format marker 0x{:02x}", header[0]),
            ));
        }
        if header[1] != BINARY_VERSION {
            return Err(DecodeError::new(
                DecodeField::Frame,
                format!("unsupported layout version {}", header[1]),
            ));
        }
        let flags = header[3];

        let request_id = input.take_str(DecodeField::RequestId)?;
        let request_id = (!request_id.is_empty()).then(|| RequestId::new(request_id));
        let message_type =
            MessageType::from_code(i64::from(header[2])).ok_or_else(|| {
                let err = DecodeError::new(
                    DecodeField::MessageType,
                    format!("unknown message type {}", header[2]),
                );
                match &request_id {
                    Some(id) => err.with_request_id(id),
                    None => err,
                }
            })?;
        let Some(request_id) = request_id else {
            return Err(DecodeError::new(DecodeField::RequestId, "must not be empty")
                .with_message_type(message_type));
        };
        let tag = |e: DecodeError| {
            e.with_request_id(&request_id)
                .with_message_type(message_type)
        };

        let action = input.take_str(DecodeField::Action).map_err(tag)?;
        match (message_type, action.is_empty()) {
            (MessageType::Call, true) => {
                return Err(tag(DecodeError::new(
                    DecodeField::Action,
                    "CALL requires an action",
                )));
            }
            (MessageType::CallResult | MessageType::CallError, false) => {
                return Err(tag(DecodeError::new(
                    DecodeField::Action,
                    "only CALL carries an action",
                )));
            }
            _ => {}
        }

        let destination = if flags & FLAG_DESTINATION != 0 {
            Some(NodeId::new(input.take_str(DecodeField::Destination).map_err(tag)?))
        } else {
            None
        };

        let hop_count = input.take(DecodeField::NetworkPath, 1).map_err(tag)?[0];
        let mut hops = Vec::with_capacity(usize::from(hop_count));
        for _ in 0..hop_count {
            hops.push(NodeId::new(input.take_str(DecodeField::NetworkPath).map_err(tag)?));
        }
        let network_path = NetworkPath::from_hops(hops).map_err(|e| {
            tag(DecodeError::new(DecodeField::NetworkPath, e.to_string()))
        })?;

        let error_head = if message_type == MessageType::CallError {
            let code = input.take_str(DecodeField::ErrorCode).map_err(tag)?;
            let description =
                input.take_str(DecodeField::ErrorDescription).map_err(tag)?;
            Some((code, description))
        } else {
            None
        };

        let len_bytes = input.take(DecodeField::Payload, 4).map_err(tag)?;
        let len = u32::from_be_bytes([
            len_bytes[0],
            len_bytes[1],
            len_bytes[2],
            len_bytes[3],
        ]) as usize;
        let body = input.take(DecodeField::Payload, len).map_err(tag)?;
        if input.pos != data.len() {
            return Err(tag(DecodeError::new(
                DecodeField::Frame,
                format!("{} trailing bytes", data.len() - input.pos),
            )));
        }

        let parse_json = |bytes: &[u8]| {
            serde_json::from_slice::<Value>(bytes).map_err(|e| {
                tag(DecodeError::new(DecodeField::Payload, format!("not JSON: {e}")))
            })
        };
        let payload = if flags & FLAG_RAW_PAYLOAD != 0 {
            Payload::Raw(body.to_vec())
        } else if error_head.is_some() {
            Payload::Raw(Vec::new())
        } else {
            Payload::Json(parse_json(body)?)
        };

        let message = match (message_type, error_head) {
            (MessageType::Call, _) => Message::Call {
                action: Action::new(action),
                payload,
            },
            (MessageType::CallResult, _) => Message::CallResult { payload },
            (MessageType::CallError, Some((code, description))) => {
                Message::CallError(
                    CallError::new(ErrorCode::parse(&code), description)
                        .with_details(parse_json(body)?),
                )
            }
            (MessageType::CallError, None) => {
                return Err(tag(DecodeError::new(
                    DecodeField::ErrorCode,
                    "missing error header",
                )));
            }
        };

        Ok(Envelope {
            request_id,
            destination,
            network_path,
            message,
        })
    }
}

struct Writer(Vec<u8>);

impl Writer {
    fn put_str(&mut self, field: DecodeField, s: &str) -> Result<(), ProtocolError> {
        let len = u16::try_from(s.len())
            .map_err(|_| ProtocolError::FieldTooLong(field))?;
        self.0.extend_from_slice(&len.to_be_bytes());
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, field: DecodeField, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(DecodeError::new(field, "truncated"));
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_str(&mut self, field: DecodeField) -> Result<String, DecodeError> {
        let len = self.take(field, 2)?;
        let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
        let bytes = self.take(field, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::new(field, "not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed_call() -> Envelope {
        Envelope::call("req-1".into(), "GetFile".into(), json!({"requestId": 7}))
            .to("CSMS".into())
            .with_path(NetworkPath::from_hops(["CS001".into(), "NN-A".into()]).unwrap())
    }

    // =====================================================================
    // Text form
    // =====================================================================

    #[test]
    fn test_text_call_wire_shape() {
        let env = Envelope::call("msg-1".into(), "Heartbeat".into(), Payload::empty());
        let frame = TextCodec.encode(&env).unwrap();
        assert_eq!(frame, Frame::Text(r#"[2,"msg-1","Heartbeat",{}]"#.into()));
    }

    #[test]
    fn test_text_call_error_is_five_elements() {
        let env = Envelope::call_error(
            "msg-1".into(),
            CallError::new(ErrorCode::NotSupported, "no handler"),
        );
        let Frame::Text(text) = TextCodec.encode(&env).unwrap() else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!([4, "msg-1", "NotSupported", "no handler", {}]));
    }

    #[test]
    fn test_text_round_trip_each_type() {
        let envelopes = [
            Envelope::call("a".into(), "BootNotification".into(), json!({"reason": "PowerUp"})),
            Envelope::call_result("b".into(), json!({"status": "Accepted"})),
            Envelope::call_error(
                "c".into(),
                CallError::new(ErrorCode::SecurityError, "denied")
                    .with_details(json!({"hint": 1})),
            ),
        ];
        for env in envelopes {
            let frame = TextCodec.encode(&env).unwrap();
            assert_eq!(decode_frame(&frame).unwrap(), env);
        }
    }

    #[test]
    fn test_text_decode_three_element_call_error() {
        let raw = br#"[4, "x", {"errorCode": "InternalError", "errorDescription": "oops"}]"#;
        let env = TextCodec.decode(raw).unwrap();
        let Message::CallError(err) = env.message else {
            panic!("expected CallError");
        };
        assert_eq!(err.error_code, ErrorCode::InternalError);
        assert_eq!(err.error_description, "oops");
    }

    #[test]
    fn test_text_decode_rejects_wrong_element_count() {
        let err = TextCodec.decode(br#"[2, "id-9", "Heartbeat"]"#).unwrap_err();
        assert_eq!(err.field, DecodeField::ElementCount);
        assert_eq!(err.request_id, Some(RequestId::new("id-9")));

        let err = TextCodec.decode(br#"[3, "id-9", {}, {}]"#).unwrap_err();
        assert_eq!(err.field, DecodeField::ElementCount);
    }

    #[test]
    fn test_text_decode_rejects_unknown_type() {
        let err = TextCodec.decode(br#"[7, "id", {}]"#).unwrap_err();
        assert_eq!(err.field, DecodeField::MessageType);
        assert_eq!(err.error_code(), ErrorCode::MessageTypeNotSupported);
        assert_eq!(err.request_id, Some(RequestId::new("id")));
        assert_eq!(err.message_type, None);
        assert!(err.wants_reply());
    }

    #[test]
    fn test_text_decode_malformed_result_is_not_answerable() {
        let err = TextCodec.decode(br#"[3, "r-9", {}, {}]"#).unwrap_err();
        assert_eq!(err.request_id, Some(RequestId::new("r-9")));
        assert_eq!(err.message_type, Some(MessageType::CallResult));
        assert!(!err.wants_reply());
    }

    #[test]
    fn test_text_decode_rejects_empty_request_id() {
        let err = TextCodec.decode(br#"[2, "", "Heartbeat", {}]"#).unwrap_err();
        assert_eq!(err.field, DecodeField::RequestId);
    }

    #[test]
    fn test_text_decode_rejects_non_string_action() {
        let err = TextCodec.decode(br#"[2, "id", 17, {}]"#).unwrap_err();
        assert_eq!(err.field, DecodeField::Action);
        assert_eq!(err.request_id, Some(RequestId::new("id")));
    }

    #[test]
    fn test_text_decode_garbage() {
        assert_eq!(TextCodec.decode(b"not json").unwrap_err().field, DecodeField::Frame);
        assert_eq!(TextCodec.decode(b"{}").unwrap_err().field, DecodeField::Frame);
        assert_eq!(TextCodec.decode(b"[]").unwrap_err().field, DecodeField::MessageType);
    }

    #[test]
    fn test_text_encode_raw_payload_fails() {
        let env = Envelope::call("a".into(), "DataTransfer".into(), Payload::Raw(vec![1]));
        assert!(matches!(
            TextCodec.encode(&env),
            Err(ProtocolError::PayloadNotText)
        ));
    }

    // =====================================================================
    // Binary form
    // =====================================================================

    #[test]
    fn test_binary_header_layout() {
        let Frame::Binary(bytes) = BinaryCodec.encode(&routed_call()).unwrap() else {
            panic!("expected binary frame");
        };
        assert_eq!(&bytes[..4], &[BINARY_MARKER, BINARY_VERSION, 2, FLAG_DESTINATION]);
        assert_eq!(&bytes[4..6], &[0, 5]);
        assert_eq!(&bytes[6..11], b"req-1");
    }

    #[test]
    fn test_binary_round_trip_keeps_routing() {
        let env = routed_call();
        let frame = BinaryCodec.encode(&env).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), env);
    }

    #[test]
    fn test_binary_round_trip_raw_and_error() {
        let raw = Envelope::call("r".into(), "SendFile".into(), Payload::Raw(vec![0, 255, 7]));
        let err = Envelope::call_error(
            "e".into(),
            CallError::new(ErrorCode::GenericError, "filtered").with_details(json!({"n": 1})),
        )
        .to("CS001".into());
        for env in [raw, err] {
            let frame = BinaryCodec.encode(&env).unwrap();
            assert_eq!(BinaryCodec.decode(frame.as_bytes()).unwrap(), env);
        }
    }

    #[test]
    fn test_binary_decode_truncated() {
        let frame = BinaryCodec.encode(&routed_call()).unwrap();
        let bytes = frame.as_bytes();
        let err = BinaryCodec.decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.field, DecodeField::Payload);
        assert_eq!(err.request_id, Some(RequestId::new("req-1")));
    }

    #[test]
    fn test_binary_decode_rejects_bad_marker_and_trailing_bytes() {
        assert_eq!(
            BinaryCodec.decode(&[0x00, 1, 2, 0]).unwrap_err().field,
            DecodeField::Frame
        );
        let mut bytes = BinaryCodec.encode(&routed_call()).unwrap().as_bytes().to_vec();
        bytes.push(0);
        assert_eq!(BinaryCodec.decode(&bytes).unwrap_err().field, DecodeField::Frame);
    }

    #[test]
    fn test_binary_decode_rejects_looping_path() {
        let mut out = Writer(vec![BINARY_MARKER, BINARY_VERSION, 2, 0]);
        out.put_str(DecodeField::RequestId, "id").unwrap();
        out.put_str(DecodeField::Action, "Heartbeat").unwrap();
        out.0.push(2);
        out.put_str(DecodeField::NetworkPath, "A").unwrap();
        out.put_str(DecodeField::NetworkPath, "A").unwrap();
        out.0.extend_from_slice(&2u32.to_be_bytes());
        out.0.extend_from_slice(b"{}");

        let err = BinaryCodec.decode(&out.0).unwrap_err();
        assert_eq!(err.field, DecodeField::NetworkPath);
    }

    #[test]
    fn test_binary_decode_rejects_action_on_result() {
        let mut out = Writer(vec![BINARY_MARKER, BINARY_VERSION, 3, 0]);
        out.put_str(DecodeField::RequestId, "id").unwrap();
        out.put_str(DecodeField::Action, "Heartbeat").unwrap();
        out.0.push(0);
        out.0.extend_from_slice(&2u32.to_be_bytes());
        out.0.extend_from_slice(b"{}");

        let err = BinaryCodec.decode(&out.0).unwrap_err();
        assert_eq!(err.field, DecodeField::Action);
        assert_eq!(err.message_type, Some(MessageType::CallResult));
    }

    #[test]
    fn test_binary_decode_unknown_type_keeps_request_id() {
        let mut out = Writer(vec![BINARY_MARKER, BINARY_VERSION, 9, 0]);
        out.put_str(DecodeField::RequestId, "t-1").unwrap();

        let err = BinaryCodec.decode(&out.0).unwrap_err();
        assert_eq!(err.field, DecodeField::MessageType);
        assert_eq!(err.request_id, Some(RequestId::new("t-1")));
        assert_eq!(err.error_code(), ErrorCode::MessageTypeNotSupported);
    }

    #[test]
    fn test_wire_format_of_frame() {
        assert_eq!(WireFormat::of(&Frame::Text(String::new())), WireFormat::Text);
        assert_eq!(WireFormat::of(&Frame::Binary(Vec::new())), WireFormat::Binary);
    }
}
