//! The verdict on one transit message.

use chargelink_protocol::{CallError, Payload};

/// The three possible verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardingResult {
    Forward,
    Reject,
    Drop,
}

impl std::fmt::Display for ForwardingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "FORWARD"),
            Self::Reject => write!(f, "REJECT"),
            Self::Drop => write!(f, "DROP"),
        }
    }
}

/// What a REJECT sends back to the requester.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectResponse {
    /// A CALLRESULT with a negative, action-appropriate payload.
    Result(Payload),
    /// A CALLERROR.
    Error(CallError),
}

/// A transit node's verdict on one message.
///
/// After the pipeline has run, `reject_response` is `Some` exactly when
/// `result` is [`ForwardingResult::Reject`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardingDecision {
    pub result: ForwardingResult,
    pub reject_response: Option<RejectResponse>,
    pub rationale: String,
}

impl ForwardingDecision {
    pub fn forward(rationale: impl Into<String>) -> Self {
        Self {
            result: ForwardingResult::Forward,
            reject_response: None,
            rationale: rationale.into(),
        }
    }

    /// A REJECT answering the requester with `response`.
    pub fn reject(response: RejectResponse, rationale: impl Into<String>) -> Self {
        Self {
            result: ForwardingResult::Reject,
            reject_response: Some(response),
            rationale: rationale.into(),
        }
    }

    /// A REJECT that leaves the response to the pipeline, which fills in
    /// the codec's generic negative response.
    pub fn reject_generic(rationale: impl Into<String>) -> Self {
        Self {
            result: ForwardingResult::Reject,
            reject_response: None,
            rationale: rationale.into(),
        }
    }

    pub fn drop(rationale: impl Into<String>) -> Self {
        Self {
            result: ForwardingResult::Drop,
            reject_response: None,
            rationale: rationale.into(),
        }
    }

    pub fn is_forward(&self) -> bool {
        self.result == ForwardingResult::Forward
    }
}
