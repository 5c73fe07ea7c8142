//! Error types for the routing layer.

use std::time::Duration;

use chargelink_protocol::{CallError, NodeId, RequestId};

/// A node id could not be turned into a link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No unexpired reachability entry exists for the node.
    #[error("node {0} is not reachable")]
    NotReachable(NodeId),

    /// Following hub entries went deeper than the configured limit.
    /// Usually two hubs advertising each other.
    #[error("hub chain to {0} is too deep")]
    HubDepthExceeded(NodeId),
}

/// How an outbound request ended, when it did not end with a CALLRESULT.
///
/// Exactly one outcome is delivered per request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// The peer answered with a CALLERROR.
    #[error("remote error: {0}")]
    Remote(CallError),

    /// No response arrived before the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The link the request went out on was closed while waiting.
    #[error("link closed while awaiting response")]
    TransportLost,

    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// There was no route to the destination; nothing was sent.
    #[error("no route to {0}")]
    Unroutable(NodeId),

    /// The request id is already in flight.
    #[error("request {0} is already pending")]
    DuplicateRequestId(RequestId),
}

impl From<RoutingError> for RequestError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::NotReachable(node)
            | RoutingError::HubDepthExceeded(node) => Self::Unroutable(node),
        }
    }
}
