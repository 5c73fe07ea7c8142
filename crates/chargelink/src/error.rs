//! Unified error type for a Chargelink node.

use chargelink_forwarding::ForwardingError;
use chargelink_protocol::{CallError, PayloadError, ProtocolError};
use chargelink_routing::{RequestError, RoutingError};
use chargelink_transport::{ConnectionId, TransportError};

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A transport-level error (bind, dial, send).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The payload codec or signer refused a payload.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// A route lookup failed outside of a request.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// An outbound request did not produce a CALLRESULT.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Invalid forwarding configuration.
    #[error(transparent)]
    Forwarding(#[from] ForwardingError),

    /// A connection did not present an identity and none was given.
    #[error("{0} has no peer identity")]
    UnknownPeer(ConnectionId),
}

impl NodeError {
    /// The CALLERROR a remote peer answered with, if that is what this is.
    pub fn remote(&self) -> Option<&CallError> {
        match self {
            Self::Request(RequestError::Remote(err)) => Some(err),
            _ => None,
        }
    }

    /// `true` if the request never left this node for lack of a route.
    pub fn is_unroutable(&self) -> bool {
        matches!(self, Self::Request(RequestError::Unroutable(_)))
    }
}
