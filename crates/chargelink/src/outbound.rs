//! The OUT side: requests this node originates.

use std::sync::Arc;
use std::time::Duration;

use chargelink_protocol::{
    Action, Envelope, NodeId, PayloadError, PayloadKind, RequestId, SourceRouting,
};
use chargelink_routing::RequestError;
use futures_util::future::join_all;
use serde_json::Value;

use crate::node::NodeInner;
use crate::topology::{TOPOLOGY_ACTION, TopologyEntry, TopologyNotification};
use crate::NodeError;

/// Issues requests from a node and waits for their responses.
///
/// Obtained from [`Node::outbound`](crate::Node::outbound); cheap to clone.
#[derive(Clone)]
pub struct Outbound {
    node: Arc<NodeInner>,
}

impl Outbound {
    pub(crate) fn new(node: Arc<NodeInner>) -> Self {
        Self { node }
    }

    /// Sends `action` to one node with the configured request timeout.
    pub async fn call(
        &self,
        to: impl Into<NodeId>,
        action: impl Into<Action>,
        payload: Value,
    ) -> Result<Value, NodeError> {
        let timeout = self.node.config.request_timeout;
        self.call_with_timeout(to, action, payload, timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        to: impl Into<NodeId>,
        action: impl Into<Action>,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, NodeError> {
        self.send_to(&to.into(), &action.into(), payload, timeout)
            .await
    }

    /// Sends `action` to every destination `routing` resolves to, in
    /// parallel, and collects one result per destination.
    ///
    /// # Errors
    /// Fails as a whole only if `routing` resolves to nothing usable, e.g.
    /// a reply to an empty path.
    pub async fn send(
        &self,
        routing: SourceRouting,
        action: impl Into<Action>,
        payload: Value,
        timeout: Duration,
    ) -> Result<Vec<(NodeId, Result<Value, NodeError>)>, NodeError> {
        let action = action.into();
        let destinations = routing.resolve()?;
        let action = &action;
        let sends = destinations.into_iter().map(|destination| {
            let payload = payload.clone();
            async move {
                let result = self.send_to(&destination, action, payload, timeout).await;
                (destination, result)
            }
        });
        Ok(join_all(sends).await)
    }

    /// Tells `neighbor` which nodes are reachable through us.
    ///
    /// Returns whether the neighbor accepted the advertisement.
    pub async fn advertise_topology(
        &self,
        neighbor: impl Into<NodeId>,
        reachable: Vec<TopologyEntry>,
    ) -> Result<bool, NodeError> {
        let notification = TopologyNotification {
            reachable_nodes: reachable,
        };
        let payload =
            serde_json::to_value(&notification).map_err(|e| PayloadError::Malformed {
                action: Action::new(TOPOLOGY_ACTION),
                kind: PayloadKind::Request,
                reason: e.to_string(),
            })?;
        let response = self.call(neighbor, TOPOLOGY_ACTION, payload).await?;
        Ok(response.get("status").and_then(Value::as_str) == Some("Accepted"))
    }

    async fn send_to(
        &self,
        destination: &NodeId,
        action: &Action,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, NodeError> {
        let node = &self.node;
        // No route means no timer: fail before anything is registered.
        let conn = node
            .reachability
            .next_hop(destination, node.config.max_hub_depth)
            .map_err(RequestError::from)?;
        let link = node
            .link(conn)
            .ok_or_else(|| RequestError::Unroutable(destination.clone()))?;

        let mut encoded = node.codec.encode(action, PayloadKind::Request, payload)?;
        if let Some(signer) = &node.signer {
            encoded = signer.sign(action, encoded)?;
        }

        let request_id = self.mint_request_id();
        let handle = node
            .pending
            .register(request_id.clone(), conn, action.clone(), timeout)?;
        let envelope =
            Envelope::call(request_id.clone(), action.clone(), encoded).to(destination.clone());
        tracing::debug!(
            %request_id,
            %action,
            %destination,
            conn_id = %conn,
            "sending request"
        );
        if let Err(e) = link.send(&envelope).await {
            tracing::debug!(%request_id, error = %e, "request not sent");
            return Err(RequestError::TransportLost.into());
        }

        let response = handle.wait().await?;
        Ok(node.codec.decode(action, PayloadKind::Response, &response)?)
    }

    /// Draws request ids until one is not in flight.
    fn mint_request_id(&self) -> RequestId {
        loop {
            let id = RequestId::generate();
            if !self.node.pending.contains(&id) {
                return id;
            }
        }
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("node", self.node.node_id())
            .finish()
    }
}
