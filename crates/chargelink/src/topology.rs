//! Reachability advertisements between nodes.
//!
//! A node tells a neighbor which nodes it can reach with a
//! `NotifyNetworkTopology` request. The receiver records each of them as
//! reachable via the advertiser.

use std::time::Duration;

use chargelink_protocol::{CallError, ErrorCode, Message, NodeId};
use chargelink_routing::{ReachabilityEntry, Route};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::handlers::RequestContext;
use crate::node::NodeInner;

/// Action of the built-in topology request.
pub const TOPOLOGY_ACTION: &str = "NotifyNetworkTopology";

/// One node the advertiser can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyEntry {
    pub node_id: NodeId,
    #[serde(default)]
    pub priority: u32,
    /// Seconds the entry stays valid; absent means until the advertiser's
    /// last link to the receiver drops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl TopologyEntry {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            priority: 1,
            ttl: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl.as_secs());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TopologyNotification {
    pub(crate) reachable_nodes: Vec<TopologyEntry>,
}

/// Applies an advertisement and builds the answer.
pub(crate) fn accept(node: &NodeInner, ctx: &RequestContext, payload: Value) -> Message {
    let notification: TopologyNotification = match serde_json::from_value(payload) {
        Ok(n) => n,
        Err(e) => {
            return Message::CallError(CallError::new(
                ErrorCode::FormatViolation,
                format!("invalid {TOPOLOGY_ACTION}: {e}"),
            ));
        }
    };

    let mut learned = 0;
    for advertised in notification.reachable_nodes {
        if &advertised.node_id == node.node_id() || advertised.node_id == ctx.origin {
            continue;
        }
        // Direct links keep priority 0.
        let mut entry = ReachabilityEntry::new(
            advertised.node_id,
            Route::ViaHub(ctx.origin.clone()),
            advertised.priority.max(1),
        );
        if let Some(ttl) = advertised.ttl {
            entry = entry.with_ttl(Duration::from_secs(ttl));
        }
        node.reachability.register(entry);
        learned += 1;
    }
    tracing::info!(hub = %ctx.origin, learned, "topology advertisement applied");

    Message::CallResult {
        payload: json!({ "status": "Accepted" }).into(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_wire_shape() {
        let entry = TopologyEntry::new("CSMS").with_ttl(Duration::from_secs(90));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value, json!({"nodeId": "CSMS", "priority": 1, "ttl": 90}));
    }

    #[test]
    fn test_notification_defaults_priority_and_ttl() {
        let n: TopologyNotification =
            serde_json::from_value(json!({"reachableNodes": [{"nodeId": "CS-9"}]})).unwrap();
        assert_eq!(n.reachable_nodes[0].priority, 0);
        assert_eq!(n.reachable_nodes[0].ttl, None);
    }
}
