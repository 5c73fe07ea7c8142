//! Node configuration.

use std::time::Duration;

use chargelink_forwarding::{DefaultPolicy, ForwardingConfig};
use chargelink_protocol::{NodeId, WireFormat};
use serde::{Deserialize, Serialize};

/// Configuration for a [`Node`](crate::Node).
///
/// Every field has a default except `node_id`, which is the only thing two
/// nodes on the same overlay must never share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's identity on the overlay.
    pub node_id: NodeId,

    /// Deadline for outbound requests that do not set their own.
    pub request_timeout: Duration,

    /// What transit requests no hook decided on get.
    pub default_policy: DefaultPolicy,

    /// Time budget for filter hooks per transit request.
    pub hook_timeout: Duration,

    /// How often expired reachability and transit entries are swept.
    pub sweep_interval: Duration,

    /// Format for links until the peer shows which one it speaks.
    pub wire_format: WireFormat,

    /// Frames queued per link before senders wait.
    pub link_buffer: usize,

    /// How many hubs a route may pass through.
    pub max_hub_depth: usize,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_default_policy(mut self, policy: DefaultPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    pub fn with_link_buffer(mut self, frames: usize) -> Self {
        self.link_buffer = frames;
        self
    }

    pub fn with_max_hub_depth(mut self, depth: usize) -> Self {
        self.max_hub_depth = depth;
        self
    }

    /// The subset the forwarding pipeline needs.
    pub fn forwarding(&self) -> ForwardingConfig {
        ForwardingConfig {
            default_policy: self.default_policy,
            hook_timeout: self.hook_timeout,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new("chargelink"),
            request_timeout: Duration::from_secs(30),
            default_policy: DefaultPolicy::Forward,
            hook_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            wire_format: WireFormat::Text,
            link_buffer: 64,
            max_hub_depth: 8,
        }
    }
}
