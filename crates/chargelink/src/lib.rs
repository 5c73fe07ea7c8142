//! # Chargelink
//!
//! OCPP message exchange and overlay routing for charging-infrastructure
//! nodes.
//!
//! A [`Node`] is a charging station, a CSMS, or a networking node in
//! between. Every node speaks the same RPC: it answers CALLs addressed to
//! it through registered handlers, issues its own CALLs through
//! [`Outbound`], and runs CALLs addressed elsewhere through a forwarding
//! pipeline of filter hooks before passing them one hop on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chargelink::prelude::*;
//!
//! # async fn run() -> Result<(), NodeError> {
//! let node = Node::builder(NodeConfig::new("CSMS"))
//!     .handler("Heartbeat", |_ctx, _payload| async {
//!         Ok(serde_json::json!({ "currentTime": chrono::Utc::now() }))
//!     })
//!     .build();
//! node.serve(WebSocketTransport::bind("0.0.0.0:9000").await?).await
//! # }
//! ```

mod config;
mod connection;
mod error;
mod forward;
mod handlers;
mod inbound;
mod link;
mod node;
mod outbound;
mod topology;

pub use config::NodeConfig;
pub use error::NodeError;
pub use handlers::{HandlerRegistry, HandlerResult, RequestContext};
pub use link::Direction;
pub use node::{Node, NodeBuilder};
pub use outbound::Outbound;
pub use topology::{TOPOLOGY_ACTION, TopologyEntry};

pub use chargelink_forwarding as forwarding;
pub use chargelink_protocol as protocol;
pub use chargelink_routing as routing;
pub use chargelink_transport as transport;

pub mod prelude {
    pub use crate::{
        Direction, HandlerRegistry, HandlerResult, Node, NodeBuilder, NodeConfig, NodeError,
        Outbound, RequestContext, TOPOLOGY_ACTION, TopologyEntry,
    };
    pub use chargelink_forwarding::{
        DefaultPolicy, FilterContext, FilterHook, ForwardingAudit, ForwardingDecision,
        ForwardingResult, RejectResponse, TransitRequest, filter_fn,
    };
    pub use chargelink_protocol::{
        Action, CallError, ErrorCode, NodeId, RequestId, SourceRouting, WireFormat,
    };
    pub use chargelink_routing::RequestError;
    pub use chargelink_transport::{WebSocketTransport, channel_pair};
}
