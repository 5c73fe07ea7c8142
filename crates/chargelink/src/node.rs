//! `Node` builder, link management, and the background sweep.
//!
//! A node ties the layers together: transport → protocol → routing →
//! forwarding. It owns the routing state, the handler registry, and the
//! forwarding pipeline, and spawns two tasks per attached connection (a
//! reader running the dispatch loop and a writer draining the link queue).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chargelink_forwarding::{FilterHook, ForwardingAudit, ForwardingPipeline};
use chargelink_protocol::{Action, JsonPayloadCodec, NodeId, PayloadCodec, Signer};
use chargelink_routing::{PendingRegistry, ReachabilityEntry, ReachabilityTable, Route};
use chargelink_transport::{Connection, ConnectionId, Transport, WebSocketConnection};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::{read_loop, write_loop};
use crate::forward::TransitTable;
use crate::handlers::{HandlerResult, RequestContext};
use crate::link::{Direction, Link};
use crate::outbound::Outbound;
use crate::{HandlerRegistry, NodeConfig, NodeError};

/// Shared node state passed to every connection task.
pub(crate) struct NodeInner {
    pub(crate) config: NodeConfig,
    pub(crate) reachability: ReachabilityTable,
    pub(crate) pending: PendingRegistry,
    pub(crate) transit: TransitTable,
    pub(crate) links: RwLock<HashMap<ConnectionId, Arc<Link>>>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) pipeline: ForwardingPipeline,
    pub(crate) codec: Arc<dyn PayloadCodec>,
    pub(crate) signer: Option<Arc<dyn Signer>>,
    pub(crate) shutdown: CancellationToken,
}

impl NodeInner {
    pub(crate) fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub(crate) fn link(&self, id: ConnectionId) -> Option<Arc<Link>> {
        self.links.read().get(&id).cloned()
    }

    /// Forgets a link and everything that depended on it.
    pub(crate) fn detach(&self, id: ConnectionId) {
        let Some(link) = self.links.write().remove(&id) else {
            return;
        };
        link.cancel.cancel();
        let mut unreachable = self.reachability.unregister_route(&link.route());
        // Whatever the peer advertised goes with its last link.
        let peer_still_linked = self.links.read().values().any(|l| l.peer == link.peer);
        if !peer_still_linked {
            unreachable.extend(
                self.reachability
                    .unregister_route(&Route::ViaHub(link.peer.clone())),
            );
        }
        let failed = self.pending.fail_link(id);
        let transit = self.transit.forget_link(id);
        tracing::info!(
            conn_id = %id,
            peer = %link.peer,
            unreachable = unreachable.len(),
            failed_requests = failed,
            dropped_transit = transit,
            "link detached"
        );
    }
}

// ---------------------------------------------------------------------------
// NodeBuilder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a [`Node`].
///
/// # Example
///
/// ```rust,ignore
/// use chargelink::prelude::*;
///
/// let node = Node::builder(NodeConfig::new("NN-A"))
///     .handler("Heartbeat", |_ctx, _payload| async {
///         Ok(serde_json::json!({"currentTime": chrono::Utc::now()}))
///     })
///     .build();
/// node.serve(WebSocketTransport::bind("0.0.0.0:9000").await?).await
/// ```
pub struct NodeBuilder {
    config: NodeConfig,
    handlers: HandlerRegistry,
    codec: Arc<dyn PayloadCodec>,
    signer: Option<Arc<dyn Signer>>,
    /// Deferred pipeline setup; the pipeline needs the final codec.
    pipeline_setup: Vec<Box<dyn FnOnce(&mut ForwardingPipeline) + Send>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
            codec: Arc::new(JsonPayloadCodec),
            signer: None,
            pipeline_setup: Vec::new(),
        }
    }

    /// Registers a business handler for CALLs addressed to this node.
    pub fn handler<F, Fut>(
        mut self,
        action: impl Into<Action>,
        handler: F,
    ) -> Self
    where
        F: Fn(RequestContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register(action, handler);
        self
    }

    /// Replaces the whole handler registry.
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replaces the schema-less JSON payload codec.
    pub fn payload_codec(mut self, codec: impl PayloadCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Signs every outgoing request payload.
    pub fn signer(mut self, signer: impl Signer) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    /// Adds a filter hook for transit requests of one action.
    pub fn filter_hook(
        mut self,
        action: impl Into<Action>,
        hook: impl FilterHook,
    ) -> Self {
        let action = action.into();
        self.pipeline_setup
            .push(Box::new(move |p| p.add_hook(action, hook)));
        self
    }

    /// Adds a filter hook that sees every transit request.
    pub fn filter_hook_for_all(mut self, hook: impl FilterHook) -> Self {
        self.pipeline_setup
            .push(Box::new(move |p| p.add_hook_for_all(hook)));
        self
    }

    /// Adds a sink for forwarding decisions.
    pub fn audit(mut self, sink: impl ForwardingAudit) -> Self {
        self.pipeline_setup.push(Box::new(move |p| p.add_audit(sink)));
        self
    }

    /// Builds the node and starts its sweep task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Node {
        let mut pipeline =
            ForwardingPipeline::new(Arc::clone(&self.codec), self.config.forwarding());
        for setup in self.pipeline_setup {
            setup(&mut pipeline);
        }

        let inner = Arc::new(NodeInner {
            reachability: ReachabilityTable::new(),
            pending: PendingRegistry::new(),
            transit: TransitTable::default(),
            links: RwLock::new(HashMap::new()),
            handlers: self.handlers,
            pipeline,
            codec: self.codec,
            signer: self.signer,
            shutdown: CancellationToken::new(),
            config: self.config,
        });

        tokio::spawn(sweep_loop(Arc::downgrade(&inner)));
        tracing::info!(
            node_id = %inner.config.node_id,
            default_policy = %inner.config.default_policy,
            "node started"
        );
        Node { inner }
    }
}

/// Periodically drops expired reachability and transit entries. Ends when
/// the node is shut down or dropped.
async fn sweep_loop(node: Weak<NodeInner>) {
    let (interval, shutdown) = match node.upgrade() {
        Some(inner) => (inner.config.sweep_interval, inner.shutdown.clone()),
        None => return,
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let Some(inner) = node.upgrade() else {
            return;
        };
        let routes = inner.reachability.sweep();
        let transit = inner.transit.sweep();
        if routes + transit > 0 {
            tracing::debug!(routes, transit, "swept expired entries");
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A running node: charging station, CSMS, or networking node alike.
///
/// Cloning is cheap; all clones drive the same node.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn id(&self) -> &NodeId {
        self.inner.node_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// The OUT side: requests originating at this node.
    pub fn outbound(&self) -> Outbound {
        Outbound::new(Arc::clone(&self.inner))
    }

    pub fn reachability(&self) -> &ReachabilityTable {
        &self.inner.reachability
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.inner.pending
    }

    /// Peers of the currently attached links.
    pub fn peers(&self) -> Vec<(ConnectionId, NodeId)> {
        self.inner
            .links
            .read()
            .values()
            .map(|link| (link.id, link.peer.clone()))
            .collect()
    }

    /// Attaches a connection whose peer identity the transport knows.
    ///
    /// # Errors
    /// [`NodeError::UnknownPeer`] if the connection has no peer identity.
    pub fn attach<C: Connection>(
        &self,
        conn: C,
        direction: Direction,
    ) -> Result<ConnectionId, NodeError> {
        let peer = conn
            .peer_identity()
            .map(NodeId::new)
            .ok_or(NodeError::UnknownPeer(conn.id()))?;
        Ok(self.attach_as(conn, direction, peer))
    }

    /// Attaches a connection to `peer`.
    ///
    /// Registers a priority-0 route to the peer and spawns the connection's
    /// reader and writer tasks.
    pub fn attach_as<C: Connection>(
        &self,
        conn: C,
        direction: Direction,
        peer: NodeId,
    ) -> ConnectionId {
        let conn = Arc::new(conn);
        let id = conn.id();
        let (tx, rx) = mpsc::channel(self.inner.config.link_buffer.max(1));
        let cancel = self.inner.shutdown.child_token();
        let link = Arc::new(Link::new(
            id,
            peer.clone(),
            direction,
            tx,
            self.inner.config.wire_format,
            cancel.clone(),
        ));

        self.inner.links.write().insert(id, Arc::clone(&link));
        self.inner
            .reachability
            .register(ReachabilityEntry::new(peer.clone(), link.route(), 0));
        tracing::info!(conn_id = %id, %peer, ?direction, "link attached");

        tokio::spawn(write_loop(Arc::clone(&conn), rx, cancel));
        tokio::spawn(read_loop(Arc::clone(&self.inner), conn, link));
        id
    }

    /// Dials `base_url/<our id>` and attaches the connection to `peer`.
    pub async fn connect(
        &self,
        base_url: &str,
        peer: impl Into<NodeId>,
    ) -> Result<ConnectionId, NodeError> {
        let peer = peer.into();
        let conn =
            WebSocketConnection::connect(base_url, self.id().as_str(), peer.as_str()).await?;
        Ok(self.attach_as(conn, Direction::Outbound, peer))
    }

    /// Accepts connections until the node is shut down.
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<(), NodeError> {
        tracing::info!(node_id = %self.id(), "accepting connections");
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        if let Err(e) = self.attach(conn, Direction::Inbound) {
                            tracing::warn!(error = %e, "refusing connection");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }
        if let Err(e) = transport.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
        Ok(())
    }

    /// Closes one link. Requests pending on it fail with `TransportLost`.
    pub fn close_link(&self, id: ConnectionId) {
        self.inner.detach(id);
    }

    /// Stops accepting, closes every link, and stops the sweep task.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let ids: Vec<ConnectionId> = self.inner.links.read().keys().copied().collect();
        for id in ids {
            self.inner.detach(id);
        }
        tracing::info!(node_id = %self.id(), "node shut down");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", self.id())
            .field("links", &self.inner.links.read().len())
            .finish_non_exhaustive()
    }
}
