//! The reachability table: how to get a message to a node.
//!
//! Every node id maps to one or more [`ReachabilityEntry`]s. A station
//! might be connected directly *and* advertised by a hub, so several
//! routes can coexist; [`resolve`](ReachabilityTable::resolve) picks one:
//!
//! 1. drop entries whose expiry has passed
//! 2. keep the lowest `priority`
//! 3. among those, the most recently discovered
//!
//! # Concurrency
//!
//! The table is read on every send and written only when links come and go
//! or a topology advertisement arrives. It is split into shards, each
//! behind its own `parking_lot::RwLock`, so a writer updating one node never
//! stalls readers resolving another. No lock is held across an await point.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::time::Duration;

use chargelink_protocol::NodeId;
use chargelink_transport::ConnectionId;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::RoutingError;

const DEFAULT_SHARDS: usize = 16;

/// How to reach a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// A connection this node opened (we are the client).
    Outbound(ConnectionId),
    /// A connection the peer opened to us (we are the server).
    Inbound(ConnectionId),
    /// Through another node, which must itself be resolvable.
    ViaHub(NodeId),
}

impl Route {
    /// The connection, for direct routes.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Self::Outbound(conn) | Self::Inbound(conn) => Some(*conn),
            Self::ViaHub(_) => None,
        }
    }
}

/// One known way to reach `node_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityEntry {
    pub node_id: NodeId,
    pub route: Route,
    /// Lower is preferred.
    pub priority: u32,
    pub discovered_at: Instant,
    pub expires_at: Option<Instant>,
}

impl ReachabilityEntry {
    /// A non-expiring entry discovered now.
    pub fn new(node_id: NodeId, route: Route, priority: u32) -> Self {
        Self {
            node_id,
            route,
            priority,
            discovered_at: Instant::now(),
            expires_at: None,
        }
    }

    /// Sets the entry to expire `ttl` after its discovery.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.discovered_at + ttl);
        self
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Shard = RwLock<HashMap<NodeId, Vec<ReachabilityEntry>>>;

/// Sharded map from node id to the routes that reach it.
pub struct ReachabilityTable {
    shards: Box<[Shard]>,
    hasher: RandomState,
}

impl ReachabilityTable {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a table with `shards` independent locks (at least one).
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, node: &NodeId) -> &Shard {
        let index = self.hasher.hash_one(node) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Adds an entry. An existing entry for the same node and route is
    /// replaced, which refreshes its priority, discovery time, and expiry.
    pub fn register(&self, entry: ReachabilityEntry) {
        let mut shard = self.shard(&entry.node_id).write();
        let entries = shard.entry(entry.node_id.clone()).or_default();
        tracing::debug!(
            node_id = %entry.node_id,
            route = ?entry.route,
            priority = entry.priority,
            "reachability entry registered"
        );
        match entries.iter_mut().find(|e| e.route == entry.route) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    /// Removes the entry for `node` via `route`. Returns whether one existed.
    pub fn unregister(&self, node: &NodeId, route: &Route) -> bool {
        let mut shard = self.shard(node).write();
        let Some(entries) = shard.get_mut(node) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| &e.route != route);
        let removed = entries.len() != before;
        if entries.is_empty() {
            shard.remove(node);
        }
        removed
    }

    /// Removes every entry that uses `route`, returning the affected nodes.
    ///
    /// Called when a link closes: everything reached through it is gone.
    pub fn unregister_route(&self, route: &Route) -> Vec<NodeId> {
        let mut affected = Vec::new();
        for shard in self.shards.iter() {
            shard.write().retain(|node, entries| {
                let before = entries.len();
                entries.retain(|e| &e.route != route);
                if entries.len() != before {
                    affected.push(node.clone());
                }
                !entries.is_empty()
            });
        }
        affected
    }

    /// Unexpired routes to `node`, preferred first.
    fn ranked(&self, node: &NodeId) -> Vec<Route> {
        let now = Instant::now();
        let shard = self.shard(node).read();
        let mut live: Vec<&ReachabilityEntry> = shard
            .get(node)
            .into_iter()
            .flatten()
            .filter(|e| !e.is_expired(now))
            .collect();
        live.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.discovered_at.cmp(&a.discovered_at))
        });
        live.into_iter().map(|e| e.route.clone()).collect()
    }

    /// Picks the preferred unexpired route to `node`.
    ///
    /// # Errors
    /// [`RoutingError::NotReachable`] when nothing matches.
    pub fn resolve(&self, node: &NodeId) -> Result<Route, RoutingError> {
        self.ranked(node)
            .into_iter()
            .next()
            .ok_or_else(|| RoutingError::NotReachable(node.clone()))
    }

    /// Resolves `node` all the way down to a connection, following
    /// [`Route::ViaHub`] entries at most `max_hub_depth` times. When the
    /// preferred hub cannot be resolved the next route in order is tried.
    ///
    /// # Errors
    /// Both variants name `node` itself, not the hub that failed:
    /// [`RoutingError::NotReachable`] if no route leads to a connection,
    /// [`RoutingError::HubDepthExceeded`] if the only chains found are
    /// longer than allowed.
    pub fn next_hop(
        &self,
        node: &NodeId,
        max_hub_depth: usize,
    ) -> Result<ConnectionId, RoutingError> {
        self.hop(node, max_hub_depth).map_err(|err| match err {
            RoutingError::NotReachable(_) => RoutingError::NotReachable(node.clone()),
            RoutingError::HubDepthExceeded(_) => RoutingError::HubDepthExceeded(node.clone()),
        })
    }

    fn hop(&self, node: &NodeId, depth_left: usize) -> Result<ConnectionId, RoutingError> {
        let mut last = RoutingError::NotReachable(node.clone());
        for route in self.ranked(node) {
            match route {
                Route::Outbound(conn) | Route::Inbound(conn) => return Ok(conn),
                Route::ViaHub(_) if depth_left == 0 => {
                    last = RoutingError::HubDepthExceeded(node.clone());
                }
                Route::ViaHub(hub) => match self.hop(&hub, depth_left - 1) {
                    Ok(conn) => return Ok(conn),
                    Err(err) => {
                        tracing::trace!(node_id = %node, %hub, error = %err, "hub unusable");
                        last = err;
                    }
                },
            }
        }
        Err(last)
    }

    /// All entries for `node`, expired ones included.
    pub fn entries(&self, node: &NodeId) -> Vec<ReachabilityEntry> {
        self.shard(node).read().get(node).cloned().unwrap_or_default()
    }

    /// Removes expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in self.shards.iter() {
            shard.write().retain(|node, entries| {
                let before = entries.len();
                entries.retain(|e| !e.is_expired(now));
                if entries.len() != before {
                    tracing::debug!(
                        node_id = %node,
                        expired = before - entries.len(),
                        "reachability entries expired"
                    );
                }
                removed += before - entries.len();
                !entries.is_empty()
            });
        }
        removed
    }

    /// Number of nodes with at least one entry.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReachabilityTable {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================
