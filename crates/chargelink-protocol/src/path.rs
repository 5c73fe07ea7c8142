//! Overlay routing primitives: [`NetworkPath`] and [`SourceRouting`].
//!
//! A network path records the hops a message has crossed. It is the only
//! loop-prevention mechanism of the overlay: a relay that would append
//! itself a second time refuses the message instead.
//!
//! ```text
//! CS001 ──► NN-A ──► NN-B ──► CSMS
//! path at CSMS: [CS001, NN-A, NN-B]
//!                 ▲origin      ▲last hop (who handed it over)
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{NodeId, ProtocolError};

/// Ordered, append-only list of the nodes a message has traversed.
///
/// Paths are values: [`append`](Self::append) returns a new path and leaves
/// the original untouched, so concurrent forwarding decisions over the same
/// inbound message never observe each other's hops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkPath(Vec<NodeId>);

impl NetworkPath {
    /// An empty path, as created by a message's origin.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from hops, rejecting repeated nodes.
    pub fn from_hops(
        hops: impl IntoIterator<Item = NodeId>,
    ) -> Result<Self, ProtocolError> {
        hops.into_iter()
            .try_fold(Self::new(), |path, hop| path.append(hop))
    }

    /// Returns a copy of this path with `node` appended.
    ///
    /// # Errors
    /// [`ProtocolError::LoopDetected`] if `node` is already on the path.
    pub fn append(&self, node: NodeId) -> Result<Self, ProtocolError> {
        if self.contains(&node) {
            return Err(ProtocolError::LoopDetected(node));
        }
        let mut hops = Vec::with_capacity(self.0.len() + 1);
        hops.extend(self.0.iter().cloned());
        hops.push(node);
        Ok(Self(hops))
    }

    /// The node that authored the message, if the path is non-empty.
    pub fn origin(&self) -> Option<&NodeId> {
        self.0.first()
    }

    /// The most recent relay: whoever handed the message over last.
    pub fn last_hop(&self) -> Option<&NodeId> {
        self.0.last()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains(node)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hops(&self) -> &[NodeId] {
        &self.0
    }

    /// The same hops, last relay first: the route a reply walks back.
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().cloned().collect())
    }
}

/// Where an outbound message should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRouting {
    /// A single destination node.
    To(NodeId),
    /// Every node in the set, each routed and tracked independently.
    Broadcast(BTreeSet<NodeId>),
    /// Back to whoever handed over the message that arrived along this
    /// (inbound) path.
    ReplyToSender(NetworkPath),
}

impl SourceRouting {
    /// Routing that answers the sender of an inbound message.
    pub fn reply_to(inbound: &NetworkPath) -> Self {
        Self::ReplyToSender(inbound.clone())
    }

    /// Resolves the routing to the concrete destination node ids.
    ///
    /// # Errors
    /// [`ProtocolError::EmptyPath`] when replying along an empty path.
    pub fn resolve(&self) -> Result<Vec<NodeId>, ProtocolError> {
        match self {
            Self::To(node) => Ok(vec![node.clone()]),
            Self::Broadcast(nodes) => Ok(nodes.iter().cloned().collect()),
            Self::ReplyToSender(path) => path
                .last_hop()
                .cloned()
                .map(|sender| vec![sender])
                .ok_or(ProtocolError::EmptyPath),
        }
    }
}
