//! Transit traffic: requests passing through this node and the responses
//! travelling back.
//!
//! Every forwarded CALL leaves a transit entry keyed by its request id and
//! origin, since request ids are only unique per origin. The matching
//! response is relayed back over the link the CALL came in on, which keeps
//! text-only stations reachable: they never see a destination field, so the
//! response cannot be routed by destination alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chargelink_forwarding::{
    FilterContext, ForwardingDecision, ForwardingResult, RejectResponse,
};
use chargelink_protocol::{
    CallError, Envelope, ErrorCode, Message, NodeId, RequestId, WireFormat,
};
use chargelink_routing::RequestError;
use chargelink_transport::ConnectionId;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::connection::reply_to;
use crate::link::Link;
use crate::node::NodeInner;

// ---------------------------------------------------------------------------
// TransitTable
// ---------------------------------------------------------------------------

/// Where to send the response of a forwarded request.
#[derive(Debug, Clone)]
pub(crate) struct TransitEntry {
    /// The link the request arrived on.
    pub(crate) back: ConnectionId,
    /// The node that issued the request.
    pub(crate) origin: NodeId,
    expires_at: Instant,
}

type TransitKey = (RequestId, NodeId);

#[derive(Default)]
pub(crate) struct TransitTable {
    entries: Mutex<HashMap<TransitKey, TransitEntry>>,
}

impl TransitTable {
    pub(crate) fn record(
        &self,
        request_id: RequestId,
        back: ConnectionId,
        origin: NodeId,
        ttl: Duration,
    ) {
        let entry = TransitEntry {
            back,
            origin: origin.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert((request_id, origin), entry);
    }

    /// Removes and returns the live entry a response belongs to.
    ///
    /// A response that names its destination only matches the entry of that
    /// origin. One without a destination (a text peer answered) matches by
    /// id alone, and only when exactly one entry carries that id.
    pub(crate) fn take(
        &self,
        request_id: &RequestId,
        destination: Option<&NodeId>,
    ) -> Option<TransitEntry> {
        let mut entries = self.entries.lock();
        let key = match destination {
            Some(origin) => (request_id.clone(), origin.clone()),
            None => {
                let mut matching = entries.keys().filter(|(id, _)| id == request_id);
                let key = matching.next()?.clone();
                if matching.next().is_some() {
                    tracing::warn!(%request_id, "ambiguous response without destination");
                    return None;
                }
                key
            }
        };
        let entry = entries.remove(&key)?;
        (entry.expires_at > Instant::now()).then_some(entry)
    }

    pub(crate) fn remove(&self, request_id: &RequestId, origin: &NodeId) {
        self.entries
            .lock()
            .remove(&(request_id.clone(), origin.clone()));
    }

    /// Drops every entry whose response would go back over `link`.
    pub(crate) fn forget_link(&self, link: ConnectionId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.back != link);
        before - entries.len()
    }

    pub(crate) fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Runs a transit CALL through the forwarding pipeline in its own task.
pub(crate) fn process(
    node: &Arc<NodeInner>,
    link: &Arc<Link>,
    envelope: Envelope,
    format: WireFormat,
) {
    let node = Arc::clone(node);
    let link = Arc::clone(link);
    tokio::spawn(async move {
        decide_and_apply(&node, &link, envelope, format).await;
    });
}

/// Decides on a transit CALL and carries the verdict out. Returns the
/// decision that was applied.
async fn decide_and_apply(
    node: &NodeInner,
    link: &Link,
    envelope: Envelope,
    format: WireFormat,
) -> ForwardingDecision {
    let (Message::Call { action, payload }, Some(destination)) =
        (&envelope.message, envelope.destination.clone())
    else {
        return ForwardingDecision::drop("not a transit request");
    };
    let ctx = FilterContext {
        timestamp: Utc::now(),
        sender: link.peer.clone(),
        connection: link.id,
        destination: destination.clone(),
        network_path: envelope.network_path.clone(),
    };
    let decision = node
        .pipeline
        .decide(&ctx, &envelope.request_id, action, payload)
        .await;

    match decision.result {
        ForwardingResult::Forward => forward(node, link, &envelope, &destination, format).await,
        ForwardingResult::Reject => {
            let message = match &decision.reject_response {
                Some(RejectResponse::Result(payload)) => Message::CallResult {
                    payload: payload.clone(),
                },
                Some(RejectResponse::Error(err)) => Message::CallError(err.clone()),
                None => Message::CallError(CallError::new(
                    ErrorCode::GenericError,
                    decision.rationale.clone(),
                )),
            };
            reply_to(link, &envelope, message, format).await;
        }
        ForwardingResult::Drop => {
            tracing::debug!(
                request_id = %envelope.request_id,
                %action,
                rationale = %decision.rationale,
                "transit request dropped"
            );
        }
    }
    decision
}

/// Sends a transit CALL one hop closer to its destination.
async fn forward(
    node: &NodeInner,
    link: &Link,
    envelope: &Envelope,
    destination: &NodeId,
    format: WireFormat,
) {
    let fail = move |reason: String| {
        reply_to(
            link,
            envelope,
            Message::CallError(CallError::new(ErrorCode::GenericError, reason)),
            format,
        )
    };

    let path = match envelope.network_path.append(node.node_id().clone()) {
        Ok(path) => path,
        Err(e) => return fail(e.to_string()).await,
    };
    let next = match node
        .reachability
        .next_hop(destination, node.config.max_hub_depth)
        .map_err(RequestError::from)
        .and_then(|conn| {
            node.link(conn)
                .ok_or_else(|| RequestError::Unroutable(destination.clone()))
        }) {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(
                request_id = %envelope.request_id,
                %destination,
                error = %e,
                "transit request unroutable"
            );
            return fail(e.to_string()).await;
        }
    };

    let origin = path.origin().cloned().unwrap_or_else(|| link.peer.clone());
    node.transit.record(
        envelope.request_id.clone(),
        link.id,
        origin.clone(),
        node.config.request_timeout,
    );
    let relayed = envelope.clone().with_path(path);
    if let Err(e) = next.send(&relayed).await {
        node.transit.remove(&envelope.request_id, &origin);
        tracing::warn!(
            request_id = %envelope.request_id,
            next_hop = %next.peer,
            error = %e,
            "forwarding failed"
        );
        return fail(format!("next hop {} unavailable", next.peer)).await;
    }
    tracing::debug!(
        request_id = %envelope.request_id,
        %destination,
        next_hop = %next.peer,
        "transit request forwarded"
    );
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Relays a response back the way its request came.
pub(crate) async fn relay_response(node: &NodeInner, entry: TransitEntry, envelope: Envelope) {
    let Some(back) = node.link(entry.back) else {
        tracing::debug!(
            request_id = %envelope.request_id,
            conn_id = %entry.back,
            "return link gone, dropping response"
        );
        return;
    };
    let mut relayed = envelope;
    relayed.destination.get_or_insert(entry.origin);
    relay(node, &back, relayed).await;
}

/// Relays a response this node holds no transit entry for, by destination.
pub(crate) async fn relay_by_destination(node: &NodeInner, envelope: Envelope) {
    let Some(destination) = envelope.destination.clone() else {
        return;
    };
    let next = node
        .reachability
        .next_hop(&destination, node.config.max_hub_depth)
        .ok()
        .and_then(|conn| node.link(conn));
    match next {
        Some(next) => relay(node, &next, envelope).await,
        None => tracing::warn!(
            request_id = %envelope.request_id,
            %destination,
            "no route for transit response, dropping"
        ),
    }
}

async fn relay(node: &NodeInner, next: &Link, envelope: Envelope) {
    let path = match envelope.network_path.append(node.node_id().clone()) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(request_id = %envelope.request_id, error = %e, "dropping response");
            return;
        }
    };
    let relayed = envelope.with_path(path);
    if let Err(e) = next.send(&relayed).await {
        tracing::debug!(
            request_id = %relayed.request_id,
            next_hop = %next.peer,
            error = %e,
            "response not relayed"
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================
