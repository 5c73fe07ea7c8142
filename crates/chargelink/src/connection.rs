//! Per-connection tasks: the writer draining a link's queue and the reader
//! running the dispatch loop.
//!
//! The reader decodes frames in arrival order and hands each envelope to
//! one of three places:
//!
//! ```text
//!   CALL for us            → inbound::dispatch   (spawned)
//!   CALL for someone else  → forward::process    (spawned)
//!   CALLRESULT/CALLERROR   → transit relay, or the pending registry
//! ```
//!
//! Handler and hook work runs in its own task, so responses may leave in a
//! different order than requests arrived; the request id restores the
//! pairing.

use std::sync::Arc;

use chargelink_protocol::{
    CallError, DecodeError, Envelope, ErrorCode, Message, NetworkPath, WireFormat,
    decode_frame,
};
use chargelink_routing::RequestError;
use chargelink_transport::{Connection, Frame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::link::Link;
use crate::node::NodeInner;
use crate::{forward, inbound};

/// Drains the link queue into the connection. Closes the connection when
/// the link is cancelled or a send fails.
pub(crate) async fn write_loop<C: Connection>(
    conn: Arc<C>,
    mut rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = conn.send(frame).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "send failed");
            break;
        }
    }
    // Wakes the reader if the writer stopped first.
    cancel.cancel();
    if let Err(e) = conn.close().await {
        tracing::debug!(conn_id = %conn.id(), error = %e, "close failed");
    }
}

/// Reads frames until the connection closes, then detaches the link.
pub(crate) async fn read_loop<C: Connection>(
    node: Arc<NodeInner>,
    conn: Arc<C>,
    link: Arc<Link>,
) {
    let conn_id = link.id;
    loop {
        let frame = tokio::select! {
            _ = link.cancel.cancelled() => break,
            received = conn.recv() => match received {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!(%conn_id, peer = %link.peer, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%conn_id, error = %e, "recv error");
                    break;
                }
            },
        };

        let format = WireFormat::of(&frame);
        link.observe(format);
        match decode_frame(&frame) {
            Ok(envelope) => route(&node, &link, envelope, format).await,
            Err(e) => reject_malformed(&node, &link, e, format).await,
        }
    }
    node.detach(conn_id);
}

/// Decides where a decoded envelope goes.
async fn route(
    node: &Arc<NodeInner>,
    link: &Arc<Link>,
    mut envelope: Envelope,
    format: WireFormat,
) {
    // The neighbor is always the last hop. Text frames carry no path and
    // a sender may leave itself off; either way it gets added here.
    if envelope.network_path.last_hop() != Some(&link.peer) {
        match envelope.network_path.append(link.peer.clone()) {
            Ok(path) => envelope.network_path = path,
            Err(e) => return reject_loop(link, &envelope, e.to_string(), format).await,
        }
    }
    if envelope.network_path.contains(node.node_id()) {
        let reason = format!("loop detected: {} already on the network path", node.node_id());
        return reject_loop(link, &envelope, reason, format).await;
    }

    let for_us = envelope
        .destination
        .as_ref()
        .is_none_or(|dest| dest == node.node_id());
    tracing::debug!(
        request_id = %envelope.request_id,
        message_type = %envelope.message_type(),
        conn_id = %link.id,
        for_us,
        "envelope received"
    );

    if !envelope.is_response() {
        if for_us {
            inbound::dispatch(node, link, envelope, format);
        } else {
            forward::process(node, link, envelope, format);
        }
    } else if let Some(entry) = node
        .transit
        .take(&envelope.request_id, envelope.destination.as_ref())
    {
        forward::relay_response(node, entry, envelope).await;
    } else if for_us {
        inbound::complete(node, envelope);
    } else {
        forward::relay_by_destination(node, envelope).await;
    }
}

/// Answers a request on the link it arrived on, addressed to its origin.
pub(crate) async fn reply_to(
    link: &Link,
    request: &Envelope,
    message: Message,
    format: WireFormat,
) {
    let reply = Envelope {
        request_id: request.request_id.clone(),
        destination: request.network_path.origin().cloned(),
        network_path: NetworkPath::new(),
        message,
    };
    if let Err(e) = link.reply(&reply, format).await {
        tracing::debug!(
            request_id = %reply.request_id,
            conn_id = %link.id,
            error = %e,
            "reply not sent"
        );
    }
}

async fn reject_loop(link: &Link, envelope: &Envelope, reason: String, format: WireFormat) {
    tracing::warn!(
        request_id = %envelope.request_id,
        conn_id = %link.id,
        %reason,
        "rejecting looping message"
    );
    // Responses are never answered.
    if envelope.is_response() {
        return;
    }
    let err = CallError::new(ErrorCode::GenericError, reason);
    reply_to(link, envelope, Message::CallError(err), format).await;
}

/// Answers a structurally broken request with a CALLERROR when its request
/// id could be read. A broken response is never answered; if it belongs to
/// one of our own requests sent over this link, that request fails with the
/// decode error instead of waiting out its timeout.
async fn reject_malformed(node: &NodeInner, link: &Link, err: DecodeError, format: WireFormat) {
    let Some(request_id) = err.request_id.clone() else {
        tracing::warn!(conn_id = %link.id, error = %err, "dropping malformed frame");
        return;
    };
    if !err.wants_reply() {
        if node.pending.link_of(&request_id) == Some(link.id) {
            tracing::warn!(%request_id, conn_id = %link.id, error = %err, "malformed response");
            let cause = CallError::new(err.error_code(), err.to_string());
            node.pending
                .complete(&request_id, Err(RequestError::Remote(cause)));
        } else {
            tracing::warn!(
                %request_id,
                conn_id = %link.id,
                error = %err,
                "dropping malformed response"
            );
        }
        return;
    }
    tracing::debug!(
        %request_id,
        conn_id = %link.id,
        error = %err,
        "answering malformed frame"
    );
    let reply = Envelope::call_error(request_id, CallError::new(err.error_code(), err.to_string()));
    if let Err(e) = link.reply(&reply, format).await {
        tracing::debug!(conn_id = %link.id, error = %e, "reply not sent");
    }
}
