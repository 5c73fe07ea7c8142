//! The IN side: requests addressed to this node and responses to requests
//! it issued.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chargelink_protocol::{
    Action, CallError, Envelope, ErrorCode, Message, Payload, PayloadKind, WireFormat,
};
use chargelink_routing::RequestError;
use chrono::Utc;
use futures_util::FutureExt;

use crate::connection::reply_to;
use crate::handlers::RequestContext;
use crate::link::Link;
use crate::node::NodeInner;
use crate::topology::{self, TOPOLOGY_ACTION};

/// Answers a local CALL in its own task, so a slow handler never holds up
/// the link.
pub(crate) fn dispatch(
    node: &Arc<NodeInner>,
    link: &Arc<Link>,
    envelope: Envelope,
    format: WireFormat,
) {
    let Message::Call { action, payload } = &envelope.message else {
        return;
    };
    let ctx = RequestContext {
        request_id: envelope.request_id.clone(),
        action: action.clone(),
        origin: envelope
            .network_path
            .origin()
            .cloned()
            .unwrap_or_else(|| link.peer.clone()),
        connection: link.id,
        network_path: envelope.network_path.clone(),
        received_at: Utc::now(),
    };
    let payload = payload.clone();
    let node = Arc::clone(node);
    let link = Arc::clone(link);
    tokio::spawn(async move {
        let message = answer(&node, ctx, payload).await;
        reply_to(&link, &envelope, message, format).await;
    });
}

async fn answer(node: &NodeInner, ctx: RequestContext, payload: Payload) -> Message {
    let action = ctx.action.clone();
    let builtin = action.as_str() == TOPOLOGY_ACTION;
    if !builtin && !node.handlers.contains(&action) {
        tracing::debug!(request_id = %ctx.request_id, %action, "no handler registered");
        return Message::CallError(CallError::new(
            ErrorCode::NotSupported,
            format!("action {action} is not supported"),
        ));
    }
    let data = match node.codec.decode(&action, PayloadKind::Request, &payload) {
        Ok(data) => data,
        Err(e) => return Message::CallError(CallError::new(e.error_code(), e.to_string())),
    };
    if builtin {
        return topology::accept(node, &ctx, data);
    }

    let request_id = ctx.request_id.clone();
    let Some(handler) = node.handlers.invoke(ctx, data) else {
        return Message::CallError(CallError::new(
            ErrorCode::NotSupported,
            format!("action {action} is not supported"),
        ));
    };
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(Ok(response)) => encode_response(node, &action, response),
        Ok(Err(err)) => {
            tracing::debug!(%request_id, %action, error = %err, "handler refused request");
            Message::CallError(err)
        }
        Err(_) => {
            tracing::error!(%request_id, %action, "handler panicked");
            Message::CallError(CallError::new(
                ErrorCode::InternalError,
                format!("{action} handler failed"),
            ))
        }
    }
}

fn encode_response(node: &NodeInner, action: &Action, response: serde_json::Value) -> Message {
    match node.codec.encode(action, PayloadKind::Response, response) {
        Ok(payload) => Message::CallResult { payload },
        Err(e) => {
            tracing::error!(%action, error = %e, "handler produced an invalid response");
            Message::CallError(CallError::new(
                ErrorCode::InternalError,
                format!("invalid {action} response"),
            ))
        }
    }
}

/// Completes the pending request a response answers. Late, duplicate, and
/// unknown responses are discarded by the registry.
pub(crate) fn complete(node: &NodeInner, envelope: Envelope) {
    let outcome = match envelope.message {
        Message::CallResult { payload } => Ok(payload),
        Message::CallError(err) => Err(RequestError::Remote(err)),
        Message::Call { .. } => return,
    };
    node.pending.complete(&envelope.request_id, outcome);
}
