//! Filter hooks: the extension point for transit policy.
//!
//! A hook sees every transit request for the actions it is registered for
//! and may answer with a [`ForwardingDecision`] or abstain with `None`.
//! Hooks run concurrently; the first one to return `Some` decides, and the
//! rest are cancelled through the [`CancellationToken`] they were given.

use chargelink_protocol::{Action, NetworkPath, NodeId, RequestId};
use chargelink_transport::ConnectionId;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ForwardingDecision;

/// Where a transit request came from and where it is going.
#[derive(Debug, Clone)]
pub struct FilterContext {
    /// When the request arrived at this node.
    pub timestamp: DateTime<Utc>,
    /// The node that handed the request to us.
    pub sender: NodeId,
    /// The link it arrived on.
    pub connection: ConnectionId,
    /// Its final destination.
    pub destination: NodeId,
    /// The path as received, before our hop is appended.
    pub network_path: NetworkPath,
}

impl FilterContext {
    /// The node that authored the request.
    pub fn origin(&self) -> &NodeId {
        self.network_path.origin().unwrap_or(&self.sender)
    }
}

/// A transit request with its payload already decoded.
#[derive(Debug, Clone)]
pub struct TransitRequest {
    pub request_id: RequestId,
    pub action: Action,
    pub payload: Value,
}

/// Inspects transit requests and votes on them.
///
/// Implementations are shared across connections and may be invoked many
/// times concurrently for the same action.
pub trait FilterHook: Send + Sync + 'static {
    /// Returns `Some(decision)` to decide, `None` to abstain.
    ///
    /// `cancel` fires when another hook has decided or the time budget ran
    /// out; long-running hooks should stop early when it does.
    fn filter<'a>(
        &'a self,
        ctx: &'a FilterContext,
        request: &'a TransitRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Option<ForwardingDecision>>;
}

/// A hook built from a synchronous closure.
pub struct FnFilter<F>(F);

/// Wraps a closure as a [`FilterHook`].
///
/// ```ignore
/// pipeline.add_hook("GetFile", filter_fn(|_ctx, req| {
///     req.payload.get("fileName").is_none().then(|| {
///         ForwardingDecision::drop("no file name")
///     })
/// }));
/// ```
pub fn filter_fn<F>(f: F) -> FnFilter<F>
where
    F: Fn(&FilterContext, &TransitRequest) -> Option<ForwardingDecision>
        + Send
        + Sync
        + 'static,
{
    FnFilter(f)
}

impl<F> FilterHook for FnFilter<F>
where
    F: Fn(&FilterContext, &TransitRequest) -> Option<ForwardingDecision>
        + Send
        + Sync
        + 'static,
{
    fn filter<'a>(
        &'a self,
        ctx: &'a FilterContext,
        request: &'a TransitRequest,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, Option<ForwardingDecision>> {
        let decision = (self.0)(ctx, request);
        Box::pin(async move { decision })
    }
}
