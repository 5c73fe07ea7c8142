//! Business handlers for actions addressed to this node.
//!
//! Handlers are registered per action name before the node starts. The IN
//! side looks them up by the CALL's action; an action with no handler is
//! answered with a `NotSupported` CALLERROR.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chargelink_protocol::{Action, CallError, NetworkPath, NodeId, RequestId};
use chargelink_transport::ConnectionId;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;

/// What a handler knows about the request it is answering.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub action: Action,
    /// The node that authored the request.
    pub origin: NodeId,
    /// The link it arrived on.
    pub connection: ConnectionId,
    /// Hops it crossed, ending with the neighbor that handed it to us.
    pub network_path: NetworkPath,
    pub received_at: DateTime<Utc>,
}

/// What a handler produces: the CALLRESULT payload or a CALLERROR.
pub type HandlerResult = Result<Value, CallError>;

type BoxedHandler =
    Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Action name → handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Action, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `action`, replacing any earlier one.
    pub fn register<F, Fut>(&mut self, action: impl Into<Action>, handler: F)
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: BoxedHandler = Arc::new(move |ctx, payload| Box::pin(handler(ctx, payload)));
        self.handlers.insert(action.into(), handler);
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.handlers.contains_key(action)
    }

    /// Runs the handler for the context's action, or returns `None` if
    /// there is none.
    pub(crate) fn invoke(
        &self,
        ctx: RequestContext,
        payload: Value,
    ) -> Option<BoxFuture<'static, HandlerResult>> {
        let handler = self.handlers.get(&ctx.action)?;
        Some(handler(ctx, payload))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
