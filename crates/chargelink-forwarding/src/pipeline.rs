//! The forwarding-decision pipeline.
//!
//! One shot per transit request:
//!
//! ```text
//!  decode payload ──✗──→ REJECT (FormatViolation)
//!        │
//!        ▼
//!  hooks for action ─┬─ first Some(decision) ──┐
//!  (concurrent)      └─ all None / time out ───┤→ default policy
//!                                              ▼
//!                              repair REJECT without response
//!                                              ▼
//!                                   audit (best effort)
//! ```

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chargelink_protocol::{
    Action, CallError, Payload, PayloadCodec, PayloadKind, RequestId,
};
use futures_util::{FutureExt, StreamExt};
use futures_util::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;

use crate::{
    DefaultPolicy, FilterContext, FilterHook, ForwardingConfig,
    ForwardingDecision, ForwardingResult, RejectResponse, TransitRequest,
};

/// Rationale attached when the default policy rejects.
pub const FILTERED_BY_DEFAULT: &str = "filtered by default policy";

/// Observes every final forwarding decision.
///
/// Sinks run after the decision is made and cannot change it; a sink that
/// panics is logged and skipped.
pub trait ForwardingAudit: Send + Sync + 'static {
    fn record(
        &self,
        ctx: &FilterContext,
        request_id: &RequestId,
        action: &Action,
        decision: &ForwardingDecision,
    );
}

/// Decides what happens to transit requests.
pub struct ForwardingPipeline {
    codec: Arc<dyn PayloadCodec>,
    config: ForwardingConfig,
    hooks: HashMap<Action, Vec<Arc<dyn FilterHook>>>,
    any_action_hooks: Vec<Arc<dyn FilterHook>>,
    audits: Vec<Arc<dyn ForwardingAudit>>,
}

impl ForwardingPipeline {
    pub fn new(codec: Arc<dyn PayloadCodec>, config: ForwardingConfig) -> Self {
        Self {
            codec,
            config,
            hooks: HashMap::new(),
            any_action_hooks: Vec::new(),
            audits: Vec::new(),
        }
    }

    pub fn config(&self) -> &ForwardingConfig {
        &self.config
    }

    /// Registers a hook for one action.
    pub fn add_hook(&mut self, action: impl Into<Action>, hook: impl FilterHook) {
        self.hooks
            .entry(action.into())
            .or_default()
            .push(Arc::new(hook));
    }

    /// Registers a hook that sees every action.
    pub fn add_hook_for_all(&mut self, hook: impl FilterHook) {
        self.any_action_hooks.push(Arc::new(hook));
    }

    pub fn add_audit(&mut self, sink: impl ForwardingAudit) {
        self.audits.push(Arc::new(sink));
    }

    /// Number of hooks that would run for `action`.
    pub fn hook_count(&self, action: &Action) -> usize {
        self.hooks.get(action).map_or(0, Vec::len) + self.any_action_hooks.len()
    }

    /// Runs the pipeline for one transit request.
    ///
    /// Never fails; a REJECT decision always carries a response.
    pub async fn decide(
        &self,
        ctx: &FilterContext,
        request_id: &RequestId,
        action: &Action,
        payload: &Payload,
    ) -> ForwardingDecision {
        let decision = match self.codec.decode(action, PayloadKind::Request, payload) {
            Ok(data) => {
                let request = TransitRequest {
                    request_id: request_id.clone(),
                    action: action.clone(),
                    payload: data,
                };
                let voted = self.run_hooks(ctx, &request).await;
                let decision = voted.unwrap_or_else(|| self.apply_default(action));
                self.repair(action, decision)
            }
            Err(e) => ForwardingDecision::reject(
                RejectResponse::Error(CallError::new(e.error_code(), e.to_string())),
                "payload could not be decoded",
            ),
        };

        self.audit(ctx, request_id, action, &decision);
        decision
    }

    /// Fans the request out to every matching hook and returns the first
    /// non-abstaining answer. Losers and late hooks are cancelled; a hook
    /// that panics counts as abstaining.
    async fn run_hooks(
        &self,
        ctx: &FilterContext,
        request: &TransitRequest,
    ) -> Option<ForwardingDecision> {
        let hooks: Vec<&Arc<dyn FilterHook>> = self
            .hooks
            .get(&request.action)
            .into_iter()
            .flatten()
            .chain(&self.any_action_hooks)
            .collect();
        if hooks.is_empty() {
            return None;
        }

        let cancel = CancellationToken::new();
        let mut pending: FuturesUnordered<_> = hooks
            .iter()
            .map(|hook| {
                let cancel = cancel.child_token();
                AssertUnwindSafe(async move { hook.filter(ctx, request, cancel).await })
                    .catch_unwind()
            })
            .collect();

        let deadline = tokio::time::Instant::now() + self.config.hook_timeout;
        let winner = loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(Ok(Some(decision)))) => break Some(decision),
                Ok(Some(Ok(None))) => continue,
                Ok(Some(Err(_))) => {
                    tracing::warn!(
                        request_id = %request.request_id,
                        action = %request.action,
                        "filter hook panicked, treating as abstained"
                    );
                    continue;
                }
                Ok(None) => break None,
                Err(_) => {
                    tracing::debug!(
                        request_id = %request.request_id,
                        action = %request.action,
                        outstanding = pending.len(),
                        "filter hooks timed out, treating as abstained"
                    );
                    break None;
                }
            }
        };
        cancel.cancel();
        winner
    }

    fn apply_default(&self, action: &Action) -> ForwardingDecision {
        match self.config.default_policy {
            DefaultPolicy::Forward => ForwardingDecision::forward("default policy"),
            DefaultPolicy::Reject => ForwardingDecision::reject(
                RejectResponse::Result(
                    self.codec.negative_response(action, FILTERED_BY_DEFAULT),
                ),
                FILTERED_BY_DEFAULT,
            ),
        }
    }

    /// Enforces "REJECT carries a response, nothing else does".
    fn repair(&self, action: &Action, mut decision: ForwardingDecision) -> ForwardingDecision {
        match decision.result {
            ForwardingResult::Reject if decision.reject_response.is_none() => {
                decision.reject_response = Some(RejectResponse::Result(
                    self.codec.negative_response(action, &decision.rationale),
                ));
            }
            ForwardingResult::Forward | ForwardingResult::Drop => {
                decision.reject_response = None;
            }
            ForwardingResult::Reject => {}
        }
        decision
    }

    fn audit(
        &self,
        ctx: &FilterContext,
        request_id: &RequestId,
        action: &Action,
        decision: &ForwardingDecision,
    ) {
        tracing::info!(
            target: "chargelink::audit",
            %request_id,
            %action,
            sender = %ctx.sender,
            destination = %ctx.destination,
            conn_id = %ctx.connection,
            result = %decision.result,
            rationale = %decision.rationale,
            "forwarding decision"
        );
        for sink in &self.audits {
            let recorded = catch_unwind(AssertUnwindSafe(|| {
                sink.record(ctx, request_id, action, decision);
            }));
            if recorded.is_err() {
                tracing::warn!(%request_id, "forwarding audit sink panicked");
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
