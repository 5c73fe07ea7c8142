//! The pending-request registry: outbound requests waiting for an answer.
//!
//! ```text
//! register() ──→ [Pending] ──┬── complete(Ok)      ──→ CALLRESULT payload
//!                            ├── complete(Remote)  ──→ CALLERROR
//!                            ├── timer fires       ──→ Timeout
//!                            ├── fail_link()       ──→ TransportLost
//!                            └── cancel()          ──→ Cancelled
//! ```
//!
//! Every path out of `Pending` goes through a single removal under the
//! registry lock. Whoever removes the entry delivers the outcome; everyone
//! after that finds nothing and is discarded. That is what makes completion
//! exactly-once even when a response and the timer race.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chargelink_protocol::{Action, Payload, RequestId};
use chargelink_transport::ConnectionId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::RequestError;

/// What a caller eventually receives: the CALLRESULT payload or the reason
/// there is none.
pub type RequestOutcome = Result<Payload, RequestError>;

struct PendingEntry {
    slot: oneshot::Sender<RequestOutcome>,
    link: ConnectionId,
    action: Action,
    issued_at: Instant,
    deadline: Instant,
    timer: AbortHandle,
}

/// Shared registry of in-flight requests, keyed by request id.
///
/// Cloning is cheap and every clone sees the same requests.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    entries: Arc<Mutex<HashMap<RequestId, PendingEntry>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `request_id`, sent on `link`, and arms its timeout.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`RequestError::DuplicateRequestId`] if the id is already pending.
    pub fn register(
        &self,
        request_id: RequestId,
        link: ConnectionId,
        action: Action,
        timeout: Duration,
    ) -> Result<PendingHandle, RequestError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&request_id) {
            return Err(RequestError::DuplicateRequestId(request_id));
        }

        let (tx, rx) = oneshot::channel();
        let issued_at = Instant::now();
        let deadline = issued_at + timeout;

        // The timer needs the lock to resolve, so it cannot fire before the
        // entry below is inserted.
        let timer = {
            let registry = self.clone();
            let id = request_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if registry.resolve(&id, Err(RequestError::Timeout(timeout))) {
                    tracing::debug!(request_id = %id, "request timed out");
                }
            })
            .abort_handle()
        };

        tracing::debug!(
            %request_id,
            %action,
            conn_id = %link,
            ?timeout,
            "request pending"
        );
        entries.insert(
            request_id.clone(),
            PendingEntry {
                slot: tx,
                link,
                action,
                issued_at,
                deadline,
                timer,
            },
        );

        Ok(PendingHandle {
            request_id,
            rx,
            registry: self.clone(),
        })
    }

    /// Delivers a response for `request_id`.
    ///
    /// Returns `false`, logging the discard, when nothing is pending under
    /// that id: a duplicate, a response that lost the race with its
    /// timeout, or a forged id.
    pub fn complete(&self, request_id: &RequestId, outcome: RequestOutcome) -> bool {
        let delivered = self.resolve(request_id, outcome);
        if !delivered {
            tracing::warn!(
                %request_id,
                "discarding response for unknown or completed request"
            );
        }
        delivered
    }

    /// Cancels a pending request; its caller receives
    /// [`RequestError::Cancelled`].
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.resolve(request_id, Err(RequestError::Cancelled))
    }

    /// Fails every request sent on `link` with
    /// [`RequestError::TransportLost`]. Returns how many were failed.
    pub fn fail_link(&self, link: ConnectionId) -> usize {
        let lost: Vec<(RequestId, PendingEntry)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<RequestId> = entries
                .iter()
                .filter(|(_, e)| e.link == link)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|e| (id, e)))
                .collect()
        };

        for (request_id, entry) in &lost {
            tracing::debug!(
                %request_id,
                action = %entry.action,
                conn_id = %link,
                "link lost with request pending"
            );
        }
        let count = lost.len();
        for (_, entry) in lost {
            Self::deliver(entry, Err(RequestError::TransportLost));
        }
        count
    }

    /// Whether `request_id` is still waiting.
    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    /// The link a pending request was sent on.
    pub fn link_of(&self, request_id: &RequestId) -> Option<ConnectionId> {
        self.entries.lock().get(request_id).map(|e| e.link)
    }

    /// Time left before `request_id` times out.
    pub fn remaining(&self, request_id: &RequestId) -> Option<Duration> {
        let entries = self.entries.lock();
        let entry = entries.get(request_id)?;
        Some(entry.deadline.saturating_duration_since(Instant::now()))
    }

    /// How long `request_id` has been waiting.
    pub fn age(&self, request_id: &RequestId) -> Option<Duration> {
        let entries = self.entries.lock();
        entries.get(request_id).map(|e| e.issued_at.elapsed())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes the entry and delivers `outcome`. The single exit from the
    /// pending state.
    fn resolve(&self, request_id: &RequestId, outcome: RequestOutcome) -> bool {
        let entry = self.entries.lock().remove(request_id);
        match entry {
            Some(entry) => {
                Self::deliver(entry, outcome);
                true
            }
            None => false,
        }
    }

    fn deliver(entry: PendingEntry, outcome: RequestOutcome) {
        entry.timer.abort();
        // The caller may have stopped waiting; nothing to do then.
        let _ = entry.slot.send(outcome);
    }

    /// Drops the entry without delivering anything.
    fn forget(&self, request_id: &RequestId) {
        if let Some(entry) = self.entries.lock().remove(request_id) {
            entry.timer.abort();
        }
    }
}

/// The caller's side of a pending request.
///
/// Dropping the handle stops tracking the request; a late response for it
/// is then discarded like any other unknown id.
pub struct PendingHandle {
    request_id: RequestId,
    rx: oneshot::Receiver<RequestOutcome>,
    registry: PendingRegistry,
}

impl PendingHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Waits for the single outcome of this request.
    pub async fn wait(mut self) -> RequestOutcome {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            // The sender only disappears without sending if the registry
            // itself went away.
            Err(_) => Err(RequestError::Cancelled),
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        self.registry.forget(&self.request_id);
    }
}

impl std::fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingHandle")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chargelink_protocol::{CallError, ErrorCode};
    use serde_json::json;

    // -- Helpers ----------------------------------------------------------

    const LINK: ConnectionId = ConnectionId::new(1);

    fn rid(id: &str) -> RequestId {
        RequestId::new(id)
    }

    fn register(registry: &PendingRegistry, id: &str, secs: u64) -> PendingHandle {
        registry
            .register(rid(id), LINK, "Heartbeat".into(), Duration::from_secs(secs))
            .unwrap()
    }

    // =====================================================================
    // complete()
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_complete_delivers_payload() {
        let registry = PendingRegistry::new();
        let handle = register(&registry, "r1", 30);

        assert!(registry.complete(&rid("r1"), Ok(Payload::Json(json!({"ok": true})))));
        assert_eq!(handle.wait().await, Ok(Payload::Json(json!({"ok": true}))));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_twice_delivers_first_only() {
        let registry = PendingRegistry::new();
        let handle = register(&registry, "r1", 30);

        assert!(registry.complete(&rid("r1"), Ok(Payload::Json(json!({"n": 1})))));
        assert!(!registry.complete(&rid("r1"), Ok(Payload::Json(json!({"n": 2})))));

        assert_eq!(handle.wait().await, Ok(Payload::Json(json!({"n": 1}))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_remote_error() {
        let registry = PendingRegistry::new();
        let handle = register(&registry, "r1", 30);
        let err = CallError::new(ErrorCode::NotSupported, "nope");

        registry.complete(&rid("r1"), Err(RequestError::Remote(err.clone())));
        assert_eq!(handle.wait().await, Err(RequestError::Remote(err)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_unknown_id_is_discarded() {
        let registry = PendingRegistry::new();
        assert!(!registry.complete(&rid("ghost"), Ok(Payload::empty())));
    }

    // =====================================================================
    // Timeout
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_and_removes_entry() {
        let registry = PendingRegistry::new();
        let handle = register(&registry, "r1", 5);

        assert_eq!(
            handle.wait().await,
            Err(RequestError::Timeout(Duration::from_secs(5)))
        );
        assert!(!registry.contains(&rid("r1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_discarded() {
        let registry = PendingRegistry::new();
        let handle = register(&registry, "r1", 5);

        let outcome = handle.wait().await;
        assert!(matches!(outcome, Err(RequestError::Timeout(_))));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!registry.complete(&rid("r1"), Ok(Payload::empty())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_before_deadline_disarms_timer() {
        let registry = PendingRegistry::new();
        let handle = register(&registry, "r1", 5);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(registry.remaining(&rid("r1")), Some(Duration::from_secs(1)));
        registry.complete(&rid("r1"), Ok(Payload::empty()));
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(handle.wait().await, Ok(Payload::empty()));
    }

    // =====================================================================
    // cancel() / fail_link() / drop
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cancel_delivers_cancelled() {
        let registry = PendingRegistry::new();
        let handle = register(&registry, "r1", 30);

        assert!(registry.cancel(&rid("r1")));
        assert_eq!(handle.wait().await, Err(RequestError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_link_only_touches_that_link() {
        let registry = PendingRegistry::new();
        let on_link = register(&registry, "r1", 30);
        let elsewhere = registry
            .register(rid("r2"), ConnectionId::new(2), "Heartbeat".into(), Duration::from_secs(30))
            .unwrap();

        assert_eq!(registry.fail_link(LINK), 1);
        assert_eq!(on_link.wait().await, Err(RequestError::TransportLost));
        assert_eq!(registry.link_of(&rid("r2")), Some(ConnectionId::new(2)));

        registry.complete(&rid("r2"), Ok(Payload::empty()));
        assert_eq!(elsewhere.wait().await, Ok(Payload::empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_duplicate_id_rejected() {
        let registry = PendingRegistry::new();
        let _first = register(&registry, "r1", 30);

        let second = registry.register(rid("r1"), LINK, "Heartbeat".into(), Duration::from_secs(30));
        assert!(matches!(second, Err(RequestError::DuplicateRequestId(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_forgets_request() {
        let registry = PendingRegistry::new();
        drop(register(&registry, "r1", 30));

        assert!(registry.is_empty());
        assert!(!registry.complete(&rid("r1"), Ok(Payload::empty())));
    }
}
