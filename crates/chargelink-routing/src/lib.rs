//! Routing state for a Chargelink node.
//!
//! The two long-lived pieces of shared mutable state a node has:
//!
//! 1. **Reachability**: which link (or which hub) leads to a given node
//!    ([`ReachabilityTable`])
//! 2. **Correlation**: which outbound requests are still waiting for an
//!    answer ([`PendingRegistry`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Node runtime (above)  ← OUT resolves routes and registers requests here
//!     ↕
//! Routing Layer (this crate)
//!     ↕
//! Protocol Layer (below)  ← NodeId, RequestId, Payload, CallError
//! ```
//!
//! Both structures use `parking_lot` locks and never hold one across an
//! `.await`.

mod error;
mod pending;
mod reachability;

pub use error::{RequestError, RoutingError};
pub use pending::{PendingHandle, PendingRegistry, RequestOutcome};
pub use reachability::{ReachabilityEntry, ReachabilityTable, Route};
