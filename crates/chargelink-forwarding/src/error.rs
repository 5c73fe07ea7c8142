//! Error types for the forwarding layer.

/// Errors that can occur while configuring forwarding.
///
/// Deciding never fails: every path through the pipeline ends in a
/// [`ForwardingDecision`](crate::ForwardingDecision).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardingError {
    /// A policy name that is neither `FORWARD` nor `REJECT`.
    #[error("unknown default policy {0:?}")]
    UnknownPolicy(String),
}
