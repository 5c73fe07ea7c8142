//! Forwarding decisions for Chargelink networking nodes.
//!
//! When a CALL passes through a node on its way somewhere else, the node
//! decides what happens to it:
//!
//! - **FORWARD**: append our hop and send it on
//! - **REJECT**: answer the sender with a negative response, go no further
//! - **DROP**: discard silently
//!
//! # Key types
//!
//! - [`ForwardingPipeline`]: runs the decision for one transit message
//! - [`FilterHook`]: the extension point; hooks vote concurrently and the
//!   first one with an opinion wins
//! - [`ForwardingAudit`]: sinks that observe every final decision
//! - [`ForwardingConfig`] / [`DefaultPolicy`]: what happens when no hook
//!   has an opinion

mod config;
mod decision;
mod error;
mod filter;
mod pipeline;

pub use config::{DefaultPolicy, ForwardingConfig};
pub use decision::{ForwardingDecision, ForwardingResult, RejectResponse};
pub use error::ForwardingError;
pub use filter::{FilterContext, FilterHook, FnFilter, TransitRequest, filter_fn};
pub use pipeline::{FILTERED_BY_DEFAULT, ForwardingAudit, ForwardingPipeline};
