//! Forwarding configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ForwardingError;

/// What a transit node does with a request no filter hook had an opinion
/// about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum DefaultPolicy {
    /// Relay it toward its destination.
    #[default]
    Forward,
    /// Answer the sender with a generic negative response.
    Reject,
}

impl FromStr for DefaultPolicy {
    type Err = ForwardingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FORWARD" => Ok(Self::Forward),
            "REJECT" => Ok(Self::Reject),
            _ => Err(ForwardingError::UnknownPolicy(s.to_owned())),
        }
    }
}

impl std::fmt::Display for DefaultPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "FORWARD"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

/// Settings for a [`ForwardingPipeline`](crate::ForwardingPipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// Applied when no hook answers.
    pub default_policy: DefaultPolicy,

    /// How long hooks get before they are cancelled and treated as
    /// abstaining.
    pub hook_timeout: Duration,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            default_policy: DefaultPolicy::Forward,
            hook_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_parse() {
        assert_eq!("FORWARD".parse(), Ok(DefaultPolicy::Forward));
        assert_eq!(" reject ".parse(), Ok(DefaultPolicy::Reject));
        assert_eq!(
            "DROP".parse::<DefaultPolicy>(),
            Err(ForwardingError::UnknownPolicy("DROP".into()))
        );
    }

    #[test]
    fn test_default_policy_display() {
        assert_eq!(DefaultPolicy::Forward.to_string(), "FORWARD");
        assert_eq!(DefaultPolicy::Reject.to_string(), "REJECT");
    }

    #[test]
    fn test_forwarding_config_default() {
        let config = ForwardingConfig::default();
        assert_eq!(config.default_policy, DefaultPolicy::Forward);
        assert_eq!(config.hook_timeout, Duration::from_secs(5));
    }
}
