use serde::{Deserialize, Serialize};

/// What happens to a service whose provider failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Forget the failed attempt; the next request runs the provider again.
    #[default]
    Retry,
    /// Remember the error and return it for every later request.
    Poison,
}

/// Injector tuning knobs, typically read from the `injector` config section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InjectorConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}
