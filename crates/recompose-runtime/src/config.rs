#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Defaults suit production use. Every knob can be overridden from the
//! environment:
//!
//! | Variable | Values | Default |
//! |----------|--------|---------|
//! | `RECOMPOSE_TRACK_USAGE` | bool | `true` |
//! | `RECOMPOSE_NOTIFY_POLICY` | `idle` / `always` | `idle` |
//! | `RECOMPOSE_DISPATCH_FAILURES` | `log` / `silent` | `log` |
//! | `RECOMPOSE_HASH_SHIFT` | `0..64` | `3` |
//!
//! Invalid values keep the default and are reported in
//! [`RuntimeConfigParse::errors`].

use std::env;
use std::fmt;

use recompose_core::position_hash::{DEFAULT_LEVEL_SHIFT, Shift};

/// Env var for [`RelocationConfig::track_usage`].
pub const ENV_TRACK_USAGE: &str = "RECOMPOSE_TRACK_USAGE";
/// Env var for [`FrameConfig::notify_policy`].
pub const ENV_NOTIFY_POLICY: &str = "RECOMPOSE_NOTIFY_POLICY";
/// Env var for [`FrameConfig::failure_policy`].
pub const ENV_DISPATCH_FAILURES: &str = "RECOMPOSE_DISPATCH_FAILURES";
/// Env var for [`RuntimeConfig::hash_shift`].
pub const ENV_HASH_SHIFT: &str = "RECOMPOSE_HASH_SHIFT";

/// When the frame-end scheduler calls its "new work available" hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Once per idle → pending transition.
    #[default]
    IdleTransition,
    /// On every registration. Correct, but wakes the host more often.
    Always,
}

impl NotifyPolicy {
    /// Parse `idle` / `always` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" | "idle-transition" => Some(Self::IdleTransition),
            "always" => Some(Self::Always),
            _ => None,
        }
    }
}

/// What the frame-end scheduler does with actions that panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log each failure at `warn` and keep dispatching.
    #[default]
    LogAndContinue,
    /// Keep dispatching without logging. Failures are still reported.
    Silent,
}

impl FailurePolicy {
    /// Parse `log` / `silent` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" | "log-and-continue" => Some(Self::LogAndContinue),
            "silent" => Some(Self::Silent),
            _ => None,
        }
    }
}

/// Frame-end scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameConfig {
    /// Wake-up policy.
    pub notify_policy: NotifyPolicy,
    /// Dispatch failure policy.
    pub failure_policy: FailurePolicy,
}

impl FrameConfig {
    /// Set the wake-up policy.
    #[must_use]
    pub fn with_notify_policy(mut self, policy: NotifyPolicy) -> Self {
        self.notify_policy = policy;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Relocation pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationConfig {
    /// Insert immediately for descriptors that have never departed.
    pub track_usage: bool,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self { track_usage: true }
    }
}

impl RelocationConfig {
    /// Enable or disable usage tracking.
    #[must_use]
    pub fn with_track_usage(mut self, enabled: bool) -> Self {
        self.track_usage = enabled;
        self
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Frame-end scheduler settings.
    pub frame: FrameConfig,
    /// Relocation pool settings.
    pub relocation: RelocationConfig,
    /// Per-level shift for position hashing.
    pub hash_shift: Shift,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            relocation: RelocationConfig::default(),
            hash_shift: DEFAULT_LEVEL_SHIFT,
        }
    }
}

/// An environment override that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Config field the variable maps to.
    pub field: &'static str,
    /// The rejected value.
    pub value: String,
    /// What was expected.
    pub message: &'static str,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: &'static str) -> Self {
        Self {
            field,
            value: value.into(),
            message,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Parsed config plus the overrides that were rejected.
#[derive(Debug, Clone)]
pub struct RuntimeConfigParse {
    /// Resulting config (defaults where overrides were invalid).
    pub config: RuntimeConfig,
    /// One entry per rejected override.
    pub errors: Vec<ConfigError>,
}

impl RuntimeConfig {
    /// Parse config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with_diagnostics().config
    }

    /// Parse config from environment variables and return diagnostics.
    #[must_use]
    pub fn from_env_with_diagnostics() -> RuntimeConfigParse {
        from_env_with(|key| env::var(key).ok())
    }

    /// Parse config through a custom lookup (tests, embedded hosts).
    #[must_use]
    pub fn from_lookup<F>(get: F) -> RuntimeConfigParse
    where
        F: FnMut(&str) -> Option<String>,
    {
        from_env_with(get)
    }

    /// Replace the frame settings.
    #[must_use]
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// Replace the relocation settings.
    #[must_use]
    pub fn with_relocation(mut self, relocation: RelocationConfig) -> Self {
        self.relocation = relocation;
        self
    }

    /// Set the per-level hash shift.
    #[must_use]
    pub fn with_hash_shift(mut self, shift: Shift) -> Self {
        self.hash_shift = shift;
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn from_env_with<F>(mut get: F) -> RuntimeConfigParse
where
    F: FnMut(&str) -> Option<String>,
{
    let mut config = RuntimeConfig::default();
    let mut errors = Vec::new();

    if let Some(value) = get(ENV_TRACK_USAGE) {
        match parse_bool(&value) {
            Some(parsed) => config.relocation.track_usage = parsed,
            None => errors.push(ConfigError::new(
                "track_usage",
                value,
                "expected bool (1/0/true/false)",
            )),
        }
    }

    if let Some(value) = get(ENV_NOTIFY_POLICY) {
        match NotifyPolicy::parse(&value) {
            Some(parsed) => config.frame.notify_policy = parsed,
            None => errors.push(ConfigError::new(
                "notify_policy",
                value,
                "expected idle|always",
            )),
        }
    }

    if let Some(value) = get(ENV_DISPATCH_FAILURES) {
        match FailurePolicy::parse(&value) {
            Some(parsed) => config.frame.failure_policy = parsed,
            None => errors.push(ConfigError::new(
                "failure_policy",
                value,
                "expected log|silent",
            )),
        }
    }

    if let Some(value) = get(ENV_HASH_SHIFT) {
        match value.trim().parse::<u32>().ok().map(Shift::new) {
            Some(Ok(shift)) => config.hash_shift = shift,
            _ => errors.push(ConfigError::new(
                "hash_shift",
                value,
                "expected integer in 0..64",
            )),
        }
    }

    RuntimeConfigParse { config, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert!(config.relocation.track_usage);
        assert_eq!(config.frame.notify_policy, NotifyPolicy::IdleTransition);
        assert_eq!(config.frame.failure_policy, FailurePolicy::LogAndContinue);
        assert_eq!(config.hash_shift.get(), 3);
    }

    #[test]
    fn empty_env_is_default() {
        let parsed = RuntimeConfig::from_lookup(lookup(&[]));
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.config, RuntimeConfig::default());
    }

    #[test]
    fn valid_overrides_apply() {
        let parsed = RuntimeConfig::from_lookup(lookup(&[
            (ENV_TRACK_USAGE, "off"),
            (ENV_NOTIFY_POLICY, "ALWAYS"),
            (ENV_DISPATCH_FAILURES, "silent"),
            (ENV_HASH_SHIFT, " 5 "),
        ]));
        assert!(parsed.errors.is_empty());
        assert!(!parsed.config.relocation.track_usage);
        assert_eq!(parsed.config.frame.notify_policy, NotifyPolicy::Always);
        assert_eq!(parsed.config.frame.failure_policy, FailurePolicy::Silent);
        assert_eq!(parsed.config.hash_shift.get(), 5);
    }

    #[test]
    fn invalid_overrides_keep_defaults() {
        let parsed = RuntimeConfig::from_lookup(lookup(&[
            (ENV_TRACK_USAGE, "maybe"),
            (ENV_NOTIFY_POLICY, "sometimes"),
            (ENV_DISPATCH_FAILURES, "explode"),
            (ENV_HASH_SHIFT, "64"),
        ]));
        assert_eq!(parsed.config, RuntimeConfig::default());
        let fields: Vec<_> = parsed.errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["track_usage", "notify_policy", "failure_policy", "hash_shift"]
        );
        assert_eq!(parsed.errors[3].to_string(), "hash_shift=64 (expected integer in 0..64)");
    }

    #[test]
    fn builders_chain() {
        let config = RuntimeConfig::default()
            .with_frame(FrameConfig::default().with_notify_policy(NotifyPolicy::Always))
            .with_relocation(RelocationConfig::default().with_track_usage(false))
            .with_hash_shift(Shift::ZERO);
        assert_eq!(config.frame.notify_policy, NotifyPolicy::Always);
        assert!(!config.relocation.track_usage);
        assert_eq!(config.hash_shift, Shift::ZERO);
    }
}
