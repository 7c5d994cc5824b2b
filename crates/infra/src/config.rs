//! Repository configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MAX_FETCH_DEPTH_VAR: &str = "AGGREGRAPH_MAX_FETCH_DEPTH";
pub const EMIT_EVENTS_VAR: &str = "AGGREGRAPH_EMIT_EVENTS";

/// Tunables for an [`AggregateRepository`](crate::AggregateRepository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Deepest entity nesting the fetcher follows before giving up.
    pub max_fetch_depth: usize,
    /// Publish lifecycle events after each committed mutation.
    pub emit_events: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_fetch_depth: 64,
            emit_events: true,
        }
    }
}

impl RepositoryConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`; malformed values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_FETCH_DEPTH_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(depth) if depth > 0 => config.max_fetch_depth = depth,
                _ => warn!(
                    var = MAX_FETCH_DEPTH_VAR,
                    value = %raw,
                    default = config.max_fetch_depth,
                    "ignoring malformed setting"
                ),
            }
        }

        if let Some(raw) = lookup(EMIT_EVENTS_VAR) {
            match parse_flag(&raw) {
                Some(flag) => config.emit_events = flag,
                None => warn!(
                    var = EMIT_EVENTS_VAR,
                    value = %raw,
                    default = config.emit_events,
                    "ignoring malformed setting"
                ),
            }
        }

        config
    }

    pub fn with_max_fetch_depth(mut self, depth: usize) -> Self {
        self.max_fetch_depth = depth;
        self
    }

    pub fn with_emit_events(mut self, emit: bool) -> Self {
        self.emit_events = emit;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_overrides() {
        assert_eq!(RepositoryConfig::from_lookup(lookup(&[])), RepositoryConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = RepositoryConfig::from_lookup(lookup(&[
            (MAX_FETCH_DEPTH_VAR, "8"),
            (EMIT_EVENTS_VAR, "off"),
        ]));
        assert_eq!(config.max_fetch_depth, 8);
        assert!(!config.emit_events);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let config = RepositoryConfig::from_lookup(lookup(&[
            (MAX_FETCH_DEPTH_VAR, "deep"),
            (EMIT_EVENTS_VAR, "maybe"),
        ]));
        assert_eq!(config, RepositoryConfig::default());
    }

    #[test]
    fn zero_depth_is_rejected() {
        let config = RepositoryConfig::from_lookup(lookup(&[(MAX_FETCH_DEPTH_VAR, "0")]));
        assert_eq!(config.max_fetch_depth, 64);
    }
}
