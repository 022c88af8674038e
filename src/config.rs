//! Coordinator configuration.
//!
//! Built the same defensive way as the teacher's `ForwarderConfig`: a
//! `Raw*` deserialize target with every field optional, validated and
//! defaulted into the public config struct. Unlike the forwarder (a
//! standalone process reading TOML off disk), the coordinator is embedded
//! in a host application, so `CoordinatorConfig::new` takes its required
//! fields directly and `CoordinatorConfig::from_json` is offered for hosts
//! that want to load it from a settings blob.

use std::time::Duration;

use serde::Deserialize;

use crate::discovery::constants;
use crate::error::ConfigError;

/// Per-constant overrides for the discovery tuning table. Every field
/// defaults to the fixed production value; tests use these to run the
/// engine at an accelerated cadence without waiting on real wall-clock
/// seconds.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryTuning {
    pub daemon_period: Option<Duration>,
    pub daemon_timeout: Option<Duration>,
    pub manifest_period: Option<Duration>,
    pub manifest_idle_period: Option<Duration>,
    pub manifest_timeout: Option<Duration>,
    pub manifest_initial_delay: Option<Duration>,
    pub initial_connect_timeout: Option<Duration>,
    pub stale_window: Option<Duration>,
    pub manifest_ttl: Option<Duration>,
    pub evict_window: Option<Duration>,
}

/// `DiscoveryTuning` with every field resolved against the spec defaults.
/// This is what `DiscoveryEngine` and `SchemaRegistry` actually hold.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTuning {
    pub daemon_period: Duration,
    pub daemon_timeout: Duration,
    pub manifest_period: Duration,
    pub manifest_idle_period: Duration,
    pub manifest_timeout: Duration,
    pub manifest_initial_delay: Duration,
    pub initial_connect_timeout: Duration,
    pub stale_window: Duration,
    pub manifest_ttl: Duration,
    pub evict_window: Duration,
}

impl Default for ResolvedTuning {
    fn default() -> Self {
        Self {
            daemon_period: constants::DAEMON_PERIOD,
            daemon_timeout: constants::DAEMON_TIMEOUT,
            manifest_period: constants::MANIFEST_PERIOD,
            manifest_idle_period: constants::MANIFEST_IDLE_PERIOD,
            manifest_timeout: constants::MANIFEST_TIMEOUT,
            manifest_initial_delay: constants::MANIFEST_INITIAL_DELAY,
            initial_connect_timeout: constants::INITIAL_CONNECT_TIMEOUT,
            stale_window: constants::STALE_WINDOW,
            manifest_ttl: constants::MANIFEST_TTL,
            evict_window: constants::EVICT_WINDOW,
        }
    }
}

impl DiscoveryTuning {
    #[must_use]
    pub fn resolve(&self) -> ResolvedTuning {
        let defaults = ResolvedTuning::default();
        ResolvedTuning {
            daemon_period: self.daemon_period.unwrap_or(defaults.daemon_period),
            daemon_timeout: self.daemon_timeout.unwrap_or(defaults.daemon_timeout),
            manifest_period: self.manifest_period.unwrap_or(defaults.manifest_period),
            manifest_idle_period: self
                .manifest_idle_period
                .unwrap_or(defaults.manifest_idle_period),
            manifest_timeout: self.manifest_timeout.unwrap_or(defaults.manifest_timeout),
            manifest_initial_delay: self
                .manifest_initial_delay
                .unwrap_or(defaults.manifest_initial_delay),
            initial_connect_timeout: self
                .initial_connect_timeout
                .unwrap_or(defaults.initial_connect_timeout),
            stale_window: self.stale_window.unwrap_or(defaults.stale_window),
            manifest_ttl: self.manifest_ttl.unwrap_or(defaults.manifest_ttl),
            evict_window: self.evict_window.unwrap_or(defaults.evict_window),
        }
    }
}

fn default_scope() -> String {
    "local".to_string()
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub transport_endpoint: String,
    pub scope: String,
    pub tuning: DiscoveryTuning,
}

impl CoordinatorConfig {
    #[must_use]
    pub fn new(transport_endpoint: impl Into<String>) -> Self {
        Self {
            transport_endpoint: transport_endpoint.into(),
            scope: default_scope(),
            tuning: DiscoveryTuning::default(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub fn with_tuning(mut self, tuning: DiscoveryTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Loads config from a JSON settings blob, validating and defaulting the
    /// same way `ForwarderConfig::load_config_from_str` validates TOML.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawCoordinatorConfig = serde_json::from_str(raw)
            .map_err(|e| ConfigError::InvalidValue(format!("parsing config JSON: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawCoordinatorConfig) -> Result<Self, ConfigError> {
        let transport_endpoint = raw
            .transport_endpoint
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingField("transport_endpoint".to_string()))?;
        let scope = raw.scope.unwrap_or_else(default_scope);
        let tuning = raw.tuning.map(RawDiscoveryTuning::into_tuning).unwrap_or_default();
        Ok(Self {
            transport_endpoint,
            scope,
            tuning,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawCoordinatorConfig {
    transport_endpoint: Option<String>,
    scope: Option<String>,
    tuning: Option<RawDiscoveryTuning>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDiscoveryTuning {
    daemon_period_ms: Option<u64>,
    daemon_timeout_ms: Option<u64>,
    manifest_period_ms: Option<u64>,
    manifest_idle_period_ms: Option<u64>,
    manifest_timeout_ms: Option<u64>,
    manifest_initial_delay_ms: Option<u64>,
    initial_connect_timeout_ms: Option<u64>,
    stale_window_ms: Option<u64>,
    manifest_ttl_ms: Option<u64>,
    evict_window_ms: Option<u64>,
}

impl RawDiscoveryTuning {
    fn into_tuning(self) -> DiscoveryTuning {
        DiscoveryTuning {
            daemon_period: self.daemon_period_ms.map(Duration::from_millis),
            daemon_timeout: self.daemon_timeout_ms.map(Duration::from_millis),
            manifest_period: self.manifest_period_ms.map(Duration::from_millis),
            manifest_idle_period: self.manifest_idle_period_ms.map(Duration::from_millis),
            manifest_timeout: self.manifest_timeout_ms.map(Duration::from_millis),
            manifest_initial_delay: self.manifest_initial_delay_ms.map(Duration::from_millis),
            initial_connect_timeout: self.initial_connect_timeout_ms.map(Duration::from_millis),
            stale_window: self.stale_window_ms.map(Duration::from_millis),
            manifest_ttl: self.manifest_ttl_ms.map(Duration::from_millis),
            evict_window: self.evict_window_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_transport_endpoint_is_rejected() {
        let err = CoordinatorConfig::from_json(r#"{"scope": "local"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn defaults_scope_to_local() {
        let cfg = CoordinatorConfig::from_json(r#"{"transport_endpoint": "ws://localhost:7447"}"#)
            .unwrap();
        assert_eq!(cfg.scope, "local");
    }

    #[test]
    fn tuning_overrides_resolve_over_defaults() {
        let cfg = CoordinatorConfig::from_json(
            r#"{"transport_endpoint": "ws://localhost:7447", "tuning": {"daemon_period_ms": 100}}"#,
        )
        .unwrap();
        let resolved = cfg.tuning.resolve();
        assert_eq!(resolved.daemon_period, Duration::from_millis(100));
        assert_eq!(resolved.daemon_timeout, constants::DAEMON_TIMEOUT);
    }

    #[test]
    fn builder_methods_compose() {
        let cfg = CoordinatorConfig::new("ws://localhost:7447").with_scope("bay-1");
        assert_eq!(cfg.scope, "bay-1");
    }
}
