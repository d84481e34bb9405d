//! Connection layer configuration
//!
//! Plain value object handed to the [`ConnectionManager`](crate::ConnectionManager).
//! Nothing in this crate reads the environment; the binary resolves flags and
//! files into a `LinkConfig`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use seneca_protocol::{Endpoint, Framing, TransportPreference};
use seneca_utils::{registry_dir, Result, SenecaError};

/// Connection layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Transport selection policy (auto, pipe, network)
    pub transport: TransportPreference,
    /// Manual endpoint; when set, discovery is skipped entirely
    pub endpoint: Option<Endpoint>,
    /// Registry location override
    pub registry_dir: Option<PathBuf>,
    /// Label sent at registration and in the handshake
    pub client_label: String,
    /// Framing used on pipe transports
    pub pipe_framing: Framing,
    pub connect_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub health: HealthConfig,
    pub backoff: BackoffConfig,
    /// Inbound notification buffer per session
    pub inbound_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: TransportPreference::Auto,
            endpoint: None,
            registry_dir: None,
            client_label: "seneca".into(),
            pipe_framing: Framing::LengthPrefixed,
            connect_timeout_ms: 10_000,
            call_timeout_ms: 30_000,
            health: HealthConfig::default(),
            backoff: BackoffConfig::default(),
            inbound_buffer: 1024,
        }
    }
}

/// Health probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Probe interval while connected (default: 15s)
    pub interval_ms: u64,
    /// Per-probe timeout (default: 5s)
    pub timeout_ms: u64,
    /// Consecutive failures before reconnecting (default: 3)
    pub failure_threshold: u32,
    /// Remote operation used as the probe
    pub operation: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 5_000,
            failure_threshold: 3,
            operation: "ping".into(),
        }
    }
}

/// Reconnect backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    /// Ceiling for any single wait
    pub max_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay applied as random jitter in both directions
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl LinkConfig {
    /// Config with a manual endpoint override
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// How long a caller waits for a replacement session after expiry
    pub fn reconnect_wait(&self) -> Duration {
        self.connect_timeout() + self.call_timeout()
    }

    pub fn resolved_registry_dir(&self) -> PathBuf {
        self.registry_dir.clone().unwrap_or_else(registry_dir)
    }

    /// Reject settings the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 || self.call_timeout_ms == 0 {
            return Err(SenecaError::config("timeouts must be greater than zero"));
        }

        if self.health.interval_ms == 0 || self.health.timeout_ms == 0 {
            return Err(SenecaError::config(
                "health interval_ms and timeout_ms must be greater than zero",
            ));
        }

        if self.health.failure_threshold == 0 {
            return Err(SenecaError::config("health failure_threshold must be at least 1"));
        }

        if self.health.operation.trim().is_empty() {
            return Err(SenecaError::config("health operation must not be empty"));
        }

        if self.backoff.initial_ms == 0 || self.backoff.initial_ms > self.backoff.max_ms {
            return Err(SenecaError::config(
                "backoff initial_ms must be between 1 and max_ms",
            ));
        }

        if self.backoff.multiplier < 1.0 {
            return Err(SenecaError::config("backoff multiplier must be at least 1.0"));
        }

        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(SenecaError::config("backoff jitter must be in [0, 1)"));
        }

        if self.inbound_buffer == 0 {
            return Err(SenecaError::config("inbound_buffer must be greater than zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.backoff.max_ms, 30_000);
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = LinkConfig::default();
        config.health.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_initial_above_ceiling_rejected() {
        let mut config = LinkConfig::default();
        config.backoff.initial_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LinkConfig = serde_json::from_value(serde_json::json!({
            "transport": "network",
            "endpoint": "http://localhost:4298/mcp",
            "health": {"failure_threshold": 5}
        }))
        .unwrap();

        assert_eq!(config.transport, TransportPreference::Network);
        assert!(matches!(config.endpoint, Some(Endpoint::Network(_))));
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.health.interval_ms, 15_000);
        assert_eq!(config.client_label, "seneca");
    }

    #[test]
    fn test_bad_endpoint_fails_at_parse() {
        let result: std::result::Result<LinkConfig, _> =
            serde_json::from_value(serde_json::json!({"endpoint": "ftp://example.com"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_reconnect_wait() {
        let config = LinkConfig::default();
        assert_eq!(config.reconnect_wait(), Duration::from_millis(40_000));
    }
}
