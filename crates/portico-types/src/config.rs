//! Connection configuration.
//!
//! Loaded from `~/.portico/config.toml` by the protocol crate's loader; every
//! field has a default, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default period of the embedded-resource liveness check (milliseconds).
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 60_000;

/// Default maximum payload accepted by the in-memory transport (16 MB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Serde helper for `Option<Duration>` as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize `Duration` as `u64` milliseconds.
    pub fn serialize<S: Serializer>(dur: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match dur {
            Some(d) => (d.as_millis() as u64).serialize(s),
            None => s.serialize_none(),
        }
    }

    /// Deserialize `u64` milliseconds into `Duration`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<u64> = Option::deserialize(d)?;
        Ok(opt.map(Duration::from_millis))
    }
}

/// Settings shared by both connection entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Origin the remote must declare. On the responder side it is derived
    /// from the embedded resource's locator when absent; on the initiator
    /// side absence means any origin.
    pub expected_origin: Option<String>,
    /// Deadline for the handshake, if any.
    #[serde(
        rename = "connect_timeout_ms",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_timeout: Option<Duration>,
    /// Emit protocol diagnostics.
    pub debug_logging: bool,
    /// How often the responder checks that the embedded resource is alive.
    pub liveness_interval_ms: u64,
    /// Largest payload the in-memory transport will carry.
    pub max_message_bytes: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            expected_origin: None,
            connect_timeout: None,
            debug_logging: false,
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ConnectConfig {
    /// Liveness check period.
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::default();
        assert!(config.expected_origin.is_none());
        assert!(config.connect_timeout.is_none());
        assert!(!config.debug_logging);
        assert_eq!(config.liveness_interval(), Duration::from_secs(60));
        assert_eq!(config.max_message_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ConnectConfig = toml::from_str(
            r#"
            expected_origin = "https://child.example"
            connect_timeout_ms = 250
        "#,
        )
        .unwrap();
        assert_eq!(config.expected_origin.as_deref(), Some("https://child.example"));
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.liveness_interval_ms, DEFAULT_LIVENESS_INTERVAL_MS);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ConnectConfig {
            connect_timeout: Some(Duration::from_millis(1500)),
            debug_logging: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"connect_timeout_ms\":1500"));
        let back: ConnectConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
