use anyhow::Context;
use serde::Deserialize;

/// Complete Hearth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HearthConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub staleness: StalenessConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Hub connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL of the hub
    #[serde(default = "default_hub_url")]
    pub url: String,
}

fn default_hub_url() -> String {
    "ws://localhost:8123/ws".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_hub_url(),
        }
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Initial retry delay (milliseconds)
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,
    /// Retry delay cap (milliseconds)
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,
    /// Uniform random jitter added to each delay (milliseconds)
    #[serde(default = "default_backoff_jitter")]
    pub jitter_ms: u64,
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_backoff_jitter() -> u64 {
    250
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            max_ms: default_backoff_max(),
            jitter_ms: default_backoff_jitter(),
        }
    }
}

/// Staleness sweep configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StalenessConfig {
    /// Age after which a cached record is considered stale (seconds)
    #[serde(default = "default_staleness_threshold")]
    pub threshold_secs: u64,
    /// How often the sweep runs (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_staleness_threshold() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            threshold_secs: default_staleness_threshold(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Subscription registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Delay between the last release of an entity and its wire
    /// unsubscribe, so a widget that remounts immediately reuses the
    /// existing subscription (milliseconds)
    #[serde(default = "default_release_grace")]
    pub release_grace_ms: u64,
}

fn default_release_grace() -> u64 {
    500
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            release_grace_ms: default_release_grace(),
        }
    }
}

/// Service call configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// How long to wait for the hub's result message (seconds)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_call_timeout() -> u64 {
    10
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            backoff: BackoffConfig::default(),
            staleness: StalenessConfig::default(),
            subscription: SubscriptionConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<HearthConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: HearthConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse '{}'", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HearthConfig::default();
        assert_eq!(config.connection.url, "ws://localhost:8123/ws");
        assert_eq!(config.backoff.base_ms, 1000);
        assert_eq!(config.backoff.max_ms, 30_000);
        assert_eq!(config.staleness.threshold_secs, 30);
        assert_eq!(config.staleness.sweep_interval_secs, 5);
        assert_eq!(config.subscription.release_grace_ms, 500);
        assert_eq!(config.service.call_timeout_secs, 10);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [connection]
            url = "wss://hub.example.net/ws"

            [backoff]
            base_ms = 500
            max_ms = 10000
            jitter_ms = 100

            [staleness]
            threshold_secs = 60
            sweep_interval_secs = 10

            [subscription]
            release_grace_ms = 250

            [service]
            call_timeout_secs = 5
        "#;

        let config: HearthConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.url, "wss://hub.example.net/ws");
        assert_eq!(config.backoff.base_ms, 500);
        assert_eq!(config.backoff.max_ms, 10_000);
        assert_eq!(config.staleness.threshold_secs, 60);
        assert_eq!(config.subscription.release_grace_ms, 250);
        assert_eq!(config.service.call_timeout_secs, 5);
    }

    #[test]
    fn test_partial_config() {
        // Missing sections fall back to defaults
        let toml = r#"
            [staleness]
            threshold_secs = 120
        "#;

        let config: HearthConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.staleness.threshold_secs, 120);
        assert_eq!(config.staleness.sweep_interval_secs, 5); // Default
        assert_eq!(config.backoff.base_ms, 1000); // Default
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nurl = \"ws://10.0.0.5:8123/ws\"").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.connection.url, "ws://10.0.0.5:8123/ws");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/hearth.toml").is_err());
    }
}
