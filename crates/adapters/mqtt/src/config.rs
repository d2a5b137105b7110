//! MQTT transport configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for hub sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Hub MQTT port.
    pub port: u16,
    /// Wrap the connection in TLS.
    pub tls: bool,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Lifetime of the password token in seconds.
    pub token_ttl_secs: u64,
    /// Capacity of the client request channel.
    pub channel_capacity: usize,
    /// How long to wait for the broker's CONNACK, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            port: 8883,
            tls: true,
            keep_alive_secs: 30,
            token_ttl_secs: 3600,
            channel_capacity: 10,
            connect_timeout_secs: 10,
        }
    }
}

impl MqttConfig {
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.port, 8883);
        assert!(config.tls);
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(config.token_ttl_secs, 3600);
        assert_eq!(config.channel_capacity, 10);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn should_deserialize_from_toml() {
        let toml = r#"
            port = 1883
            tls = false
            keep_alive_secs = 60
            token_ttl_secs = 600
        "#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.port, 1883);
        assert!(!config.tls);
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.token_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn should_use_defaults_for_missing_fields() {
        let config: MqttConfig = toml::from_str("port = 8884").unwrap();
        assert_eq!(config.port, 8884);
        assert_eq!(config.channel_capacity, 10);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }
}
