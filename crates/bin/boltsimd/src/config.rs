//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `boltsim.toml` in the working directory (or the file named by
//! `BOLTSIM_CONFIG`). Every field has a default so the file is optional, but
//! the enrollment scope, master key and at least one plant must end up set.
//! Environment variables take precedence over file values.

use std::time::Duration;

use boltsim_adapter_mqtt::MqttConfig;
use boltsim_adapter_provisioning_http::DpsConfig;
use boltsim_app::device_actor::DeviceOptions;
use boltsim_domain::device::PlantSpec;
use boltsim_domain::provisioning::BOLT_MACHINE_MODEL_ID;
use boltsim_domain::telemetry::TelemetryFormat;
use serde::Deserialize;

const DEFAULT_PATH: &str = "boltsim.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Provisioning application settings.
    pub application: ApplicationConfig,
    /// Hub session settings.
    pub mqtt: MqttConfig,
    /// Device timing.
    pub simulation: SimulationConfig,
    /// Simulated plants.
    pub plants: Vec<PlantConfig>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// The provisioning application devices register with.
#[derive(Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Provisioning service host.
    pub provisioning_endpoint: String,
    /// Enrollment scope.
    pub id_scope: String,
    /// Enrollment group master key (base64).
    pub master_key: String,
    /// Model id announced at registration.
    pub model_id: String,
}

/// Device timing.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Pause before each device first connects, in seconds.
    pub settle_delay_secs: u64,
    /// Upper bound for every hub call, in seconds.
    pub call_timeout_secs: u64,
}

/// One plant and its machines.
#[derive(Debug, Clone, Deserialize)]
pub struct PlantConfig {
    pub name: String,
    #[serde(default)]
    pub bolt_machine: BoltMachineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoltMachineConfig {
    pub count: u32,
    pub format: TelemetryFormat,
}

impl Config {
    /// Load configuration from `boltsim.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result is not usable.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("BOLTSIM_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BOLTSIM_PROVISIONING_ENDPOINT") {
            self.application.provisioning_endpoint = val;
        }
        if let Ok(val) = std::env::var("BOLTSIM_ID_SCOPE") {
            self.application.id_scope = val;
        }
        if let Ok(val) = std::env::var("BOLTSIM_MASTER_KEY") {
            self.application.master_key = val;
        }
        if let Ok(val) = std::env::var("BOLTSIM_SETTLE_DELAY_SECS") {
            if let Ok(secs) = val.parse() {
                self.simulation.settle_delay_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("BOLTSIM_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.application.id_scope.trim().is_empty() {
            return Err(ConfigError::Validation("id_scope must be set".to_string()));
        }
        if self.application.master_key.trim().is_empty() {
            return Err(ConfigError::Validation("master_key must be set".to_string()));
        }
        if self.plants.is_empty() {
            return Err(ConfigError::Validation(
                "at least one plant must be configured".to_string(),
            ));
        }
        if self.plants.iter().any(|plant| plant.name.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "plant names must not be empty".to_string(),
            ));
        }
        if self.simulation.call_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "call_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Provisioning client settings.
    #[must_use]
    pub fn dps(&self) -> DpsConfig {
        DpsConfig {
            endpoint: self.application.provisioning_endpoint.clone(),
            master_key: self.application.master_key.clone(),
            ..DpsConfig::default()
        }
    }

    /// Settings shared by every device actor.
    #[must_use]
    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            id_scope: self.application.id_scope.clone(),
            model_id: self.application.model_id.clone(),
            settle_delay: Duration::from_secs(self.simulation.settle_delay_secs),
            call_timeout: Duration::from_secs(self.simulation.call_timeout_secs),
        }
    }

    #[must_use]
    pub fn plant_specs(&self) -> Vec<PlantSpec> {
        self.plants
            .iter()
            .map(|plant| PlantSpec {
                name: plant.name.clone(),
                machine_count: plant.bolt_machine.count,
                format: plant.bolt_machine.format,
            })
            .collect()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "boltsimd=info,boltsim=info".to_string(),
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            provisioning_endpoint: DpsConfig::default().endpoint,
            id_scope: String::new(),
            master_key: String::new(),
            model_id: BOLT_MACHINE_MODEL_ID.to_string(),
        }
    }
}

impl std::fmt::Debug for ApplicationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationConfig")
            .field("provisioning_endpoint", &self.provisioning_endpoint)
            .field("id_scope", &self.id_scope)
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 10,
            call_timeout_secs: 10,
        }
    }
}

impl Default for BoltMachineConfig {
    fn default() -> Self {
        Self {
            count: 1,
            format: TelemetryFormat::Flat,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
