//! # boltsim-adapter-mqtt
//!
//! MQTT adapter: opens IoT-hub style sessions for simulated devices.
//!
//! ## Responsibilities
//! - Authenticate with a device-scoped SAS token as the MQTT password
//! - Publish telemetry with its property bag encoded in the topic
//! - Request/response twin traffic correlated by `$rid`
//! - Forward desired-property patches to the device actor
//!
//! Cloud-to-device messages are received and dropped.
//!
//! ## Dependency rule
//! Same as other adapters: depends on `boltsim-app` and `boltsim-domain`.

pub mod config;
pub mod credentials;
pub mod error;
mod router;
mod session;
pub mod topics;

pub use config::MqttConfig;
pub use error::MqttError;
pub use session::{MqttSession, MqttTransport};
