//! # boltsim-adapter-provisioning-http
//!
//! Provisioning adapter: resolves devices to hubs through the device
//! provisioning service REST API.
//!
//! ## Protocol
//! 1. Derive the device key from the enrollment group master key and sign a
//!    one-minute `registration` token for `{scope}/registrations/{device}`.
//! 2. `PUT {endpoint}/{scope}/registrations/{device}/register` and read the
//!    `operationId`.
//! 3. `GET {endpoint}/{scope}/registrations/{device}/operations/{operationId}`
//!    at most three times, waiting `Retry-After` seconds after each `202`.
//! 4. Build `HostName={hub};DeviceId={device};SharedAccessKey={device key}`.
//!
//! ## Dependency rule
//! Same as other adapters: depends on `boltsim-app` and `boltsim-domain`.

pub mod config;
pub mod error;
mod provisioner;
mod wire;

pub use config::DpsConfig;
pub use error::DpsError;
pub use provisioner::HttpProvisioner;
