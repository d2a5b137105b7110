//! # boltsim-domain
//!
//! Pure domain model for the bolt machine fleet simulator.
//!
//! ## Responsibilities
//! - Foundational types: device identity, error taxonomy, timestamps
//! - Define **Tunables** (twin-driven device settings) and the explicit
//!   **connection state machine**
//! - Define the **bolt machine** physical model and its per-tick telemetry
//! - Define the two **telemetry wire shapes** (flat and gateway envelope)
//! - Define **twin patches** and the acknowledgment logic for desired properties
//! - Compute **shared access signatures** and parse **connection strings**
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod connection;
pub mod connection_string;
pub mod device;
pub mod machine;
pub mod provisioning;
pub mod reported;
pub mod sas;
pub mod telemetry;
pub mod twin;
