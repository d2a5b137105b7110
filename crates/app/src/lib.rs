//! # boltsim-app
//!
//! Application layer: device lifecycle orchestration and **port definitions**.
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `Provisioner`: register a device and resolve its hub credentials
//!   - `Transport` / `Session`: hub sessions for telemetry and twin traffic
//!   - `HostProbe`: facts about the simulator host for reported properties
//! - Drive each device through provisioning, connect, twin sync, and the
//!   telemetry and reported-property pumps (`DeviceActor`)
//! - Start and stop whole fleets of devices (`Fleet`)
//!
//! ## Dependency rule
//! Depends on `boltsim-domain` only (plus `tokio` and `tokio-util` for tasks,
//! timers, and cancellation). Never imports adapter crates. Adapters depend
//! on *this* crate, not the reverse.

pub mod device_actor;
pub mod fleet;
pub mod ports;

#[cfg(test)]
mod testing;
