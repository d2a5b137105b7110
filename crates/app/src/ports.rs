//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the device lifecycle and the outside
//! world. They are defined here (in `app`) so that both the orchestration
//! layer and the adapter layer can depend on them without creating circular
//! dependencies.

pub mod host;
pub mod provisioning;
pub mod transport;

pub use host::HostProbe;
pub use provisioning::Provisioner;
pub use transport::{OutboundMessage, Session, Transport};
