//! Host probe port: facts about the machine running the simulator.

use boltsim_domain::reported::ReportedProperties;

/// Source of the periodic reported properties.
pub trait HostProbe: Send + Sync + 'static {
    /// Snapshot of host name, address, and clock.
    fn reported_properties(&self) -> ReportedProperties;
}
