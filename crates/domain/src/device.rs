//! Device: one simulated bolt machine and the settings its twin controls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::machine::BoltMachine;
use crate::telemetry::TelemetryFormat;

/// Twin-derived device settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tunables {
    /// Seconds between telemetry ticks.
    pub telemetry_frequency_secs: u64,
    /// Seconds between reported-property updates.
    pub reported_frequency_secs: u64,
    /// Length of an employee shift in hours.
    pub shift_duration_hours: u32,
    /// Length of a production batch in hours.
    pub batch_duration_hours: u32,
    /// When off, the telemetry pump keeps ticking but sends nothing.
    pub is_machine_on: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            telemetry_frequency_secs: 60,
            reported_frequency_secs: 60 * 60 * 2,
            shift_duration_hours: 8,
            batch_duration_hours: 1,
            is_machine_on: true,
        }
    }
}

impl Tunables {
    #[must_use]
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_frequency_secs)
    }

    #[must_use]
    pub fn reported_interval(&self) -> Duration {
        Duration::from_secs(self.reported_frequency_secs)
    }
}

/// Static description of a device, produced by fleet planning.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    pub device_id: DeviceId,
    /// Initial physical state.
    pub machine: BoltMachine,
    /// Wire shape of this device's telemetry.
    pub format: TelemetryFormat,
}

/// A plant and how many machines it runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlantSpec {
    pub name: String,
    pub machine_count: u32,
    pub format: TelemetryFormat,
}

/// Expand plants into one [`DeviceSpec`] per machine.
///
/// Machines are numbered from 1 within each plant: `{plant}-BoltMachine-{n}`
/// on production line `ProductionLine {n}`.
#[must_use]
pub fn plan_fleet(plants: &[PlantSpec]) -> Vec<DeviceSpec> {
    plants
        .iter()
        .flat_map(|plant| {
            (1..=plant.machine_count).map(move |n| DeviceSpec {
                device_id: DeviceId::new(format!("{}-BoltMachine-{n}", plant.name)),
                machine: BoltMachine::new(&plant.name, format!("ProductionLine {n}")),
                format: plant.format,
            })
        })
        .collect()
}
