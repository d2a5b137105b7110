//! Bolt machine physical model.
//!
//! Every telemetry tick advances the machine: oil drains, health is derived
//! from the oil level, temperature and energy take a bounded random walk, and
//! a production count is drawn for the tick.

use chrono::{TimeZone, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::device::Tunables;
use crate::telemetry::TelemetryRecord;
use crate::time::Timestamp;

/// Oil consumed per tick.
pub const OIL_STEP: f64 = 0.1;
/// Oil level after a refill.
pub const OIL_FULL: f64 = 100.0;

const ERROR_OIL_LEVEL: f64 = 10.0;
const WARNING_OIL_LEVEL: f64 = 25.0;
const WARNING_PART_PENALTY: u32 = 50;
const DEFECT_PROBABILITY: f64 = 0.2;

/// Temperature walk: 50..90 degrees, slight downward drift.
pub const TEMPERATURE_WALK: RandomWalk = RandomWalk {
    low: 50.0,
    high: 90.0,
    step: 0.5,
    up_probability: 0.49,
};

/// Energy walk: 40..95 kWh, upward drift.
pub const ENERGY_WALK: RandomWalk = RandomWalk {
    low: 40.0,
    high: 95.0,
    step: 0.5,
    up_probability: 0.59,
};

/// Health tier of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineHealth {
    Healthy,
    Warning,
    Error,
}

impl MachineHealth {
    /// Health tier for an oil level.
    #[must_use]
    pub fn for_oil_level(oil_level: f64) -> Self {
        if oil_level < ERROR_OIL_LEVEL {
            Self::Error
        } else if oil_level < WARNING_OIL_LEVEL {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

/// A bounded ±`step` random walk.
///
/// At or below `low` the walk always steps up, at or above `high` it always
/// steps down; in between it steps up with `up_probability`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomWalk {
    pub low: f64,
    pub high: f64,
    pub step: f64,
    pub up_probability: f64,
}

impl RandomWalk {
    /// Next value of the walk.
    pub fn advance<R: Rng + ?Sized>(&self, value: f64, rng: &mut R) -> f64 {
        if value >= self.high {
            value - self.step
        } else if value <= self.low || rng.gen_bool(self.up_probability) {
            value + self.step
        } else {
            value - self.step
        }
    }
}

/// Parts produced during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Production {
    pub total: u32,
    pub defective: u32,
}

impl Production {
    /// Draw a nominal production count: 90–99 parts, with defects 20% of the time.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let total = 90 + rng.gen_range(0..10);
        let defective = if rng.gen_bool(DEFECT_PROBABILITY) {
            rng.gen_range(0..10)
        } else {
            0
        };
        Self { total, defective }
    }

    /// Apply the health penalty to a nominal count.
    #[must_use]
    pub fn degrade(self, health: MachineHealth) -> Self {
        match health {
            MachineHealth::Healthy => self,
            MachineHealth::Warning => Self {
                total: self.total.saturating_sub(WARNING_PART_PENALTY),
                ..self
            },
            MachineHealth::Error => Self {
                total: 0,
                defective: 0,
            },
        }
    }
}

/// Simulated state of one bolt machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoltMachine {
    pub plant_name: String,
    pub production_line: String,
    /// Percentage in `(0, 100]`.
    pub oil_level: f64,
    pub temperature: f64,
    pub energy_level: f64,
    pub health: MachineHealth,
}

impl BoltMachine {
    /// A freshly serviced machine.
    #[must_use]
    pub fn new(plant_name: impl Into<String>, production_line: impl Into<String>) -> Self {
        Self {
            plant_name: plant_name.into(),
            production_line: production_line.into(),
            oil_level: OIL_FULL,
            temperature: 100.0,
            energy_level: 80.0,
            health: MachineHealth::Healthy,
        }
    }

    /// Consume one tick of oil, refilling once the tank runs dry.
    pub fn drain_oil(&mut self) {
        self.oil_level -= OIL_STEP;
        if self.oil_level <= 0.0 {
            self.oil_level = OIL_FULL;
        }
    }

    /// Advance the machine by one tick and describe it.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        tunables: &Tunables,
        now: Timestamp,
    ) -> TelemetryRecord {
        let shift_number = period_number(now, tunables.shift_duration_hours);
        let batch_number = period_number(now, tunables.batch_duration_hours);
        let nominal = Production::draw(rng);

        self.drain_oil();
        self.health = MachineHealth::for_oil_level(self.oil_level);
        let production = nominal.degrade(self.health);

        self.temperature = TEMPERATURE_WALK.advance(self.temperature, rng);
        self.energy_level = ENERGY_WALK.advance(self.energy_level, rng);

        TelemetryRecord {
            plant_name: self.plant_name.clone(),
            production_line: self.production_line.clone(),
            shift_number,
            batch_number,
            message_timestamp: now,
            total_parts_made: production.total,
            defective_parts_made: production.defective,
            machine_health: self.health,
            oil_level: self.oil_level,
            temperature: self.temperature,
            energy_level: self.energy_level,
        }
    }
}

/// Number of the `duration_hours`-long period of the day `now` falls in.
///
/// The period index is `hour / duration`; it rolls to the next number once
/// the period's start instant lies in the past, so periods count from 1.
#[must_use]
pub fn period_number(now: Timestamp, duration_hours: u32) -> u32 {
    let duration = duration_hours.max(1);
    let mut number = now.hour() / duration;
    let start = now
        .date_naive()
        .and_hms_opt(number * duration, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive));
    if start.is_some_and(|start| now > start) {
        number += 1;
    }
    number
}
