//! Device twin: desired-property patches and their acknowledgments.
//!
//! Only four desired properties are recognised:
//!
//! | Key | Type | Tunable |
//! |-----|------|---------|
//! | `telemetryFrequency` | positive number (seconds) | [`Tunables::telemetry_frequency_secs`] |
//! | `shiftDurationHours` | positive number | [`Tunables::shift_duration_hours`] |
//! | `batchDurationHours` | positive number | [`Tunables::batch_duration_hours`] |
//! | `isMachineOn` | boolean | [`Tunables::is_machine_on`] |
//!
//! Every accepted key is echoed back as a reported property carrying the
//! value, a status, and the desired version it acknowledges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::device::Tunables;
use crate::error::TwinValueError;

pub const TELEMETRY_FREQUENCY: &str = "telemetryFrequency";
pub const SHIFT_DURATION_HOURS: &str = "shiftDurationHours";
pub const BATCH_DURATION_HOURS: &str = "batchDurationHours";
pub const IS_MACHINE_ON: &str = "isMachineOn";

const VERSION_KEY: &str = "$version";
const ACK_COMPLETED: u16 = 200;

/// A set of desired properties at a given twin version.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TwinPatch {
    pub properties: Map<String, Value>,
    pub version: i64,
}

impl TwinPatch {
    #[must_use]
    pub fn new(properties: Map<String, Value>, version: i64) -> Self {
        Self {
            properties,
            version,
        }
    }

    /// Build a patch from a desired-properties document.
    ///
    /// The `$version` member becomes [`TwinPatch::version`]; other `$`
    /// metadata members are dropped. Non-object documents yield an empty patch.
    #[must_use]
    pub fn from_desired(document: Value) -> Self {
        let Value::Object(mut properties) = document else {
            return Self::default();
        };
        let version = properties
            .remove(VERSION_KEY)
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        properties.retain(|key, _| !key.starts_with('$'));
        Self {
            properties,
            version,
        }
    }
}

/// Acknowledgment of one accepted desired property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckEntry {
    pub value: Value,
    #[serde(rename = "ac")]
    pub status_code: u16,
    #[serde(rename = "ad")]
    pub status_text: String,
    #[serde(rename = "av")]
    pub ack_version: i64,
}

impl AckEntry {
    #[must_use]
    pub fn completed(value: Value, ack_version: i64) -> Self {
        Self {
            value,
            status_code: ACK_COMPLETED,
            status_text: "completed".to_string(),
            ack_version,
        }
    }
}

/// Reported-property patch acknowledging a desired patch.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct AckPatch(pub BTreeMap<String, AckEntry>);

impl AckPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AckEntry> {
        self.0.get(key)
    }

    /// The ack as a reported-properties document.
    #[must_use]
    pub fn to_reported(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter_map(|(key, entry)| {
                serde_json::to_value(entry)
                    .ok()
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }
}

/// Outcome of applying a desired patch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TwinUpdate {
    pub ack: AckPatch,
    /// Whether any tunable took a new value.
    pub changed: bool,
    /// Recognised keys whose values were rejected.
    pub rejected: Vec<TwinValueError>,
}

/// Apply the recognised keys of `patch` to `tunables`.
///
/// Malformed values are skipped individually; unknown keys are ignored and
/// never acknowledged.
pub fn apply_desired(tunables: &mut Tunables, patch: &TwinPatch) -> TwinUpdate {
    let mut update = TwinUpdate::default();

    for (key, value) in &patch.properties {
        let applied = match key.as_str() {
            TELEMETRY_FREQUENCY => positive_int(key, value)
                .map(|v| replace(&mut tunables.telemetry_frequency_secs, v)),
            SHIFT_DURATION_HOURS => positive_int(key, value)
                .and_then(|v| narrow(key, value, v))
                .map(|v| replace(&mut tunables.shift_duration_hours, v)),
            BATCH_DURATION_HOURS => positive_int(key, value)
                .and_then(|v| narrow(key, value, v))
                .map(|v| replace(&mut tunables.batch_duration_hours, v)),
            IS_MACHINE_ON => boolean(key, value).map(|v| replace(&mut tunables.is_machine_on, v)),
            _ => continue,
        };

        match applied {
            Ok(changed) => {
                update.changed |= changed;
                update
                    .ack
                    .0
                    .insert(key.clone(), AckEntry::completed(value.clone(), patch.version));
            }
            Err(err) => update.rejected.push(err),
        }
    }

    update
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    let changed = *slot != value;
    *slot = value;
    changed
}

fn positive_int(key: &str, value: &Value) -> Result<u64, TwinValueError> {
    let number = value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 1.0)
                // Fractional values are truncated.
                .map(|f| f.trunc() as u64)
        })
        .filter(|n| *n >= 1);
    number.ok_or_else(|| malformed(key, "positive number", value))
}

fn narrow(key: &str, value: &Value, number: u64) -> Result<u32, TwinValueError> {
    u32::try_from(number).map_err(|_| malformed(key, "positive number", value))
}

fn boolean(key: &str, value: &Value) -> Result<bool, TwinValueError> {
    value
        .as_bool()
        .ok_or_else(|| malformed(key, "boolean", value))
}

fn malformed(key: &str, expected: &'static str, found: &Value) -> TwinValueError {
    TwinValueError {
        key: key.to_string(),
        expected,
        found: found.clone(),
    }
}
