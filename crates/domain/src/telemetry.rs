//! Telemetry records and their two wire shapes.
//!
//! | Format | Config value | Shape |
//! |--------|--------------|-------|
//! | [`TelemetryFormat::Flat`] | `flat` / `json` | the record as a single JSON object |
//! | [`TelemetryFormat::Envelope`] | `envelope` / `opcua` | the record wrapped in a pub/sub gateway message |

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::id::{DeviceId, EventId};
use crate::machine::MachineHealth;
use crate::time::{Timestamp, rfc3339};

const PUBLISHER_ID: &str = "Standalone_IIOTEdgeServer_opcpublisher";
const MESSAGE_TYPE: &str = "ua-data";
const NODE_ID_PART_LEN: usize = 20;
const MESSAGE_ID_LEN: usize = 5;

/// One tick worth of machine telemetry (the flat wire shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub plant_name: String,
    pub production_line: String,
    pub shift_number: u32,
    pub batch_number: u32,
    pub message_timestamp: Timestamp,
    pub total_parts_made: u32,
    pub defective_parts_made: u32,
    pub machine_health: MachineHealth,
    pub oil_level: f64,
    pub temperature: f64,
    pub energy_level: f64,
}

/// Which wire shape a device emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryFormat {
    #[default]
    #[serde(alias = "json")]
    Flat,
    #[serde(alias = "opcua")]
    Envelope,
}

/// Serializes records for one device, numbering envelope messages.
#[derive(Debug, Clone)]
pub struct TelemetryEncoder {
    device_id: DeviceId,
    format: TelemetryFormat,
    sequence_number: u64,
}

impl TelemetryEncoder {
    #[must_use]
    pub fn new(device_id: DeviceId, format: TelemetryFormat) -> Self {
        Self {
            device_id,
            format,
            sequence_number: 0,
        }
    }

    #[must_use]
    pub fn format(&self) -> TelemetryFormat {
        self.format
    }

    /// Sequence number of the last envelope produced (0 before the first).
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Serialize `record` in this device's wire shape.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the record cannot be encoded as JSON.
    pub fn encode<R: Rng + ?Sized>(
        &mut self,
        record: &TelemetryRecord,
        rng: &mut R,
        now: Timestamp,
    ) -> Result<Vec<u8>, serde_json::Error> {
        match self.format {
            TelemetryFormat::Flat => serde_json::to_vec(record),
            TelemetryFormat::Envelope => {
                let envelope = self.envelope(record, rng, now)?;
                serde_json::to_vec(&envelope)
            }
        }
    }

    fn envelope<R: Rng + ?Sized>(
        &mut self,
        record: &TelemetryRecord,
        rng: &mut R,
        now: Timestamp,
    ) -> Result<Value, serde_json::Error> {
        self.sequence_number += 1;

        let Value::Object(fields) = serde_json::to_value(record)? else {
            unreachable!("records serialize to JSON objects");
        };

        let mut payload = Map::new();
        for (name, value) in &fields {
            let node_id = format!(
                "nsu={};s={}",
                random_string(rng, NODE_ID_PART_LEN),
                random_string(rng, NODE_ID_PART_LEN)
            );
            payload.insert(
                node_id,
                json!({
                    "ServerTimestamp": now,
                    "SourceTimestamp": now,
                    "StatusCode": null,
                    "Name": name,
                    "Value": value,
                }),
            );
        }

        let mut envelope = json!({
            "DataSetClassId": null,
            "DataSetWriterGroup": self.device_id,
            "EventId": EventId::new(),
            "MessageId": random_string(rng, MESSAGE_ID_LEN),
            "MessageType": MESSAGE_TYPE,
            "PublisherId": PUBLISHER_ID,
            "Messages": [{
                "DataSetWriterId": format!("{}-{}", self.device_id, EventId::new()),
                "MetaDataVersion": { "MajorVersion": 1, "MinorVersion": 0 },
                "SequenceNumber": self.sequence_number,
                "Status": null,
                "Timestamp": rfc3339(now),
                "Payload": payload,
            }],
        });
        if let Value::Object(map) = &mut envelope {
            map.extend(fields);
        }
        Ok(envelope)
    }
}

fn random_string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}
