//! Periodic reported properties describing the simulator host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::time::Timestamp;

/// Host facts reported on the reported-properties interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedProperties {
    pub host_name: String,
    pub ip_address: String,
    pub host_time: Timestamp,
}

impl ReportedProperties {
    /// The properties as a reported-properties document.
    #[must_use]
    pub fn to_patch(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn should_build_camel_case_patch() {
        let props = ReportedProperties {
            host_name: "sim-host".to_string(),
            ip_address: "10.0.0.7".to_string(),
            host_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        };
        let patch = props.to_patch();
        assert_eq!(patch["hostName"], "sim-host");
        assert_eq!(patch["ipAddress"], "10.0.0.7");
        assert_eq!(patch["hostTime"], "2024-03-01T09:00:00Z");
    }
}
