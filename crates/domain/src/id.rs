//! Identifier newtypes.
//!
//! Devices are addressed by the human-readable registration id assigned at
//! fleet planning time. Per-message identifiers are random UUIDs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Registration id of a simulated device (e.g. `Everett-BoltMachine-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a registration id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Access the inner UUID.
            #[must_use]
            pub fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifier of a single device-to-cloud message.
    MessageId
);

define_id!(
    /// Correlation identifier attached to a device-to-cloud message.
    CorrelationId
);

define_id!(
    /// Event identifier carried in the gateway envelope.
    EventId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_device_id_verbatim() {
        let id = DeviceId::new("Everett-BoltMachine-1");
        assert_eq!(id.to_string(), "Everett-BoltMachine-1");
        assert_eq!(id.as_str(), "Everett-BoltMachine-1");
    }

    #[test]
    fn should_serialize_device_id_as_plain_string() {
        let id = DeviceId::new("Austin-BoltMachine-2");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"Austin-BoltMachine-2\"");
    }

    #[test]
    fn should_generate_unique_message_ids_when_called_twice() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn should_roundtrip_correlation_id_through_display_and_from_str() {
        let id = CorrelationId::new();
        let parsed: CorrelationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn should_return_error_when_parsing_invalid_uuid() {
        assert!(EventId::from_str("not-a-uuid").is_err());
    }
}
