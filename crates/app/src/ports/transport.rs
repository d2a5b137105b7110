//! Transport port: hub sessions for telemetry and twin traffic.
//!
//! A [`Transport`] opens one [`Session`] per successful connect. Sessions are
//! shared between the telemetry pump, the reported-property pump, and the
//! twin listener, so every operation takes `&self`.

use std::future::Future;

use boltsim_domain::connection_string::ConnectionString;
use boltsim_domain::error::TransportError;
use boltsim_domain::id::{CorrelationId, DeviceId, MessageId};
use boltsim_domain::time::{Timestamp, rfc3339};
use boltsim_domain::twin::TwinPatch;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// A device-to-cloud message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub message_id: MessageId,
    pub correlation_id: CorrelationId,
    pub content_type: &'static str,
    pub content_encoding: &'static str,
    /// Application properties, in insertion order.
    pub properties: Vec<(String, String)>,
}

impl OutboundMessage {
    /// A JSON telemetry message stamped with the hub's routing properties.
    #[must_use]
    pub fn telemetry(body: Vec<u8>, device_id: &DeviceId, now: Timestamp) -> Self {
        Self {
            body,
            message_id: MessageId::new(),
            correlation_id: CorrelationId::new(),
            content_type: "application/json",
            content_encoding: "utf-8",
            properties: vec![
                ("iothub-creation-time-utc".to_string(), rfc3339(now)),
                (
                    "iothub-connection-device-id".to_string(),
                    device_id.to_string(),
                ),
                ("iothub-interface-id".to_string(), String::new()),
            ],
        }
    }
}

/// Opens hub sessions.
pub trait Transport: Send + Sync + 'static {
    /// Session type produced by [`connect`](Self::connect).
    type Session: Session;

    /// Open a session with the given credentials.
    ///
    /// Authorization, availability, and network failures must surface as
    /// the matching [`TransportError`] variants so callers can detect a hub
    /// failover.
    fn connect(
        &self,
        connection_string: &ConnectionString,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// An open hub session.
pub trait Session: Send + Sync + 'static {
    /// Publish a device-to-cloud message.
    fn send_event(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Fetch the desired section of the twin.
    fn retrieve_twin(&self) -> impl Future<Output = Result<TwinPatch, TransportError>> + Send;

    /// Patch the reported section of the twin.
    fn update_reported(
        &self,
        patch: Map<String, Value>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Start receiving desired-property patches.
    ///
    /// The stream ends when the session closes.
    fn subscribe_twin_updates(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<TwinPatch>, TransportError>> + Send;

    /// Close the session. Closing twice is not an error.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use boltsim_domain::time::now;

    #[test]
    fn should_stamp_telemetry_with_routing_properties() {
        let device_id = DeviceId::new("Everett-BoltMachine-1");
        let stamp = now();
        let message = OutboundMessage::telemetry(b"{}".to_vec(), &device_id, stamp);

        assert_eq!(message.content_type, "application/json");
        let keys: Vec<_> = message.properties.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "iothub-creation-time-utc",
                "iothub-connection-device-id",
                "iothub-interface-id"
            ]
        );
        assert_eq!(message.properties[0].1, rfc3339(stamp));
        assert_eq!(message.properties[1].1, "Everett-BoltMachine-1");
        assert!(message.properties[2].1.is_empty());
    }

    #[test]
    fn should_give_each_message_fresh_ids() {
        let device_id = DeviceId::new("d");
        let a = OutboundMessage::telemetry(Vec::new(), &device_id, now());
        let b = OutboundMessage::telemetry(Vec::new(), &device_id, now());
        assert_ne!(a.message_id, b.message_id);
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
