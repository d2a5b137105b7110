//! Hub topic names and inbound topic routing.

use boltsim_app::ports::OutboundMessage;
use boltsim_domain::id::DeviceId;

/// Twin responses, `$iothub/twin/res/{status}/?$rid={rid}`.
pub const TWIN_RESPONSES: &str = "$iothub/twin/res/#";
/// Desired-property patches.
pub const TWIN_DESIRED: &str = "$iothub/twin/PATCH/properties/desired/#";

const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const TWIN_DESIRED_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";

/// Cloud-to-device messages for `device_id`.
#[must_use]
pub fn cloud_to_device(device_id: &DeviceId) -> String {
    format!("devices/{device_id}/messages/devicebound/#")
}

/// Telemetry topic with the message's system and application properties.
#[must_use]
pub fn telemetry(device_id: &DeviceId, message: &OutboundMessage) -> String {
    let mut bag = vec![
        format!("$.mid={}", message.message_id),
        format!("$.cid={}", message.correlation_id),
        format!("$.ct={}", urlencoding::encode(message.content_type)),
        format!("$.ce={}", urlencoding::encode(message.content_encoding)),
    ];
    bag.extend(message.properties.iter().map(|(key, value)| {
        format!(
            "{}={}",
            urlencoding::encode(key),
            urlencoding::encode(value)
        )
    }));
    format!("devices/{device_id}/messages/events/{}", bag.join("&"))
}

#[must_use]
pub fn twin_get(rid: u64) -> String {
    format!("$iothub/twin/GET/?$rid={rid}")
}

#[must_use]
pub fn twin_patch_reported(rid: u64) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={rid}")
}

/// What an inbound publish is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    TwinResponse { status: u16, rid: u64 },
    DesiredPatch,
    CloudToDevice,
    Unknown,
}

/// Classify an inbound topic.
#[must_use]
pub fn parse_inbound(topic: &str) -> Inbound {
    if let Some(rest) = topic.strip_prefix(TWIN_RESPONSE_PREFIX) {
        return parse_twin_response(rest).unwrap_or(Inbound::Unknown);
    }
    if topic.starts_with(TWIN_DESIRED_PREFIX) {
        return Inbound::DesiredPatch;
    }
    if topic.starts_with("devices/") && topic.contains("/messages/devicebound/") {
        return Inbound::CloudToDevice;
    }
    Inbound::Unknown
}

fn parse_twin_response(rest: &str) -> Option<Inbound> {
    let (status, query) = rest.split_once('/')?;
    let status = status.parse().ok()?;
    let rid = query
        .trim_start_matches('?')
        .split('&')
        .find_map(|pair| pair.strip_prefix("$rid="))?
        .parse()
        .ok()?;
    Some(Inbound::TwinResponse { status, rid })
}
