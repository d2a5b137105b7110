//! Hub connection strings: `HostName=...;DeviceId=...;SharedAccessKey=...`.

use std::fmt;
use std::str::FromStr;

use crate::error::ConnectionStringError;
use crate::id::DeviceId;

/// Credentials for opening a session on an assigned hub.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Fully qualified hub host name.
    pub host_name: String,
    /// Device registration id.
    pub device_id: DeviceId,
    /// Base64 device key.
    pub shared_access_key: String,
}

impl ConnectionString {
    #[must_use]
    pub fn new(
        host_name: impl Into<String>,
        device_id: DeviceId,
        shared_access_key: impl Into<String>,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            device_id,
            shared_access_key: shared_access_key.into(),
        }
    }
}

// The key never ends up in logs.
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostName={};DeviceId={};SharedAccessKey={}",
            self.host_name, self.device_id, self.shared_access_key
        )
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;

        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            // Keys are base64 and may end with '=' padding, so split on the first '='.
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::MalformedSegment(segment.to_string()))?;
            match key {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(DeviceId::new(value)),
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            host_name: host_name.ok_or(ConnectionStringError::MissingField("HostName"))?,
            device_id: device_id.ok_or(ConnectionStringError::MissingField("DeviceId"))?,
            shared_access_key: shared_access_key
                .ok_or(ConnectionStringError::MissingField("SharedAccessKey"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_format_in_hub_layout() {
        let cs = ConnectionString::new("hub.example.net", DeviceId::new("d1"), "a2V5");
        assert_eq!(
            cs.to_string(),
            "HostName=hub.example.net;DeviceId=d1;SharedAccessKey=a2V5"
        );
    }

    #[test]
    fn should_parse_key_with_padding() {
        let cs: ConnectionString = "HostName=h.net;DeviceId=d1;SharedAccessKey=YWJj=="
            .parse()
            .unwrap();
        assert_eq!(cs.host_name, "h.net");
        assert_eq!(cs.device_id.as_str(), "d1");
        assert_eq!(cs.shared_access_key, "YWJj==");
    }

    #[test]
    fn should_ignore_unknown_segments() {
        let cs: ConnectionString = "HostName=h;DeviceId=d;SharedAccessKey=k;GatewayHostName=g"
            .parse()
            .unwrap();
        assert_eq!(cs.host_name, "h");
    }

    #[test]
    fn should_report_missing_field() {
        let err = "HostName=h;DeviceId=d".parse::<ConnectionString>().unwrap_err();
        assert_eq!(err, ConnectionStringError::MissingField("SharedAccessKey"));
    }

    #[test]
    fn should_report_malformed_segment() {
        let err = "HostName".parse::<ConnectionString>().unwrap_err();
        assert!(matches!(err, ConnectionStringError::MalformedSegment(_)));
    }

    #[test]
    fn should_hide_key_in_debug_output() {
        let cs = ConnectionString::new("h", DeviceId::new("d"), "secret");
        assert!(!format!("{cs:?}").contains("secret"));
    }
}
