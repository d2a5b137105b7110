//! MQTT adapter error types.

use boltsim_domain::error::{SignError, TransportError};
use rumqttc::{ConnectReturnCode, ConnectionError};

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The shared access key could not sign a password.
    #[error("invalid device credentials")]
    InvalidCredentials(#[source] SignError),

    /// The event loop failed while connecting or polling.
    #[error("MQTT connection error")]
    Connection(#[source] ConnectionError),

    /// The broker did not acknowledge the connection in time.
    #[error("no CONNACK received in time")]
    ConnectTimeout,

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// The event loop stopped; the session is gone.
    #[error("MQTT connection lost")]
    ConnectionLost,

    /// A twin request was answered with a non-success status.
    #[error("twin request rejected with status {0}")]
    Rejected(u16),

    /// Twin updates were already handed out for this session.
    #[error("twin updates already subscribed")]
    AlreadySubscribed,

    /// Failed to parse an incoming MQTT payload as JSON.
    #[error("failed to parse MQTT payload")]
    PayloadParse(#[source] serde_json::Error),
}

impl MqttError {
    /// Convert into a [`TransportError`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> TransportError {
        match self {
            Self::InvalidCredentials(err) => TransportError::InvalidCredentials(err),
            Self::Connection(ConnectionError::ConnectionRefused(code)) => match code {
                ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword => {
                    TransportError::NotAuthorized
                }
                ConnectReturnCode::ServiceUnavailable => TransportError::ServerUnavailable,
                other => TransportError::Protocol(Box::new(Self::Connection(
                    ConnectionError::ConnectionRefused(other),
                ))),
            },
            Self::Connection(err) => TransportError::Network(Box::new(Self::Connection(err))),
            Self::ConnectTimeout => TransportError::Timeout,
            Self::ConnectionLost => TransportError::NotConnected,
            Self::Rejected(status) => TransportError::Rejected(status),
            other @ Self::Client(_) => TransportError::Network(Box::new(other)),
            other @ (Self::AlreadySubscribed | Self::PayloadParse(_)) => {
                TransportError::Protocol(Box::new(other))
            }
        }
    }
}

impl From<MqttError> for TransportError {
    fn from(err: MqttError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused(code: ConnectReturnCode) -> TransportError {
        MqttError::Connection(ConnectionError::ConnectionRefused(code)).into()
    }

    #[test]
    fn should_map_refused_credentials_to_not_authorized() {
        assert!(matches!(
            refused(ConnectReturnCode::NotAuthorized),
            TransportError::NotAuthorized
        ));
        assert!(matches!(
            refused(ConnectReturnCode::BadUserNamePassword),
            TransportError::NotAuthorized
        ));
    }

    #[test]
    fn should_map_service_unavailable_to_failover() {
        let err = refused(ConnectReturnCode::ServiceUnavailable);
        assert!(matches!(err, TransportError::ServerUnavailable));
        assert!(err.is_failover());
    }

    #[test]
    fn should_not_fail_over_on_protocol_refusal() {
        let err = refused(ConnectReturnCode::RefusedProtocolVersion);
        assert!(matches!(err, TransportError::Protocol(_)));
        assert!(!err.is_failover());
    }

    #[test]
    fn should_treat_io_errors_as_network_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: TransportError = MqttError::Connection(ConnectionError::Io(io)).into();
        assert!(matches!(err, TransportError::Network(_)));
        assert!(err.is_failover());
    }

    #[test]
    fn should_map_lost_connection_to_not_connected() {
        let err: TransportError = MqttError::ConnectionLost.into();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn should_display_payload_parse_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err = MqttError::PayloadParse(json_err);
        assert_eq!(err.to_string(), "failed to parse MQTT payload");
    }
}
