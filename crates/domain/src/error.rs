//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into these via
//! `#[from]` or an explicit `into_domain`. No `String`-only variants for
//! failures that carry a source.

use crate::connection::ConnectionState;

/// Boxed source error used by adapter-originated failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A shared access key could not be used for signing.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The key is not valid base64.
    #[error("shared access key is not valid base64")]
    KeyFormat(#[from] base64::DecodeError),
}

/// A connection string could not be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    /// A `key=value` segment has no `=`.
    #[error("malformed connection string segment {0:?}")]
    MalformedSegment(String),

    /// A required key is absent.
    #[error("connection string is missing {0}")]
    MissingField(&'static str),
}

/// A desired-property value does not have the expected primitive type.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("malformed twin value for {key}: expected {expected}, got {found}")]
pub struct TwinValueError {
    /// Desired property name.
    pub key: String,
    /// Human readable description of the expected type.
    pub expected: &'static str,
    /// The offending value.
    pub found: serde_json::Value,
}

/// Failures of the registration protocol against the provisioning service.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// The enrollment key could not be used to derive or sign credentials.
    #[error("invalid enrollment key")]
    KeyFormat(#[from] SignError),

    /// The provisioning service answered with a non-success status.
    #[error("provisioning service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The registration completed without assigning a hub.
    #[error("registration finished with status {status:?} and no assigned hub")]
    Unassigned {
        /// Terminal registration status reported by the service.
        status: String,
    },

    /// The registration was still in progress after the poll budget.
    #[error("registration still in progress after {attempts} status polls")]
    RegistrationTimeout {
        /// Number of status polls performed.
        attempts: u32,
    },

    /// The caller cancelled the operation.
    #[error("provisioning cancelled")]
    Cancelled,

    /// HTTP or decoding failure.
    #[error("provisioning transport error")]
    Transport(#[source] BoxError),
}

/// Failures reported by a device transport session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The hub refused the credentials.
    #[error("not authorized")]
    NotAuthorized,

    /// The hub refused the connection because it is unavailable.
    #[error("server unavailable")]
    ServerUnavailable,

    /// Network-layer failure (socket, TLS, broken session).
    #[error("network error")]
    Network(#[source] BoxError),

    /// The operation did not complete within the per-call timeout.
    #[error("operation timed out")]
    Timeout,

    /// No session is open.
    #[error("not connected")]
    NotConnected,

    /// The hub answered a request with a failure status.
    #[error("request rejected with status {0}")]
    Rejected(u16),

    /// Credentials could not be built from the connection string.
    #[error("invalid credentials")]
    InvalidCredentials(#[source] SignError),

    /// The hub sent something the session could not interpret.
    #[error("protocol error")]
    Protocol(#[source] BoxError),
}

impl TransportError {
    /// Whether this connect failure suggests the device was moved to another
    /// hub and should be provisioned again.
    #[must_use]
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            Self::NotAuthorized | Self::ServerUnavailable | Self::Network(_)
        )
    }
}

/// Failures of a device-level operation.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A connect attempt is already in flight.
    #[error("device is already connecting")]
    AlreadyConnecting,

    /// A send of the same kind is already in flight.
    #[error("a {0} send is already in flight")]
    Busy(&'static str),

    /// The device was stopped while the operation was pending.
    #[error("operation cancelled")]
    Cancelled,

    /// The requested state transition is not allowed.
    #[error("illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// Current state.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// Provisioning failed.
    #[error("provisioning failed")]
    Provisioning(#[from] ProvisioningError),

    /// The transport failed.
    #[error("transport failed")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_treat_auth_and_availability_failures_as_failover() {
        assert!(TransportError::NotAuthorized.is_failover());
        assert!(TransportError::ServerUnavailable.is_failover());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(TransportError::Network(Box::new(io)).is_failover());
    }

    #[test]
    fn should_not_treat_other_failures_as_failover() {
        assert!(!TransportError::Timeout.is_failover());
        assert!(!TransportError::NotConnected.is_failover());
        assert!(!TransportError::Rejected(400).is_failover());
    }

    #[test]
    fn should_display_registration_timeout() {
        let err = ProvisioningError::RegistrationTimeout { attempts: 3 };
        assert_eq!(
            err.to_string(),
            "registration still in progress after 3 status polls"
        );
    }

    #[test]
    fn should_convert_transport_error_into_device_error() {
        let err: DeviceError = TransportError::Timeout.into();
        assert!(matches!(err, DeviceError::Transport(TransportError::Timeout)));
    }

    #[test]
    fn should_display_malformed_twin_value() {
        let err = TwinValueError {
            key: "isMachineOn".to_string(),
            expected: "boolean",
            found: serde_json::json!("notabool"),
        };
        assert_eq!(
            err.to_string(),
            "malformed twin value for isMachineOn: expected boolean, got \"notabool\""
        );
    }
}
