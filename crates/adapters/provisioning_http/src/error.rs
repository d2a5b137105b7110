//! Provisioning adapter error types.

use boltsim_domain::error::{ProvisioningError, SignError};

/// Errors specific to the HTTP provisioning client.
#[derive(Debug, thiserror::Error)]
pub enum DpsError {
    /// The enrollment master key could not be used.
    #[error("invalid enrollment key")]
    Key(#[source] SignError),

    /// The reqwest client could not be built or a request failed.
    #[error("HTTP request failed")]
    Http(#[source] reqwest::Error),

    /// A response body did not match the expected JSON shape.
    #[error("failed to decode provisioning response")]
    Decode(#[source] serde_json::Error),

    /// The service answered with an unexpected status.
    #[error("provisioning service returned {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The registration finished without an assigned hub.
    #[error("registration finished without an assigned hub")]
    Unassigned {
        /// Terminal status reported by the service.
        status: String,
    },

    /// The registration was still in progress after every status poll.
    #[error("registration still in progress after {0} polls")]
    StillAssigning(u32),

    /// The caller cancelled the registration.
    #[error("registration cancelled")]
    Cancelled,
}

impl DpsError {
    /// Convert into a [`ProvisioningError`] for propagation across the port
    /// boundary.
    pub fn into_domain(self) -> ProvisioningError {
        match self {
            Self::Key(err) => ProvisioningError::KeyFormat(err),
            Self::Status { status, body } => ProvisioningError::Status { status, body },
            Self::Unassigned { status } => ProvisioningError::Unassigned { status },
            Self::StillAssigning(attempts) => ProvisioningError::RegistrationTimeout { attempts },
            Self::Cancelled => ProvisioningError::Cancelled,
            other => ProvisioningError::Transport(Box::new(other)),
        }
    }
}

impl From<DpsError> for ProvisioningError {
    fn from(err: DpsError) -> Self {
        err.into_domain()
    }
}

impl From<reqwest::Error> for DpsError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err)
    }
}

impl From<serde_json::Error> for DpsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_map_status_to_domain_status() {
        let err: ProvisioningError = DpsError::Status {
            status: 401,
            body: "unauthorized".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            ProvisioningError::Status { status: 401, ref body } if body == "unauthorized"
        ));
    }

    #[test]
    fn should_map_exhausted_polls_to_registration_timeout() {
        let err: ProvisioningError = DpsError::StillAssigning(3).into();
        assert!(matches!(
            err,
            ProvisioningError::RegistrationTimeout { attempts: 3 }
        ));
    }

    #[test]
    fn should_wrap_decode_errors_as_transport() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err: ProvisioningError = DpsError::Decode(json_err).into();
        assert!(matches!(err, ProvisioningError::Transport(_)));
    }

    #[test]
    fn should_display_still_assigning() {
        assert_eq!(
            DpsError::StillAssigning(3).to_string(),
            "registration still in progress after 3 polls"
        );
    }
}
