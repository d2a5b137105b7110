//! MQTT username and password for a device identity.

use std::time::Duration;

use boltsim_domain::connection_string::ConnectionString;
use boltsim_domain::error::SignError;
use boltsim_domain::sas::TokenSigner;
use boltsim_domain::time::Timestamp;

/// API version announced in the username.
pub const API_VERSION: &str = "2021-04-12";

/// Username and SAS password for one session.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Sign a device-scoped password valid for `ttl` from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::KeyFormat`] if the shared access key is not base64.
    pub fn for_device(
        connection_string: &ConnectionString,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<Self, SignError> {
        let host = &connection_string.host_name;
        let device_id = &connection_string.device_id;
        let resource = format!("{host}/devices/{device_id}");
        let password = TokenSigner::new(&connection_string.shared_access_key)?
            .sign(&resource, None, ttl, now)
            .to_string();

        Ok(Self {
            client_id: device_id.to_string(),
            username: format!("{host}/{device_id}/?api-version={API_VERSION}"),
            password,
        })
    }
}
