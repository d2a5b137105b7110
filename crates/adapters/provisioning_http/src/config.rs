//! Provisioning service configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the HTTP provisioning client.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DpsConfig {
    /// Service host, or a full base URL when a scheme is given.
    pub endpoint: String,
    /// Enrollment group master key (base64).
    pub master_key: String,
    /// REST API version query parameter.
    pub api_version: String,
    /// Status polls before giving up on an in-progress registration.
    pub max_status_polls: u32,
    /// Wait used when a `202` carries no usable `Retry-After`, in seconds.
    pub default_retry_after_secs: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for DpsConfig {
    fn default() -> Self {
        Self {
            endpoint: "global.azure-devices-provisioning.net".to_string(),
            master_key: String::new(),
            api_version: "2019-03-31".to_string(),
            max_status_polls: 3,
            default_retry_after_secs: 3,
            request_timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for DpsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DpsConfig")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("max_status_polls", &self.max_status_polls)
            .field("default_retry_after_secs", &self.default_retry_after_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl DpsConfig {
    /// Base URL with scheme and without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        }
    }

    #[must_use]
    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
