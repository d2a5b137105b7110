//! Shared access signatures: time-boxed HMAC-SHA256 credentials.
//!
//! A token authorises access to one resource until its expiry:
//!
//! ```text
//! SharedAccessSignature sr={resource}&sig={signature}&se={expiry}[&skn={role}]
//! ```
//!
//! The signature covers `"{resource}\n{expiry}"` where `resource` is the
//! url-encoded resource path and `expiry` is a unix timestamp in seconds.

use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignError;
use crate::time::Timestamp;

type HmacSha256 = Hmac<Sha256>;

/// Signs resources with a base64-encoded shared access key.
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Decode the key once for repeated signing.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::KeyFormat`] if `key` is not valid base64.
    pub fn new(key: &str) -> Result<Self, SignError> {
        Ok(Self {
            key: STANDARD.decode(key.trim())?,
        })
    }

    /// Sign `resource` for `ttl` starting at `now`.
    #[must_use]
    pub fn sign(
        &self,
        resource: &str,
        role: Option<&str>,
        ttl: Duration,
        now: Timestamp,
    ) -> SharedAccessSignature {
        let expiry = now.timestamp().saturating_add_unsigned(ttl.as_secs());
        self.sign_until(resource, role, expiry)
    }

    /// Sign `resource` with an explicit unix `expiry`. Deterministic.
    #[must_use]
    pub fn sign_until(
        &self,
        resource: &str,
        role: Option<&str>,
        expiry: i64,
    ) -> SharedAccessSignature {
        let encoded = urlencoding::encode(resource).into_owned();
        let to_sign = format!("{encoded}\n{expiry}");
        SharedAccessSignature {
            resource: encoded,
            signature: self.digest(to_sign.as_bytes()),
            expiry,
            key_name: role.map(str::to_string),
        }
    }

    /// Base64 HMAC-SHA256 of `data` under this key.
    #[must_use]
    pub fn digest(&self, data: &[u8]) -> String {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            unreachable!("HMAC accepts keys of any length");
        };
        mac.update(data);
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

/// Derive a per-device key from an enrollment-group master key.
///
/// # Errors
///
/// Returns [`SignError::KeyFormat`] if `master_key` is not valid base64.
pub fn derive_device_key(master_key: &str, device_id: &str) -> Result<String, SignError> {
    Ok(TokenSigner::new(master_key)?.digest(device_id.as_bytes()))
}

/// A signed, time-boxed credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAccessSignature {
    resource: String,
    signature: String,
    expiry: i64,
    key_name: Option<String>,
}

impl SharedAccessSignature {
    /// Unix expiry in seconds.
    #[must_use]
    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    /// The url-encoded resource this token is scoped to.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl fmt::Display for SharedAccessSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SharedAccessSignature sr={}&sig={}&se={}",
            self.resource,
            urlencoding::encode(&self.signature),
            self.expiry
        )?;
        if let Some(name) = &self.key_name {
            write!(f, "&skn={name}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    // base64 of "0123456789abcdef0123456789abcdef"
    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
    const RESOURCE: &str = "0ne00000000/registrations/Everett-BoltMachine-1";

    #[test]
    fn should_produce_known_token_for_fixed_expiry() {
        let signer = TokenSigner::new(KEY).unwrap();
        let token = signer.sign_until(RESOURCE, Some("registration"), 1_700_000_000);
        assert_eq!(
            token.to_string(),
            "SharedAccessSignature sr=0ne00000000%2Fregistrations%2FEverett-BoltMachine-1\
             &sig=ZJczYERDFM%2F0P9SuXjFuIfh9NUcVATr74%2FvtcHKsvGM%3D\
             &se=1700000000&skn=registration"
        );
    }

    #[test]
    fn should_be_deterministic_for_same_inputs() {
        let signer = TokenSigner::new(KEY).unwrap();
        let a = signer.sign_until(RESOURCE, Some("registration"), 1_700_000_000);
        let b = signer.sign_until(RESOURCE, Some("registration"), 1_700_000_000);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn should_change_signature_when_expiry_changes() {
        let signer = TokenSigner::new(KEY).unwrap();
        let a = signer.sign_until(RESOURCE, None, 1_700_000_000);
        let b = signer.sign_until(RESOURCE, None, 1_700_000_001);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn should_set_expiry_from_ttl() {
        let signer = TokenSigner::new(KEY).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let token = signer.sign(RESOURCE, None, Duration::from_secs(60), now);
        assert_eq!(token.expiry(), now.timestamp() + 60);
    }

    #[test]
    fn should_omit_key_name_when_no_role() {
        let signer = TokenSigner::new(KEY).unwrap();
        let token = signer.sign_until("hub.example.net/devices/d1", None, 1);
        assert!(!token.to_string().contains("skn="));
        assert_eq!(token.resource(), "hub.example.net%2Fdevices%2Fd1");
    }

    #[test]
    fn should_reject_key_that_is_not_base64() {
        let err = TokenSigner::new("not base64!!").unwrap_err();
        assert!(matches!(err, SignError::KeyFormat(_)));
    }

    #[test]
    fn should_derive_known_device_key() {
        let key = derive_device_key(KEY, "Everett-BoltMachine-1").unwrap();
        assert_eq!(key, "fmyCwG+U35zLqydFJ3Ti/KdaxL8YNFiGMOst9KRHL0k=");
    }
}
