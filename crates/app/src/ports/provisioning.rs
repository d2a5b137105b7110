//! Provisioning port: resolves a device identity to a hub connection string.

use std::future::Future;

use boltsim_domain::error::ProvisioningError;
use boltsim_domain::provisioning::{ProvisioningRequest, ProvisioningResponse};
use tokio_util::sync::CancellationToken;

/// Registers devices with a provisioning service.
///
/// Implementations perform the full register-then-poll exchange and must
/// return [`ProvisioningError::Cancelled`] promptly once `cancel` fires.
pub trait Provisioner: Send + Sync + 'static {
    /// Register `request.device_id` and return its assigned hub credentials.
    fn provision(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ProvisioningResponse, ProvisioningError>> + Send;
}
