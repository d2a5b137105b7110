//! Registration requests and their outcome.

use crate::connection_string::ConnectionString;
use crate::id::DeviceId;

/// Model id announced by every simulated bolt machine.
pub const BOLT_MACHINE_MODEL_ID: &str = "dtmi:parnellAerospace:BoltMakerV1;1";

/// What a device needs to register with the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub device_id: DeviceId,
    /// Digital twin model id sent in the registration payload.
    pub model_id: String,
    /// Scope of the enrollment group.
    pub id_scope: String,
}

impl ProvisioningRequest {
    #[must_use]
    pub fn new(device_id: DeviceId, id_scope: impl Into<String>) -> Self {
        Self {
            device_id,
            model_id: BOLT_MACHINE_MODEL_ID.to_string(),
            id_scope: id_scope.into(),
        }
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Resource the registration token is scoped to.
    #[must_use]
    pub fn resource(&self) -> String {
        format!("{}/registrations/{}", self.id_scope, self.device_id)
    }
}

/// A successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningResponse {
    pub connection_string: ConnectionString,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_scope_resource_to_registration() {
        let request = ProvisioningRequest::new(DeviceId::new("Everett-BoltMachine-1"), "0ne00000000");
        assert_eq!(
            request.resource(),
            "0ne00000000/registrations/Everett-BoltMachine-1"
        );
        assert_eq!(request.model_id, BOLT_MACHINE_MODEL_ID);
    }
}
