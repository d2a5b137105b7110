//! A fleet of independent device actors sharing adapters.

use std::sync::Arc;

use boltsim_domain::device::{PlantSpec, plan_fleet};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::device_actor::{DeviceActor, DeviceOptions};
use crate::ports::{HostProbe, Provisioner, Transport};

/// Every simulated device of every plant.
///
/// Each device gets its own child of the fleet token, so one device failing
/// or stopping never touches the others.
pub struct Fleet<P, T: Transport, H> {
    devices: Vec<DeviceActor<P, T, H>>,
    root: CancellationToken,
    startups: JoinSet<()>,
}

impl<P, T, H> Fleet<P, T, H>
where
    P: Provisioner,
    T: Transport,
    H: HostProbe,
{
    /// Plan one device per machine of every plant.
    #[must_use]
    pub fn new(
        plants: &[PlantSpec],
        options: &DeviceOptions,
        provisioner: Arc<P>,
        transport: Arc<T>,
        host: Arc<H>,
    ) -> Self {
        let root = CancellationToken::new();
        let devices = plan_fleet(plants)
            .into_iter()
            .map(|spec| {
                DeviceActor::new(
                    spec,
                    options.clone(),
                    Arc::clone(&provisioner),
                    Arc::clone(&transport),
                    Arc::clone(&host),
                    root.child_token(),
                )
            })
            .collect();

        Self {
            devices,
            root,
            startups: JoinSet::new(),
        }
    }

    #[must_use]
    pub fn devices(&self) -> &[DeviceActor<P, T, H>] {
        &self.devices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Start every device concurrently. Returns immediately.
    pub fn start(&mut self) {
        info!(devices = self.devices.len(), "starting fleet");
        for device in &self.devices {
            let device = device.clone();
            self.startups.spawn(async move {
                if let Err(err) = device.start().await {
                    warn!(device_id = %device.device_id(), error = %err, "device failed to start");
                }
            });
        }
    }

    /// Wait until every device finished its startup attempt.
    pub async fn wait_started(&mut self) {
        while let Some(joined) = self.startups.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "device startup task failed");
            }
        }
    }

    /// Stop all devices and close their sessions.
    pub async fn shutdown(mut self) {
        info!("shutting down fleet");
        self.root.cancel();
        self.wait_started().await;
        for device in &self.devices {
            device.stop().await;
        }
        info!("fleet stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, FakeProvisioner, FakeTransport, eventually, options};
    use boltsim_domain::connection::ConnectionState;
    use boltsim_domain::telemetry::TelemetryFormat;

    fn plants() -> Vec<PlantSpec> {
        vec![
            PlantSpec {
                name: "Everett".to_string(),
                machine_count: 2,
                format: TelemetryFormat::Flat,
            },
            PlantSpec {
                name: "Austin".to_string(),
                machine_count: 1,
                format: TelemetryFormat::Envelope,
            },
        ]
    }

    #[tokio::test]
    async fn should_create_one_device_per_machine() {
        let fleet = Fleet::new(
            &plants(),
            &options(),
            Arc::new(FakeProvisioner::new()),
            Arc::new(FakeTransport::new()),
            Arc::new(FakeHost),
        );

        assert_eq!(fleet.len(), 3);
        assert_eq!(
            fleet.devices()[2].device_id().as_str(),
            "Austin-BoltMachine-1"
        );
    }

    #[tokio::test]
    async fn should_connect_every_device_and_close_them_on_shutdown() {
        let provisioner = Arc::new(FakeProvisioner::new());
        let transport = Arc::new(FakeTransport::new());
        let mut fleet = Fleet::new(
            &plants(),
            &options(),
            Arc::clone(&provisioner),
            Arc::clone(&transport),
            Arc::new(FakeHost),
        );

        fleet.start();
        fleet.wait_started().await;

        assert!(
            fleet
                .devices()
                .iter()
                .all(|device| device.state() == ConnectionState::Connected)
        );
        assert_eq!(provisioner.calls(), 3);
        assert!(eventually(|| transport.hub.events().len() >= 3).await);

        fleet.shutdown().await;
        assert_eq!(transport.hub.closes(), 3);
    }

    #[tokio::test]
    async fn should_keep_other_devices_running_when_one_fails() {
        let provisioner = Arc::new(FakeProvisioner::new());
        provisioner.fail_next(boltsim_domain::error::ProvisioningError::RegistrationTimeout {
            attempts: 3,
        });
        let transport = Arc::new(FakeTransport::new());
        let mut fleet = Fleet::new(
            &plants(),
            &options(),
            provisioner,
            Arc::clone(&transport),
            Arc::new(FakeHost),
        );

        fleet.start();
        fleet.wait_started().await;

        let connected = fleet
            .devices()
            .iter()
            .filter(|device| device.state() == ConnectionState::Connected)
            .count();
        assert_eq!(connected, 2);
        fleet.shutdown().await;
    }
}
