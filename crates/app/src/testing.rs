//! In-memory adapters for exercising device lifecycles without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boltsim_domain::connection_string::ConnectionString;
use boltsim_domain::device::DeviceSpec;
use boltsim_domain::error::{ProvisioningError, TransportError};
use boltsim_domain::id::DeviceId;
use boltsim_domain::machine::BoltMachine;
use boltsim_domain::provisioning::{ProvisioningRequest, ProvisioningResponse};
use boltsim_domain::reported::ReportedProperties;
use boltsim_domain::telemetry::TelemetryFormat;
use boltsim_domain::time;
use boltsim_domain::twin::TwinPatch;
use serde_json::{Map, Value};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::device_actor::{DeviceActor, DeviceOptions};
use crate::ports::{HostProbe, OutboundMessage, Provisioner, Session, Transport};

pub type TestActor = DeviceActor<FakeProvisioner, FakeTransport, FakeHost>;

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ── Scripted provisioner ───────────────────────────────────────────

/// Assigns `hub-{n}.example.net` on the n-th call.
#[derive(Default)]
pub struct FakeProvisioner {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<ProvisioningError>>,
    gate: Option<Arc<Notify>>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits for `gate` before answering.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, err: ProvisioningError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provisioner for FakeProvisioner {
    async fn provision(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResponse, ProvisioningError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            tokio::select! {
                () = cancel.cancelled() => return Err(ProvisioningError::Cancelled),
                () = gate.notified() => {}
            }
        }
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(ProvisioningResponse {
            connection_string: ConnectionString::new(
                format!("hub-{n}.example.net"),
                request.device_id.clone(),
                "a2V5",
            ),
        })
    }
}

// ── In-memory hub ──────────────────────────────────────────────────

/// Everything the fake hub saw, shared by all sessions of a transport.
#[derive(Default)]
pub struct FakeHub {
    pub desired: Mutex<TwinPatch>,
    events: Mutex<Vec<OutboundMessage>>,
    reported: Mutex<Vec<Map<String, Value>>>,
    send_attempts: AtomicUsize,
    send_failures: AtomicUsize,
    reported_failures: AtomicUsize,
    send_gate: Mutex<Option<Arc<Notify>>>,
    closes: AtomicUsize,
    twin_updates: Mutex<Option<mpsc::Sender<TwinPatch>>>,
}

impl FakeHub {
    pub fn events(&self) -> Vec<OutboundMessage> {
        self.events.lock().unwrap().clone()
    }

    pub fn reported(&self) -> Vec<Map<String, Value>> {
        self.reported.lock().unwrap().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Fail the next `n` sends with a timeout.
    pub fn fail_sends(&self, n: usize) {
        self.send_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reported-property updates with a timeout.
    pub fn fail_reported(&self, n: usize) {
        self.reported_failures.store(n, Ordering::SeqCst);
    }

    /// Hold every send until `gate` is notified.
    pub fn gate_sends(&self, gate: Arc<Notify>) {
        *self.send_gate.lock().unwrap() = Some(gate);
    }

    /// Deliver a desired patch to the subscribed session.
    pub fn push_desired(&self, patch: TwinPatch) -> bool {
        let sender = self.twin_updates.lock().unwrap().clone();
        sender.is_some_and(|tx| tx.try_send(patch).is_ok())
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub hub: Arc<FakeHub>,
    connect_failures: Mutex<VecDeque<TransportError>>,
    hosts: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connect(&self, err: TransportError) {
        self.connect_failures.lock().unwrap().push_back(err);
    }

    /// Hub host names of every connect attempt, in order.
    pub fn connects(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    type Session = FakeSession;

    async fn connect(
        &self,
        connection_string: &ConnectionString,
    ) -> Result<FakeSession, TransportError> {
        self.hosts
            .lock()
            .unwrap()
            .push(connection_string.host_name.clone());
        let failure = self.connect_failures.lock().unwrap().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(FakeSession {
                hub: Arc::clone(&self.hub),
            }),
        }
    }
}

pub struct FakeSession {
    hub: Arc<FakeHub>,
}

impl Session for FakeSession {
    async fn send_event(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.hub.send_attempts.fetch_add(1, Ordering::SeqCst);
        let gate = self.hub.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if take_one(&self.hub.send_failures) {
            return Err(TransportError::Timeout);
        }
        self.hub.events.lock().unwrap().push(message);
        Ok(())
    }

    async fn retrieve_twin(&self) -> Result<TwinPatch, TransportError> {
        Ok(self.hub.desired.lock().unwrap().clone())
    }

    async fn update_reported(&self, patch: Map<String, Value>) -> Result<(), TransportError> {
        if take_one(&self.hub.reported_failures) {
            return Err(TransportError::Timeout);
        }
        self.hub.reported.lock().unwrap().push(patch);
        Ok(())
    }

    async fn subscribe_twin_updates(&self) -> Result<mpsc::Receiver<TwinPatch>, TransportError> {
        let (tx, rx) = mpsc::channel(16);
        *self.hub.twin_updates.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.hub.closes.fetch_add(1, Ordering::SeqCst);
        self.hub.twin_updates.lock().unwrap().take();
        Ok(())
    }
}

// ── Fixed host ─────────────────────────────────────────────────────

pub struct FakeHost;

impl HostProbe for FakeHost {
    fn reported_properties(&self) -> ReportedProperties {
        ReportedProperties {
            host_name: "sim-host".to_string(),
            ip_address: "10.0.0.7".to_string(),
            host_time: time::now(),
        }
    }
}

// ── Builders ───────────────────────────────────────────────────────

pub fn options() -> DeviceOptions {
    DeviceOptions {
        id_scope: "0ne00000000".to_string(),
        settle_delay: Duration::ZERO,
        call_timeout: Duration::from_secs(1),
        ..DeviceOptions::default()
    }
}

pub fn spec() -> DeviceSpec {
    DeviceSpec {
        device_id: DeviceId::new("Everett-BoltMachine-1"),
        machine: BoltMachine::new("Everett", "ProductionLine 1"),
        format: TelemetryFormat::Flat,
    }
}

pub fn actor(
    provisioner: &Arc<FakeProvisioner>,
    transport: &Arc<FakeTransport>,
    root: CancellationToken,
) -> TestActor {
    DeviceActor::new(
        spec(),
        options(),
        Arc::clone(provisioner),
        Arc::clone(transport),
        Arc::new(FakeHost),
        root,
    )
}

/// Poll `condition` until it holds, for at most a second.
pub async fn eventually(condition: impl FnMut() -> bool) -> bool {
    eventually_within(Duration::from_secs(1), condition).await
}

/// Poll `condition` until it holds, for at most `limit`.
pub async fn eventually_within(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(5);
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
    }
    condition()
}
