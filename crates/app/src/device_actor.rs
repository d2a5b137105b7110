//! Per-device lifecycle: provisioning, sessions, twin sync, and the two pumps.
//!
//! Every device owns a cancellation tree:
//!
//! ```text
//! root (device lifetime)
//! ├── session scope (replaced after every disconnect)
//! │   └── twin listener
//! └── pump scope (replaced after an explicit disconnect)
//!     ├── telemetry pump token (replaced when the twin changes)
//!     └── reported pump token  (replaced when the twin changes)
//! ```
//!
//! Network calls race the root token and a per-call timeout, never the
//! session scope, so a disconnect does not abort the send that caused it.
//! A failover closes the session but leaves the pump scope alone: the pump
//! that noticed the failover keeps ticking until the device reconnects.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use boltsim_domain::connection::ConnectionState;
use boltsim_domain::connection_string::ConnectionString;
use boltsim_domain::device::{DeviceSpec, Tunables};
use boltsim_domain::error::{DeviceError, TransportError};
use boltsim_domain::id::DeviceId;
use boltsim_domain::machine::BoltMachine;
use boltsim_domain::provisioning::{BOLT_MACHINE_MODEL_ID, ProvisioningRequest};
use boltsim_domain::telemetry::TelemetryEncoder;
use boltsim_domain::time;
use boltsim_domain::twin::{self, TwinPatch, TwinUpdate};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::ports::{HostProbe, OutboundMessage, Provisioner, Session, Transport};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

const TELEMETRY: &str = "telemetry";
const REPORTED: &str = "reported properties";

/// Per-device timing and registration settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Enrollment scope used for provisioning.
    pub id_scope: String,
    /// Model id announced at registration.
    pub model_id: String,
    /// Pause before the first connect.
    pub settle_delay: Duration,
    /// Upper bound for every session call.
    pub call_timeout: Duration,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            id_scope: String::new(),
            model_id: BOLT_MACHINE_MODEL_ID.to_string(),
            settle_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(10),
        }
    }
}

struct Link<S> {
    state: ConnectionState,
    connection_string: Option<ConnectionString>,
    session: Option<Arc<S>>,
    scope: CancellationToken,
    pumps: CancellationToken,
    telemetry_pump: CancellationToken,
    reported_pump: CancellationToken,
}

impl<S> Link<S> {
    /// The live session scope, replacing it first if it was cancelled.
    fn session_scope(&mut self, root: &CancellationToken) -> CancellationToken {
        if self.scope.is_cancelled() {
            self.scope = root.child_token();
        }
        self.scope.clone()
    }

    fn pump_scope(&mut self, root: &CancellationToken) -> CancellationToken {
        if self.pumps.is_cancelled() {
            self.pumps = root.child_token();
        }
        self.pumps.clone()
    }
}

struct Simulation {
    machine: BoltMachine,
    encoder: TelemetryEncoder,
    rng: StdRng,
}

struct Inner<P, T: Transport, H> {
    device_id: DeviceId,
    request: ProvisioningRequest,
    options: DeviceOptions,
    provisioner: Arc<P>,
    transport: Arc<T>,
    host: Arc<H>,
    root: CancellationToken,
    link: Mutex<Link<T::Session>>,
    simulation: Mutex<Simulation>,
    tunables: watch::Sender<Tunables>,
    sending_telemetry: AtomicBool,
    sending_reported: AtomicBool,
    retry_count: AtomicU32,
}

/// One simulated bolt machine and its connection to the hub.
///
/// Cloning is cheap and yields another handle to the same device.
pub struct DeviceActor<P, T: Transport, H> {
    inner: Arc<Inner<P, T, H>>,
}

impl<P, T: Transport, H> Clone for DeviceActor<P, T, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Holds a single-flight flag for as long as it lives.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P, T, H> DeviceActor<P, T, H>
where
    P: Provisioner,
    T: Transport,
    H: HostProbe,
{
    /// Create a device. Nothing happens until [`start`](Self::start).
    ///
    /// Cancelling `root` stops every activity of this device.
    #[must_use]
    pub fn new(
        spec: DeviceSpec,
        options: DeviceOptions,
        provisioner: Arc<P>,
        transport: Arc<T>,
        host: Arc<H>,
        root: CancellationToken,
    ) -> Self {
        let DeviceSpec {
            device_id,
            machine,
            format,
        } = spec;
        let request = ProvisioningRequest::new(device_id.clone(), options.id_scope.as_str())
            .with_model_id(options.model_id.as_str());
        let pumps = root.child_token();
        let link = Link {
            state: ConnectionState::Idle,
            connection_string: None,
            session: None,
            scope: root.child_token(),
            telemetry_pump: pumps.child_token(),
            reported_pump: pumps.child_token(),
            pumps,
        };
        let simulation = Simulation {
            machine,
            encoder: TelemetryEncoder::new(device_id.clone(), format),
            rng: StdRng::from_entropy(),
        };
        let (tunables, _) = watch::channel(Tunables::default());

        Self {
            inner: Arc::new(Inner {
                device_id,
                request,
                options,
                provisioner,
                transport,
                host,
                root,
                link: Mutex::new(link),
                simulation: Mutex::new(simulation),
                tunables,
                sending_telemetry: AtomicBool::new(false),
                sending_reported: AtomicBool::new(false),
                retry_count: AtomicU32::new(0),
            }),
        }
    }

    /// Registration id of this device.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.link).state
    }

    /// Current twin-derived settings.
    #[must_use]
    pub fn tunables(&self) -> Tunables {
        *self.inner.tunables.borrow()
    }

    /// Observe settings changes.
    #[must_use]
    pub fn watch_tunables(&self) -> watch::Receiver<Tunables> {
        self.inner.tunables.subscribe()
    }

    /// Consecutive failed sends since the last success.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::Acquire)
    }

    /// Cached hub credentials, if the device has been provisioned.
    #[must_use]
    pub fn connection_string(&self) -> Option<ConnectionString> {
        lock(&self.inner.link).connection_string.clone()
    }

    /// Settle, connect, apply the twin, and launch both pumps.
    ///
    /// Returns `Ok(())` without connecting if the device is stopped while
    /// settling.
    ///
    /// # Errors
    ///
    /// Returns the connect or twin retrieval failure. The device then stays
    /// disconnected until a pump or caller connects it again.
    #[tracing::instrument(skip_all, fields(device_id = %self.inner.device_id))]
    pub async fn start(&self) -> Result<(), DeviceError> {
        debug!("starting device");
        tokio::select! {
            biased;
            () = self.inner.root.cancelled() => {
                debug!("device stopped while settling");
                return Ok(());
            }
            () = tokio::time::sleep(self.inner.options.settle_delay) => {}
        }

        self.connect().await?;
        self.apply_initial_twin().await
    }

    /// Stop every activity and close the session.
    pub async fn stop(&self) {
        self.inner.root.cancel();
        if let Err(err) = self.disconnect().await {
            warn!(device_id = %self.inner.device_id, error = %err, "error stopping device");
        }
    }

    /// Open a session, provisioning first when no credentials are cached.
    ///
    /// A connect failure that looks like a hub failover (not authorized,
    /// server unavailable, network) triggers one re-provision and one more
    /// connect attempt.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::AlreadyConnecting`] if a connect is in flight.
    /// - [`DeviceError::Provisioning`] or [`DeviceError::Transport`] if the
    ///   attempt fails; the device is then `Disconnected`.
    /// - [`DeviceError::Cancelled`] if the device is stopped meanwhile.
    #[tracing::instrument(skip_all, fields(device_id = %self.inner.device_id))]
    pub async fn connect(&self) -> Result<(), DeviceError> {
        let cached = {
            let mut link = lock(&self.inner.link);
            if link.state.is_connecting() {
                return Err(DeviceError::AlreadyConnecting);
            }
            if link.state.is_connected() {
                return Ok(());
            }
            let cached = link.connection_string.clone();
            let next = if cached.is_some() {
                ConnectionState::Connecting
            } else {
                ConnectionState::Provisioning
            };
            link.state.transition(next)?;
            cached
        };

        let result = self.establish(cached).await;
        if let Err(err) = &result {
            error!(error = %err, "error connecting to hub");
            let mut link = lock(&self.inner.link);
            if let Err(illegal) = link.state.transition(ConnectionState::Disconnected) {
                debug!(error = %illegal, "connection state already settled");
            }
        }
        result
    }

    async fn establish(&self, cached: Option<ConnectionString>) -> Result<(), DeviceError> {
        let connection_string = match cached {
            Some(connection_string) => connection_string,
            None => self.provision().await?,
        };

        let session = match self.open_session(&connection_string).await {
            Ok(session) => session,
            Err(DeviceError::Transport(err)) if err.is_failover() => {
                warn!(error = %err, "hub failover detected, re-provisioning device");
                lock(&self.inner.link)
                    .state
                    .transition(ConnectionState::Provisioning)?;
                let connection_string = self.provision().await?;
                let session = self.open_session(&connection_string).await?;
                info!("reconnected after hub failover");
                session
            }
            Err(err) => return Err(err),
        };

        let updates = match self.call(session.subscribe_twin_updates()).await {
            Ok(updates) => updates,
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    debug!(error = %close_err, "error closing half-open session");
                }
                return Err(err);
            }
        };

        let scope = {
            let mut link = lock(&self.inner.link);
            link.state.transition(ConnectionState::Connected)?;
            link.session = Some(Arc::new(session));
            link.session_scope(&self.inner.root)
        };
        tokio::spawn(self.clone().listen_twin_updates(updates, scope));

        info!(hub = %connection_string.host_name, "device connected");
        Ok(())
    }

    async fn provision(&self) -> Result<ConnectionString, DeviceError> {
        debug!(scope = %self.inner.request.id_scope, "provisioning device");
        let response = self
            .inner
            .provisioner
            .provision(&self.inner.request, &self.inner.root)
            .await?;
        let connection_string = response.connection_string;
        {
            let mut link = lock(&self.inner.link);
            link.connection_string = Some(connection_string.clone());
            link.state.transition(ConnectionState::Connecting)?;
        }
        debug!(hub = %connection_string.host_name, "provisioned device");
        Ok(connection_string)
    }

    async fn open_session(
        &self,
        connection_string: &ConnectionString,
    ) -> Result<T::Session, DeviceError> {
        trace!(hub = %connection_string.host_name, "opening session");
        self.call(self.inner.transport.connect(connection_string))
            .await
    }

    /// Close the session and cancel everything running under it, pumps
    /// included.
    ///
    /// A no-op when no session is open. Cached credentials are kept for the
    /// next connect.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::IllegalTransition`] only if the state machine
    /// was corrupted; closing failures are logged.
    #[tracing::instrument(skip_all, fields(device_id = %self.inner.device_id))]
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        self.close_session(true).await
    }

    async fn close_session(&self, stop_pumps: bool) -> Result<(), DeviceError> {
        let session = {
            let mut link = lock(&self.inner.link);
            if link.session.is_none() {
                trace!("already disconnected");
                return Ok(());
            }
            link.state.transition(ConnectionState::Disconnected)?;
            link.scope.cancel();
            if stop_pumps {
                link.pumps.cancel();
            }
            link.session.take()
        };

        if let Some(session) = session {
            match tokio::time::timeout(self.inner.options.call_timeout, session.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "error closing session"),
                Err(_) => debug!("timed out closing session"),
            }
        }

        {
            let mut link = lock(&self.inner.link);
            link.session_scope(&self.inner.root);
            link.pump_scope(&self.inner.root);
        }
        info!("device disconnected");
        Ok(())
    }

    /// Advance the machine one tick and encode its telemetry.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the record cannot be encoded.
    pub fn next_telemetry(&self) -> Result<Vec<u8>, serde_json::Error> {
        let tunables = self.tunables();
        let now = time::now();
        let mut simulation = lock(&self.inner.simulation);
        let Simulation {
            machine,
            encoder,
            rng,
        } = &mut *simulation;
        let record = machine.tick(rng, &tunables, now);
        encoder.encode(&record, rng, now)
    }

    /// Send one telemetry message, connecting first if needed.
    ///
    /// After more than one consecutive failed send the device assumes it was
    /// moved to another hub: it disconnects, drops its credentials, and
    /// provisions again before sending. The pumps keep running if that
    /// fails, so the next tick tries again.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::Busy`] if a telemetry send is already in flight.
    /// - Any connect failure.
    /// - The send failure, which also bumps the retry count.
    #[tracing::instrument(skip_all, fields(device_id = %self.inner.device_id))]
    pub async fn send_telemetry(&self, body: Vec<u8>) -> Result<(), DeviceError> {
        let Some(in_flight) = InFlight::acquire(&self.inner.sending_telemetry) else {
            trace!("skipping telemetry, a send is already in flight");
            return Err(DeviceError::Busy(TELEMETRY));
        };

        let failover = self.retry_count() > 1;
        if failover {
            debug!(
                retry_count = self.retry_count(),
                "device might have been moved, re-provisioning"
            );
            self.close_session(false).await?;
            lock(&self.inner.link).connection_string = None;
        }

        let outcome = self.connect_and_send(body).await;
        drop(in_flight);

        if failover && self.state().is_connected() {
            info!("device failed over successfully");
            if let Err(err) = self.apply_initial_twin().await {
                warn!(error = %err, "error applying twin after failover");
            }
        }
        outcome
    }

    async fn connect_and_send(&self, body: Vec<u8>) -> Result<(), DeviceError> {
        if !self.state().is_connected() {
            self.connect().await?;
        }
        self.send_event(body).await
    }

    async fn send_event(&self, body: Vec<u8>) -> Result<(), DeviceError> {
        let session = self.session()?;
        let size = body.len();
        let message = OutboundMessage::telemetry(body, &self.inner.device_id, time::now());
        let message_id = message.message_id;
        let result = self.call(session.send_event(message)).await;
        match &result {
            Ok(()) => {
                self.inner.retry_count.store(0, Ordering::Release);
                trace!(%message_id, size, "sent telemetry");
            }
            Err(DeviceError::Cancelled) => {}
            Err(err) => {
                let retry_count = self.inner.retry_count.fetch_add(1, Ordering::AcqRel) + 1;
                error!(error = %err, retry_count, "error sending telemetry to hub");
            }
        }
        result
    }

    /// Report host facts, connecting first if needed.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::Busy`] if a reported-property send is in flight.
    /// - Any connect failure.
    /// - The update failure, which also bumps the retry count.
    #[tracing::instrument(skip_all, fields(device_id = %self.inner.device_id))]
    pub async fn send_reported(&self) -> Result<(), DeviceError> {
        let Some(_in_flight) = InFlight::acquire(&self.inner.sending_reported) else {
            trace!("skipping reported properties, an update is already in flight");
            return Err(DeviceError::Busy(REPORTED));
        };

        if !self.state().is_connected() {
            self.connect().await?;
        }

        let session = self.session()?;
        let patch = self.inner.host.reported_properties().to_patch();
        let result = self.call(session.update_reported(patch)).await;
        match &result {
            Ok(()) => {
                self.inner.retry_count.store(0, Ordering::Release);
                debug!("sent reported properties");
            }
            Err(DeviceError::Cancelled) => {}
            Err(err) => {
                let retry_count = self.inner.retry_count.fetch_add(1, Ordering::AcqRel) + 1;
                error!(error = %err, retry_count, "error sending reported properties update");
            }
        }
        result
    }

    /// Apply a desired patch, acknowledge it, and restart the pumps if a
    /// setting changed or `force` is set.
    ///
    /// The local settings stay applied even if the acknowledgment fails.
    #[tracing::instrument(skip_all, fields(device_id = %self.inner.device_id, version = patch.version))]
    pub async fn apply_twin_update(&self, patch: TwinPatch, force: bool) -> TwinUpdate {
        let mut update = TwinUpdate::default();
        self.inner.tunables.send_if_modified(|tunables| {
            update = twin::apply_desired(tunables, &patch);
            update.changed
        });
        for rejected in &update.rejected {
            warn!(error = %rejected, "got illegal twin data");
        }

        if !update.ack.is_empty() {
            let acked = match self.session() {
                Ok(session) => self.call(session.update_reported(update.ack.to_reported())).await,
                Err(err) => Err(err),
            };
            match acked {
                Ok(()) => debug!(keys = update.ack.0.len(), "acknowledged twin update"),
                Err(err) => warn!(error = %err, "twin acknowledgment failed"),
            }
        }

        if (update.changed || force) && !self.inner.root.is_cancelled() {
            self.restart_pumps();
        }
        update
    }

    async fn apply_initial_twin(&self) -> Result<(), DeviceError> {
        let session = self.session()?;
        let desired = self.call(session.retrieve_twin()).await?;
        self.apply_twin_update(desired, true).await;
        debug!(device_id = %self.inner.device_id, "applied desired twin state");
        Ok(())
    }

    fn session(&self) -> Result<Arc<T::Session>, DeviceError> {
        lock(&self.inner.link)
            .session
            .clone()
            .ok_or(DeviceError::Transport(TransportError::NotConnected))
    }

    /// Run a session call under the per-call timeout and the root token.
    async fn call<F, O>(&self, operation: F) -> Result<O, DeviceError>
    where
        F: Future<Output = Result<O, TransportError>>,
    {
        tokio::select! {
            biased;
            () = self.inner.root.cancelled() => Err(DeviceError::Cancelled),
            outcome = tokio::time::timeout(self.inner.options.call_timeout, operation) => match outcome {
                Ok(result) => result.map_err(DeviceError::from),
                Err(_) => Err(TransportError::Timeout.into()),
            },
        }
    }

    fn restart_pumps(&self) {
        let (telemetry, reported) = {
            let mut link = lock(&self.inner.link);
            let scope = link.pump_scope(&self.inner.root);
            link.telemetry_pump.cancel();
            link.reported_pump.cancel();
            link.telemetry_pump = scope.child_token();
            link.reported_pump = scope.child_token();
            (link.telemetry_pump.clone(), link.reported_pump.clone())
        };
        debug!("restarting pumps");

        let device_id = &self.inner.device_id;
        tokio::spawn(
            self.clone()
                .run_telemetry_pump(telemetry)
                .instrument(info_span!("telemetry_pump", %device_id)),
        );
        tokio::spawn(
            self.clone()
                .run_reported_pump(reported)
                .instrument(info_span!("reported_pump", %device_id)),
        );
    }

    fn run_telemetry_pump(self, token: CancellationToken) -> BoxFuture<()> {
        Box::pin(async move {
            debug!("telemetry pump starting");
            while !token.is_cancelled() {
                if self.tunables().is_machine_on {
                    match self.next_telemetry() {
                        Ok(body) => match self.send_telemetry(body).await {
                            Ok(()) | Err(DeviceError::Busy(_)) => {}
                            Err(err) => debug!(error = %err, "telemetry tick failed"),
                        },
                        Err(err) => error!(error = %err, "error preparing telemetry"),
                    }
                } else {
                    debug!("ignoring telemetry as the machine is off");
                }

                let interval = self.tunables().telemetry_interval();
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!("telemetry pump stopped");
        })
    }

    fn run_reported_pump(self, token: CancellationToken) -> BoxFuture<()> {
        Box::pin(async move {
            debug!("reported properties pump starting");
            while !token.is_cancelled() {
                match self.send_reported().await {
                    Ok(()) | Err(DeviceError::Busy(_)) => {}
                    Err(err) => debug!(error = %err, "reported properties tick failed"),
                }

                let interval = self.tunables().reported_interval();
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!("reported properties pump stopped");
        })
    }

    fn listen_twin_updates(
        self,
        mut updates: mpsc::Receiver<TwinPatch>,
        scope: CancellationToken,
    ) -> BoxFuture<()> {
        Box::pin(async move {
            loop {
                tokio::select! {
                    biased;
                    () = scope.cancelled() => {
                        trace!(device_id = %self.inner.device_id, "twin subscription stopped");
                        break;
                    }
                    patch = updates.recv() => match patch {
                        Some(patch) => {
                            trace!(device_id = %self.inner.device_id, version = patch.version, "got twin update");
                            self.apply_twin_update(patch, false).await;
                        }
                        None => {
                            debug!(device_id = %self.inner.device_id, "twin update stream closed");
                            break;
                        }
                    },
                }
            }
        })
    }
}
