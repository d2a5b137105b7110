//! [`Transport`] and [`Session`] implementations over rumqttc.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boltsim_app::ports::{OutboundMessage, Session, Transport};
use boltsim_domain::connection_string::ConnectionString;
use boltsim_domain::error::TransportError;
use boltsim_domain::id::DeviceId;
use boltsim_domain::time;
use boltsim_domain::twin::TwinPatch;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, trace};

use crate::config::MqttConfig;
use crate::credentials::Credentials;
use crate::error::MqttError;
use crate::router::{self, Routes, TwinResponse, lock};
use crate::topics;

const DESIRED_BUFFER: usize = 16;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Opens one MQTT connection per session.
#[derive(Debug, Clone, Default)]
pub struct MqttTransport {
    config: MqttConfig,
}

impl MqttTransport {
    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

impl Transport for MqttTransport {
    type Session = MqttSession;

    async fn connect(
        &self,
        connection_string: &ConnectionString,
    ) -> Result<MqttSession, TransportError> {
        Ok(MqttSession::open(&self.config, connection_string).await?)
    }
}

/// A connected device session. The event loop runs on its own task.
pub struct MqttSession {
    device_id: DeviceId,
    client: AsyncClient,
    routes: Arc<Routes>,
    desired: Mutex<Option<mpsc::Receiver<TwinPatch>>>,
    next_rid: AtomicU64,
    shutdown: CancellationToken,
    closing: AtomicBool,
}

impl MqttSession {
    #[instrument(
        skip_all,
        fields(device_id = %connection_string.device_id, hub = %connection_string.host_name),
        err
    )]
    async fn open(
        config: &MqttConfig,
        connection_string: &ConnectionString,
    ) -> Result<Self, MqttError> {
        let credentials = Credentials::for_device(connection_string, config.token_ttl(), time::now())
            .map_err(MqttError::InvalidCredentials)?;
        let mut options = MqttOptions::new(
            credentials.client_id,
            connection_string.host_name.clone(),
            config.port,
        );
        options.set_keep_alive(config.keep_alive());
        options.set_credentials(credentials.username, credentials.password);
        if config.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, config.channel_capacity);
        let filters = [
            topics::TWIN_RESPONSES.to_string(),
            topics::TWIN_DESIRED.to_string(),
            topics::cloud_to_device(&connection_string.device_id),
        ];
        tokio::time::timeout(
            config.connect_timeout(),
            handshake(&client, &mut eventloop, &filters),
        )
        .await
        .map_err(|_| MqttError::ConnectTimeout)??;

        let (tx, rx) = mpsc::channel(DESIRED_BUFFER);
        let routes = Arc::new(Routes::new(tx));
        let shutdown = CancellationToken::new();
        tokio::spawn(
            router::run(eventloop, Arc::clone(&routes), shutdown.clone()).instrument(info_span!(
                "mqtt_router",
                device_id = %connection_string.device_id
            )),
        );
        info!("hub session open");

        Ok(Self {
            device_id: connection_string.device_id.clone(),
            client,
            routes,
            desired: Mutex::new(Some(rx)),
            next_rid: AtomicU64::new(1),
            shutdown,
            closing: AtomicBool::new(false),
        })
    }

    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), MqttError> {
        if self.routes.closed().is_cancelled() {
            return Err(MqttError::ConnectionLost);
        }
        tokio::select! {
            () = self.routes.closed().cancelled() => Err(MqttError::ConnectionLost),
            sent = self.client.publish(topic, QoS::AtLeastOnce, false, payload) => {
                sent.map_err(MqttError::Client)
            }
        }
    }

    async fn request(
        &self,
        topic: fn(u64) -> String,
        payload: Vec<u8>,
    ) -> Result<TwinResponse, MqttError> {
        let rid = self.next_rid.fetch_add(1, Ordering::Relaxed);
        let pending = self.routes.expect_response(rid);
        self.publish(topic(rid), payload).await?;
        let response = pending.wait().await?;
        trace!(rid, status = response.status, "twin response");
        Ok(response)
    }
}

/// Wait for the CONNACK, then subscribe and wait for every SUBACK so no twin
/// response can arrive before its subscription.
async fn handshake(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    filters: &[String],
) -> Result<(), MqttError> {
    loop {
        match eventloop.poll().await.map_err(MqttError::Connection)? {
            Event::Incoming(Packet::ConnAck(_)) => break,
            event => trace!(?event, "waiting for connack"),
        }
    }
    for filter in filters {
        client
            .subscribe(filter.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(MqttError::Client)?;
    }
    let mut acknowledged = 0;
    while acknowledged < filters.len() {
        if let Event::Incoming(Packet::SubAck(_)) =
            eventloop.poll().await.map_err(MqttError::Connection)?
        {
            acknowledged += 1;
        }
    }
    Ok(())
}

impl Session for MqttSession {
    async fn send_event(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let topic = topics::telemetry(&self.device_id, &message);
        trace!(%topic, bytes = message.body.len(), "publishing telemetry");
        Ok(self.publish(topic, message.body).await?)
    }

    async fn retrieve_twin(&self) -> Result<TwinPatch, TransportError> {
        let response = self.request(topics::twin_get, Vec::new()).await?;
        if response.status != 200 {
            return Err(MqttError::Rejected(response.status).into());
        }
        let twin: Value =
            serde_json::from_slice(&response.body).map_err(MqttError::PayloadParse)?;
        let desired = twin.get("desired").cloned().unwrap_or(Value::Null);
        Ok(TwinPatch::from_desired(desired))
    }

    async fn update_reported(&self, patch: Map<String, Value>) -> Result<(), TransportError> {
        let body = serde_json::to_vec(&patch).map_err(MqttError::PayloadParse)?;
        let response = self.request(topics::twin_patch_reported, body).await?;
        if !(200..300).contains(&response.status) {
            return Err(MqttError::Rejected(response.status).into());
        }
        Ok(())
    }

    async fn subscribe_twin_updates(&self) -> Result<mpsc::Receiver<TwinPatch>, TransportError> {
        lock(&self.desired)
            .take()
            .ok_or_else(|| MqttError::AlreadySubscribed.into())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.client.try_disconnect() {
            debug!(device_id = %self.device_id, error = %err, "disconnect not queued");
        }
        if tokio::time::timeout(CLOSE_GRACE, self.routes.closed().cancelled())
            .await
            .is_err()
        {
            debug!(device_id = %self.device_id, "event loop still running, stopping it");
        }
        self.shutdown.cancel();
        info!(device_id = %self.device_id, "hub session closed");
        Ok(())
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
