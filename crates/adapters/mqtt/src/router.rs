//! Event-loop task: routes inbound publishes to waiting twin requests and the
//! desired-patch channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use boltsim_domain::twin::TwinPatch;
use rumqttc::{Event, EventLoop, Outgoing, Packet};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::MqttError;
use crate::topics::{Inbound, parse_inbound};

pub(crate) fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Answer to a twin request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TwinResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Shared between a session and its event-loop task.
pub(crate) struct Routes {
    pending: Mutex<HashMap<u64, oneshot::Sender<TwinResponse>>>,
    desired: Mutex<Option<mpsc::Sender<TwinPatch>>>,
    closed: CancellationToken,
}

impl Routes {
    pub fn new(desired: mpsc::Sender<TwinPatch>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            desired: Mutex::new(Some(desired)),
            closed: CancellationToken::new(),
        }
    }

    /// Cancelled once the event loop stopped.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Register interest in the response to request `rid`.
    pub fn expect_response(self: &Arc<Self>, rid: u64) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(rid, tx);
        PendingResponse {
            rid,
            routes: Arc::clone(self),
            rx,
        }
    }

    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        match parse_inbound(topic) {
            Inbound::TwinResponse { status, rid } => {
                let waiter = lock(&self.pending).remove(&rid);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(TwinResponse {
                            status,
                            body: payload.to_vec(),
                        });
                    }
                    None => debug!(rid, status, "twin response without waiter"),
                }
            }
            Inbound::DesiredPatch => match serde_json::from_slice::<Value>(payload) {
                Ok(document) => self.forward_desired(TwinPatch::from_desired(document)),
                Err(err) => warn!(error = %err, "dropping unparsable desired patch"),
            },
            Inbound::CloudToDevice => debug!(bytes = payload.len(), "ignoring cloud-to-device message"),
            Inbound::Unknown => trace!(topic, "ignoring publish on unknown topic"),
        }
    }

    fn forward_desired(&self, patch: TwinPatch) {
        let sender = lock(&self.desired).clone();
        let Some(tx) = sender else {
            return;
        };
        if let Err(err) = tx.try_send(patch) {
            warn!(error = %err, "dropping desired patch");
        }
    }

    /// Fail every waiter and end the desired-patch stream.
    pub fn close(&self) {
        lock(&self.pending).clear();
        lock(&self.desired).take();
        self.closed.cancel();
    }
}

/// A registered twin request. Unregisters itself when dropped.
pub(crate) struct PendingResponse {
    rid: u64,
    routes: Arc<Routes>,
    rx: oneshot::Receiver<TwinResponse>,
}

impl PendingResponse {
    pub async fn wait(mut self) -> Result<TwinResponse, MqttError> {
        tokio::select! {
            response = &mut self.rx => response.map_err(|_| MqttError::ConnectionLost),
            () = self.routes.closed.cancelled() => Err(MqttError::ConnectionLost),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        lock(&self.routes.pending).remove(&self.rid);
    }
}

/// Drive the event loop until it fails, a disconnect goes out, or `shutdown`
/// fires.
pub(crate) async fn run(mut eventloop: EventLoop, routes: Arc<Routes>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = String::from_utf8_lossy(publish.topic.as_ref()).into_owned();
                routes.dispatch(&topic, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent");
                break;
            }
            Ok(event) => trace!(?event, "mqtt event"),
            Err(err) => {
                warn!(error = %err, "mqtt event loop stopped");
                break;
            }
        }
    }
    routes.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routes() -> (Arc<Routes>, mpsc::Receiver<TwinPatch>) {
        let (tx, rx) = mpsc::channel(4);
        (Arc::new(Routes::new(tx)), rx)
    }

    #[tokio::test]
    async fn should_deliver_twin_response_to_waiter() {
        let (routes, _rx) = routes();
        let pending = routes.expect_response(3);

        routes.dispatch("$iothub/twin/res/200/?$rid=3", br#"{"desired":{}}"#);

        let response = pending.wait().await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"desired":{}}"#.to_vec());
    }

    #[tokio::test]
    async fn should_ignore_responses_for_other_requests() {
        let (routes, _rx) = routes();
        let _pending = routes.expect_response(1);

        routes.dispatch("$iothub/twin/res/204/?$rid=2", b"");

        assert_eq!(lock(&routes.pending).len(), 1);
    }

    #[tokio::test]
    async fn should_unregister_dropped_waiters() {
        let (routes, _rx) = routes();
        drop(routes.expect_response(9));
        assert!(lock(&routes.pending).is_empty());
    }

    #[tokio::test]
    async fn should_forward_desired_patches() {
        let (routes, mut rx) = routes();
        let document = json!({"telemetryFrequency": 5, "$version": 4});

        routes.dispatch(
            "$iothub/twin/PATCH/properties/desired/?$version=4",
            document.to_string().as_bytes(),
        );

        let patch = rx.recv().await.unwrap();
        assert_eq!(patch.version, 4);
        assert_eq!(patch.properties["telemetryFrequency"], 5);
    }

    #[tokio::test]
    async fn should_fail_waiters_and_end_stream_on_close() {
        let (routes, mut rx) = routes();
        let pending = routes.expect_response(1);

        routes.close();

        assert!(matches!(pending.wait().await, Err(MqttError::ConnectionLost)));
        assert!(rx.recv().await.is_none());
        assert!(routes.closed().is_cancelled());
    }

    #[tokio::test]
    async fn should_drop_cloud_to_device_messages() {
        let (routes, mut rx) = routes();
        routes.dispatch("devices/d1/messages/devicebound/%24.mid=1", b"hello");
        assert!(rx.try_recv().is_err());
    }
}
