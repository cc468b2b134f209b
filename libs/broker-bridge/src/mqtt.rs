use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, SubscribeFilter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{BrokerMessage, RelayError};

use crate::transport::{MqttClient, TransportEvent};
use crate::{BrokerConfig, Qos};

// ═══════════════════════════════════════════════════════════════
//  RumqttClient: MqttClient over rumqttc
// ═══════════════════════════════════════════════════════════════

/// `rumqttc::AsyncClient` pushes requests through its own bounded queue,
/// so concurrent callers are serialized there.
pub struct RumqttClient {
    client: AsyncClient,
}

impl RumqttClient {
    /// Build client + event loop from config. Nothing touches the network
    /// until the event loop is polled by [`spawn_event_loop`].
    pub fn new(config: &BrokerConfig) -> (Self, EventLoop) {
        let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
        opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            opts.set_credentials(user, pass);
        }
        let (client, event_loop) = AsyncClient::new(opts, config.request_capacity.max(1));
        (Self { client }, event_loop)
    }
}

impl MqttClient for RumqttClient {
    fn publish(&self, topic: &str, qos: Qos, payload: Vec<u8>) -> Result<(), RelayError> {
        self.client
            .try_publish(topic, qos.into(), false, payload)
            .map_err(|e| RelayError::Broker(format!("publish '{topic}': {e}")))
    }

    fn subscribe(&self, filter: &str, qos: Qos) -> Result<(), RelayError> {
        self.client
            .try_subscribe(filter, qos.into())
            .map_err(|e| RelayError::Broker(format!("subscribe '{filter}': {e}")))
    }

    fn subscribe_many(&self, filters: &[String], qos: Qos) -> Result<(), RelayError> {
        self.client
            .try_subscribe_many(
                filters
                    .iter()
                    .map(|f| SubscribeFilter::new(f.clone(), qos.into())),
            )
            .map_err(|e| RelayError::Broker(format!("subscribe {} filters: {e}", filters.len())))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Event loop task: rumqttc poll → TransportEvent
// ═══════════════════════════════════════════════════════════════

/// Poll the MQTT event loop until cancelled, translating what happens into
/// [`TransportEvent`]s. rumqttc reconnects on the next poll after an error;
/// this task only paces the attempts.
pub(crate) fn spawn_event_loop(
    mut event_loop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    reconnect_delay: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if events.send(TransportEvent::Connecting).await.is_err() {
            return;
        }

        loop {
            let polled = tokio::select! {
                ev = event_loop.poll() => ev,
                _ = token.cancelled() => break,
            };

            let event = match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::debug!(session_present = ack.session_present, "mqtt connack");
                    Some(TransportEvent::Connected)
                }
                Ok(Event::Incoming(Packet::Publish(p))) => Some(TransportEvent::Message(
                    BrokerMessage::new(p.topic, p.payload.to_vec()),
                )),
                Ok(Event::Incoming(packet)) => {
                    tracing::trace!(?packet, "mqtt incoming");
                    None
                }
                Ok(Event::Outgoing(outgoing)) => {
                    tracing::trace!(?outgoing, "mqtt outgoing");
                    None
                }
                Err(e) => {
                    if events
                        .send(TransportEvent::Disconnected(e.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        _ = token.cancelled() => break,
                    }
                    Some(TransportEvent::Connecting)
                }
            };

            if let Some(event) = event {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }

        tracing::info!("mqtt event loop stopped");
    })
}
