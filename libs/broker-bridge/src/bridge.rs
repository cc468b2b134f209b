use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{BoxFuture, Broker, BrokerMessage, RelayError};

use crate::mqtt::{RumqttClient, spawn_event_loop};
use crate::transport::{MqttClient, TransportEvent};
use crate::{BrokerConfig, ConnectionState, Qos};

// ═══════════════════════════════════════════════════════════════
//  Shared state
// ═══════════════════════════════════════════════════════════════

struct Shared {
    client: Arc<dyn MqttClient>,
    qos: Qos,
    state: watch::Receiver<ConnectionState>,
    /// The lock is held while subscriptions are (re-)issued so a reconnect
    /// and a concurrent subscribe never both send the same filter.
    subscriptions: Mutex<Subscriptions>,
    inbound: broadcast::Sender<BrokerMessage>,
}

#[derive(Default)]
struct Subscriptions {
    /// Every filter the broker should know about.
    wanted: BTreeSet<String>,
    /// Filters issued on the current session. A filter missing here is
    /// sent again by the next `subscribe`.
    active: BTreeSet<String>,
}

// ═══════════════════════════════════════════════════════════════
//  BrokerBridge
// ═══════════════════════════════════════════════════════════════

/// Filters per SUBSCRIBE packet when a session is restored.
const RESTORE_BATCH: usize = 32;

/// Owns the bridge tasks. Hand out [`BrokerHandle`]s to everything else.
pub struct BrokerBridge {
    handle: BrokerHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl BrokerBridge {
    /// Connect to the broker described by `config`. Returns immediately;
    /// the connection is established (and re-established) in the background.
    pub fn connect(config: &BrokerConfig, token: CancellationToken) -> Self {
        let (client, event_loop) = RumqttClient::new(config);
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));

        let driver = spawn_event_loop(
            event_loop,
            events_tx,
            Duration::from_millis(config.reconnect_delay_ms),
            token.clone(),
        );

        let mut bridge = Self::with_transport(
            Arc::new(client),
            events_rx,
            config.startup_topics.clone(),
            config.qos,
            config.channel_capacity,
            token,
        );
        bridge.tasks.push(driver);
        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            startup_topics = ?config.startup_topics,
            "broker bridge started"
        );
        bridge
    }

    /// Run the bridge core over an arbitrary transport.
    pub fn with_transport(
        client: Arc<dyn MqttClient>,
        events: mpsc::Receiver<TransportEvent>,
        startup_topics: Vec<String>,
        qos: Qos,
        channel_capacity: usize,
        token: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (inbound, _) = broadcast::channel(channel_capacity.max(1));

        let shared = Arc::new(Shared {
            client,
            qos,
            state: state_rx,
            subscriptions: Mutex::new(Subscriptions {
                wanted: startup_topics.into_iter().filter(|t| !t.is_empty()).collect(),
                active: BTreeSet::new(),
            }),
            inbound,
        });

        let core = tokio::spawn(run_core(shared.clone(), events, state_tx, token));

        Self {
            handle: BrokerHandle { shared },
            tasks: vec![core],
        }
    }

    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    /// Wait for the bridge tasks to finish (after cancellation).
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn run_core(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            _ = token.cancelled() => break,
        };

        match event {
            TransportEvent::Connecting => {
                state_tx.send_replace(ConnectionState::Connecting);
                tracing::info!("connecting to broker");
            }
            TransportEvent::Connected => {
                let mut subs = shared.subscriptions.lock().await;
                subs.active.clear();
                let filters: Vec<String> = subs.wanted.iter().cloned().collect();
                for batch in filters.chunks(RESTORE_BATCH) {
                    match shared.client.subscribe_many(batch, shared.qos) {
                        Ok(()) => subs.active.extend(batch.iter().cloned()),
                        Err(e) => tracing::warn!(
                            topics = batch.len(),
                            error = %e,
                            "restoring subscriptions failed, each is re-sent on its next subscribe"
                        ),
                    }
                }
                state_tx.send_replace(ConnectionState::Connected);
                tracing::info!(
                    topics = subs.active.len(),
                    "broker connected, subscriptions restored"
                );
            }
            TransportEvent::Disconnected(reason) => {
                shared.subscriptions.lock().await.active.clear();
                state_tx.send_replace(ConnectionState::Disconnected);
                tracing::warn!(%reason, "broker connection lost");
            }
            TransportEvent::Message(msg) => {
                tracing::debug!(
                    topic = %msg.topic,
                    payload = %msg.payload_text(),
                    "broker message"
                );
                // No receivers just means no client is listening right now.
                let _ = shared.inbound.send(msg);
            }
        }
    }

    state_tx.send_replace(ConnectionState::Disconnected);
    tracing::info!("broker bridge stopped");
}

// ═══════════════════════════════════════════════════════════════
//  BrokerHandle
// ═══════════════════════════════════════════════════════════════

/// Cheap, cloneable access to the single broker connection.
#[derive(Clone)]
pub struct BrokerHandle {
    shared: Arc<Shared>,
}

impl BrokerHandle {
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// The inbound broadcast sender, for consumers that create their own
    /// receivers later (one per client connection).
    pub fn inbound(&self) -> broadcast::Sender<BrokerMessage> {
        self.shared.inbound.clone()
    }

    fn ensure_connected(&self) -> Result<(), RelayError> {
        if self.state().is_connected() {
            Ok(())
        } else {
            Err(RelayError::NotConnected)
        }
    }
}

impl Broker for BrokerHandle {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), RelayError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if topic.is_empty() {
                return Err(RelayError::MalformedCommand("empty topic".into()));
            }
            self.ensure_connected()?;
            self.shared.client.publish(&topic, self.shared.qos, payload)?;
            tracing::debug!(%topic, "published");
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<(), RelayError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if topic.is_empty() {
                return Err(RelayError::MalformedCommand("empty topic".into()));
            }
            let mut subs = self.shared.subscriptions.lock().await;
            self.ensure_connected()?;
            if subs.active.contains(&topic) {
                return Ok(());
            }
            self.shared.client.subscribe(&topic, self.shared.qos)?;
            tracing::info!(%topic, "subscribed");
            subs.wanted.insert(topic.clone());
            subs.active.insert(topic);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Publish(String, Vec<u8>),
        Subscribe(String),
        SubscribeMany(Vec<String>),
    }

    /// Records requests. `subscribe_budget` limits how many more
    /// subscribe requests are accepted (`None` = unlimited), like a full
    /// request queue.
    #[derive(Default)]
    struct FakeClient {
        calls: std::sync::Mutex<Vec<Call>>,
        subscribe_budget: std::sync::Mutex<Option<usize>>,
    }

    impl FakeClient {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn set_budget(&self, budget: Option<usize>) {
            *self.subscribe_budget.lock().unwrap() = budget;
        }

        fn take_budget(&self) -> Result<(), RelayError> {
            let mut budget = self.subscribe_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => Err(RelayError::Broker("request queue full".into())),
                Some(n) => {
                    *n -= 1;
                    Ok(())
                }
                None => Ok(()),
            }
        }

        fn subscribe_count(&self, filter: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| match c {
                    Call::Subscribe(f) => f == filter,
                    Call::SubscribeMany(fs) => fs.iter().any(|f| f == filter),
                    Call::Publish(..) => false,
                })
                .count()
        }
    }

    impl MqttClient for FakeClient {
        fn publish(&self, topic: &str, _qos: Qos, payload: Vec<u8>) -> Result<(), RelayError> {
            self.calls.lock().unwrap().push(Call::Publish(topic.into(), payload));
            Ok(())
        }

        fn subscribe(&self, filter: &str, _qos: Qos) -> Result<(), RelayError> {
            self.take_budget()?;
            self.calls.lock().unwrap().push(Call::Subscribe(filter.into()));
            Ok(())
        }

        fn subscribe_many(&self, filters: &[String], _qos: Qos) -> Result<(), RelayError> {
            self.take_budget()?;
            self.calls.lock().unwrap().push(Call::SubscribeMany(filters.to_vec()));
            Ok(())
        }
    }

    struct Rig {
        client: Arc<FakeClient>,
        events: mpsc::Sender<TransportEvent>,
        handle: BrokerHandle,
        token: CancellationToken,
    }

    fn rig_with(startup: Vec<String>) -> Rig {
        let client = Arc::new(FakeClient::default());
        let (events, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let bridge = BrokerBridge::with_transport(
            client.clone(),
            rx,
            startup,
            Qos::AtLeastOnce,
            16,
            token.clone(),
        );
        Rig {
            client,
            events,
            handle: bridge.handle(),
            token,
        }
    }

    fn rig() -> Rig {
        rig_with(vec!["p2penergy/test".into(), "p2penergy/photon/events".into()])
    }

    async fn wait_state(handle: &BrokerHandle, want: ConnectionState) {
        let mut rx = handle.shared.state.clone();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("state timeout")
            .expect("bridge gone");
    }

    async fn connect(rig: &Rig) {
        rig.events.send(TransportEvent::Connecting).await.unwrap();
        rig.events.send(TransportEvent::Connected).await.unwrap();
        wait_state(&rig.handle, ConnectionState::Connected).await;
    }

    async fn disconnect(rig: &Rig) {
        rig.events
            .send(TransportEvent::Disconnected("reset".into()))
            .await
            .unwrap();
        wait_state(&rig.handle, ConnectionState::Disconnected).await;
    }

    async fn wanted(handle: &BrokerHandle) -> Vec<String> {
        let subs = handle.shared.subscriptions.lock().await;
        subs.wanted.iter().cloned().collect()
    }

    #[tokio::test]
    async fn operations_fail_fast_when_not_connected() {
        let rig = rig();
        assert_eq!(rig.handle.state(), ConnectionState::Disconnected);
        assert_eq!(
            rig.handle.publish("a", b"x".to_vec()).await,
            Err(RelayError::NotConnected)
        );
        assert_eq!(rig.handle.subscribe("a").await, Err(RelayError::NotConnected));
        assert!(rig.client.calls().is_empty());
        rig.token.cancel();
    }

    #[tokio::test]
    async fn startup_topics_restored_in_one_request() {
        let rig = rig();
        connect(&rig).await;
        assert_eq!(
            rig.client.calls(),
            vec![Call::SubscribeMany(vec![
                "p2penergy/photon/events".into(),
                "p2penergy/test".into()
            ])]
        );
        rig.token.cancel();
    }

    #[tokio::test]
    async fn large_subscription_sets_are_restored_in_batches() {
        let topics: Vec<String> = (0..100).map(|i| format!("t/{i:03}")).collect();
        let rig = rig_with(topics.clone());
        connect(&rig).await;

        let batches = rig.client.calls();
        assert_eq!(batches.len(), 100usize.div_ceil(RESTORE_BATCH));
        for topic in &topics {
            assert_eq!(rig.client.subscribe_count(topic), 1, "{topic}");
        }
        rig.handle.subscribe("t/099").await.unwrap();
        assert_eq!(rig.client.subscribe_count("t/099"), 1);
        rig.token.cancel();
    }

    #[tokio::test]
    async fn publish_forwards_exactly_once() {
        let rig = rig();
        connect(&rig).await;
        rig.handle.publish("room/1", b"on".to_vec()).await.unwrap();

        let publishes: Vec<Call> = rig
            .client
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Publish(..)))
            .collect();
        assert_eq!(publishes, vec![Call::Publish("room/1".into(), b"on".to_vec())]);
        rig.token.cancel();
    }

    #[tokio::test]
    async fn repeated_subscribe_is_idempotent() {
        let rig = rig();
        connect(&rig).await;
        for _ in 0..5 {
            rig.handle.subscribe("room/+").await.unwrap();
        }
        rig.handle.subscribe("p2penergy/test").await.unwrap();

        assert_eq!(rig.client.subscribe_count("room/+"), 1);
        assert_eq!(rig.client.subscribe_count("p2penergy/test"), 1);
        rig.token.cancel();
    }

    #[tokio::test]
    async fn reconnect_restores_every_subscription_once() {
        let rig = rig();
        connect(&rig).await;
        rig.handle.subscribe("room/1").await.unwrap();

        disconnect(&rig).await;
        assert_eq!(
            rig.handle.publish("room/1", b"x".to_vec()).await,
            Err(RelayError::NotConnected)
        );

        connect(&rig).await;
        for filter in ["p2penergy/test", "p2penergy/photon/events", "room/1"] {
            assert_eq!(rig.client.subscribe_count(filter), 2, "{filter}");
        }
        assert_eq!(
            wanted(&rig.handle).await,
            vec!["p2penergy/photon/events", "p2penergy/test", "room/1"]
        );
        rig.token.cancel();
    }

    #[tokio::test]
    async fn failed_restore_is_resent_on_next_subscribe() {
        let rig = rig();
        rig.client.set_budget(Some(0));
        connect(&rig).await;
        assert!(rig.client.calls().is_empty());

        rig.client.set_budget(None);
        rig.handle.subscribe("p2penergy/test").await.unwrap();
        rig.handle.subscribe("p2penergy/test").await.unwrap();
        assert_eq!(
            rig.client.calls(),
            vec![Call::Subscribe("p2penergy/test".into())]
        );

        // Still wanted, so the next session restores it.
        disconnect(&rig).await;
        connect(&rig).await;
        assert_eq!(rig.client.subscribe_count("p2penergy/photon/events"), 1);
        assert_eq!(rig.client.subscribe_count("p2penergy/test"), 2);
        rig.token.cancel();
    }

    #[tokio::test]
    async fn rejected_subscribe_is_not_remembered() {
        let rig = rig_with(Vec::new());
        connect(&rig).await;
        rig.client.set_budget(Some(1));
        rig.handle.subscribe("room/1").await.unwrap();

        assert!(matches!(
            rig.handle.subscribe("room/2").await,
            Err(RelayError::Broker(_))
        ));
        assert_eq!(wanted(&rig.handle).await, vec!["room/1"]);

        rig.client.set_budget(None);
        rig.handle.subscribe("room/2").await.unwrap();
        assert_eq!(rig.client.subscribe_count("room/2"), 1);
        rig.token.cancel();
    }

    #[tokio::test]
    async fn inbound_messages_fan_out_in_order() {
        let rig = rig();
        let mut a = rig.handle.inbound().subscribe();
        let mut b = rig.handle.inbound().subscribe();
        connect(&rig).await;

        for i in 0..3u8 {
            rig.events
                .send(TransportEvent::Message(BrokerMessage::new("t", vec![i])))
                .await
                .unwrap();
        }

        for rx in [&mut a, &mut b] {
            for i in 0..3u8 {
                let msg = rx.recv().await.unwrap();
                assert_eq!(msg, BrokerMessage::new("t", vec![i]));
            }
        }
        rig.token.cancel();
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let rig = rig();
        connect(&rig).await;
        assert!(matches!(
            rig.handle.publish("", b"x".to_vec()).await,
            Err(RelayError::MalformedCommand(_))
        ));
        rig.token.cancel();
    }
}
