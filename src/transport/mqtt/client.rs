//! rumqttc-backed transport with reconnection supervision
//!
//! One spawned task owns the rumqttc event loop. Inbound publishes are
//! forwarded to the dispatcher channel with `try_send`; the event loop
//! task never blocks on a slow consumer.

use super::connection::{
    configure_mqtt_options, from_rumqttc_qos, to_rumqttc_qos, ConnectionState, MqttError,
    ReconnectConfig,
};
use crate::config::BrokerSection;
use crate::protocol::{InboundMessage, PresenceMessage, QosLevel, TopicSet};
use crate::transport::Transport;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// MQTT transport for the request/response layer
pub struct MqttTransport {
    client_id: String,
    broker: BrokerSection,
    topics: TopicSet,
    credentials: Option<(String, String)>,
    client: Arc<Mutex<AsyncClient>>,
    // Parked here between new() and connect(); EventLoop itself is !Sync,
    // so it lives behind a mutex until the supervisor task takes it
    event_loop: StdMutex<Option<EventLoop>>,
    event_loop_handle: Option<JoinHandle<()>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect: ReconnectConfig,
    subscriptions: Arc<Mutex<Vec<(String, QosLevel)>>>,
    inbound_tx: Arc<StdMutex<Option<mpsc::Sender<InboundMessage>>>>,
}

impl MqttTransport {
    pub fn new(
        client_id: &str,
        broker: BrokerSection,
        credentials: Option<(String, String)>,
        topics: TopicSet,
    ) -> Result<Self, MqttError> {
        let options = configure_mqtt_options(client_id, &broker, credentials.clone(), &topics)?;
        let (client, event_loop) = AsyncClient::new(options, 10);

        Ok(Self {
            client_id: client_id.to_string(),
            broker,
            topics,
            credentials,
            client: Arc::new(Mutex::new(client)),
            event_loop: StdMutex::new(Some(event_loop)),
            event_loop_handle: None,
            state_tx: None,
            state_rx: None,
            shutdown_tx: None,
            reconnect: ReconnectConfig::default(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            inbound_tx: Arc::new(StdMutex::new(None)),
        })
    }

    pub fn with_reconnect_config(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    fn check_connected(&self) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client was never connected".to_string())
        })?;

        let state = state_rx.borrow().clone();
        if !state.can_operate() {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    /// Block until the state channel reports Connected, or fail on
    /// disconnect/timeout. Connecting/Reconnecting states are waited out.
    async fn wait_for_connack(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match &*state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "No ConnAck within connect timeout".to_string(),
            )),
        }
    }

    /// Sleep that aborts early on shutdown. Returns false if shutdown fired.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Forward an inbound publish without ever blocking the event loop.
    fn forward_publish(
        inbound_tx: &StdMutex<Option<mpsc::Sender<InboundMessage>>>,
        publish: rumqttc::v5::mqttbytes::v5::Publish,
    ) {
        let topic = String::from_utf8_lossy(&publish.topic).to_string();
        let message = InboundMessage {
            topic: topic.clone(),
            payload: Bytes::from(publish.payload.to_vec()),
            qos: from_rumqttc_qos(publish.qos),
            retained: publish.retain,
        };

        let guard = match inbound_tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(sender) => match sender.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(topic = %topic, "Inbound channel full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(topic = %topic, "Inbound channel closed, dropping message");
                }
            },
            None => {
                debug!(topic = %topic, "No message sender installed, dropping message");
            }
        }
    }

    async fn resubscribe(client: &Arc<Mutex<AsyncClient>>, subs: &Arc<Mutex<Vec<(String, QosLevel)>>>) {
        let topics = subs.lock().await.clone();
        let client_guard = client.lock().await;
        for (topic, qos) in topics {
            if let Err(e) = client_guard.subscribe(&topic, to_rumqttc_qos(qos)).await {
                error!(topic = %topic, "Failed to re-subscribe: {e}");
            } else {
                debug!(topic = %topic, "Subscribed");
            }
        }
    }

    /// Backoff, then swap in a fresh connection. Returns false when the
    /// supervisor should stop (shutdown or attempts exhausted).
    #[allow(clippy::too_many_arguments)]
    async fn attempt_reconnect(
        attempts: &mut u32,
        reconnect: &ReconnectConfig,
        shutdown_rx: watch::Receiver<bool>,
        state_tx: &watch::Sender<ConnectionState>,
        event_loop: &mut EventLoop,
        client_id: &str,
        broker: &BrokerSection,
        credentials: &Option<(String, String)>,
        topics: &TopicSet,
        shared_client: &Arc<Mutex<AsyncClient>>,
    ) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }
        if reconnect.attempts_exhausted(*attempts) {
            let reason = format!("Max reconnection attempts ({}) exceeded", *attempts);
            let _ = state_tx.send(ConnectionState::PermanentlyDisconnected(reason));
            return false;
        }

        *attempts += 1;
        let delay_ms = reconnect.backoff_delay(*attempts);
        let _ = state_tx.send(ConnectionState::Reconnecting(*attempts));
        info!(attempt = *attempts, delay_ms, "Attempting reconnection");

        if !Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
            return false;
        }
        if *shutdown_rx.borrow() {
            return false;
        }

        match configure_mqtt_options(client_id, broker, credentials.clone(), topics) {
            Ok(options) => {
                let (new_client, new_event_loop) = AsyncClient::new(options, 10);
                *event_loop = new_event_loop;
                *shared_client.lock().await = new_client;
                true
            }
            Err(e) => {
                error!("Failed to rebuild connection options: {e}");
                true
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for MqttTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let parked = {
            let mut guard = match self.event_loop.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        let mut event_loop = parked.ok_or_else(|| {
            MqttError::ConnectionFailedStr("Event loop already started".to_string())
        })?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.state_tx = Some(state_tx.clone());
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let client_id = self.client_id.clone();
        let broker = self.broker.clone();
        let credentials = self.credentials.clone();
        let topics = self.topics.clone();
        let reconnect = self.reconnect.clone();
        let shared_client = self.client.clone();
        let subscriptions = self.subscriptions.clone();
        let inbound_tx = self.inbound_tx.clone();

        let handle = tokio::spawn(async move {
            info!(client_id = %client_id, "Starting MQTT event loop");
            let mut attempts = 0u32;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping event loop");
                            break;
                        }
                    }
                    polled = event_loop.poll() => {
                        match polled {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                let _ = state_tx.send(ConnectionState::Connected);
                                attempts = 0;
                                Self::resubscribe(&shared_client, &subscriptions).await;
                            }
                            Ok(Event::Incoming(Packet::Publish(publish))) => {
                                Self::forward_publish(&inbound_tx, publish);
                            }
                            Ok(Event::Incoming(Packet::Disconnect(_))) => {
                                let _ = state_tx.send(ConnectionState::Disconnected(
                                    "Disconnected by broker".to_string(),
                                ));
                                if !Self::attempt_reconnect(
                                    &mut attempts, &reconnect, shutdown_rx.clone(), &state_tx,
                                    &mut event_loop, &client_id, &broker, &credentials,
                                    &topics, &shared_client,
                                ).await {
                                    break;
                                }
                            }
                            Ok(event) => {
                                debug!(target: "mqtt_transport", "MQTT event: {event:?}");
                            }
                            Err(e) => {
                                error!(client_id = %client_id, "MQTT event loop error: {e}");
                                let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                                if !Self::attempt_reconnect(
                                    &mut attempts, &reconnect, shutdown_rx.clone(), &state_tx,
                                    &mut event_loop, &client_id, &broker, &credentials,
                                    &topics, &shared_client,
                                ).await {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            info!(client_id = %client_id, "MQTT event loop stopped");
        });
        self.event_loop_handle = Some(handle);

        Self::wait_for_connack(state_rx, self.reconnect.connect_timeout).await?;

        // Announce presence now that the last will is armed
        let online = PresenceMessage::new(&self.client_id, true);
        let payload = serde_json::to_vec(&online).map_err(MqttError::Serialization)?;
        self.publish(
            &self.topics.status_topic(&self.client_id),
            payload,
            QosLevel::AtLeastOnce,
            true,
        )
        .await?;

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        // Best-effort graceful offline announcement, replacing the
        // retained online presence before the will becomes irrelevant
        let offline = PresenceMessage::new(&self.client_id, false);
        if let Ok(payload) = serde_json::to_vec(&offline) {
            let _ = self
                .publish(
                    &self.topics.status_topic(&self.client_id),
                    payload,
                    QosLevel::AtLeastOnce,
                    true,
                )
                .await;
        }

        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        {
            let client = self.client.lock().await;
            client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Event loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop ended with error: {e}"),
                Err(_) => warn!("Event loop did not stop in time, aborting"),
                _ => {}
            }
        }

        info!(client_id = %self.client_id, "MQTT transport disconnected");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), Self::Error> {
        self.check_connected()?;

        let client = self.client.lock().await;
        client
            .publish(topic, to_rumqttc_qos(qos), retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
        Ok(())
    }

    async fn publish_with_expiry(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
        expiry: Option<Duration>,
    ) -> Result<(), Self::Error> {
        self.check_connected()?;

        let properties = PublishProperties {
            // v5 expiry is whole seconds; anything sub-second rounds up
            // so the broker never expires faster than the caller asked
            message_expiry_interval: expiry.map(|ttl| ttl.as_secs_f64().ceil() as u32),
            ..Default::default()
        };

        let client = self.client.lock().await;
        client
            .publish_with_properties(topic, to_rumqttc_qos(qos), retain, payload, properties)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), Self::Error> {
        // Record first so a reconnect (or the initial ConnAck) replays it
        {
            let mut subs = self.subscriptions.lock().await;
            if !subs.iter().any(|(t, _)| t == topic) {
                subs.push((topic.to_string(), qos));
            }
        }

        if self.check_connected().is_ok() {
            let client = self.client.lock().await;
            client
                .subscribe(topic, to_rumqttc_qos(qos))
                .await
                .map_err(|e| {
                    MqttError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}"))
                })?;
            info!(topic = %topic, "Subscribed");
        }

        Ok(())
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        let mut guard = match self.inbound_tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(sender);
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_transport() -> MqttTransport {
        let broker = BrokerSection {
            url: "mqtt://localhost:1883".to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 60,
        };
        MqttTransport::new("test-client", broker, None, TopicSet::new("/mqrpc")).unwrap()
    }

    #[test]
    fn test_transport_is_send_and_sync() {
        // The client layer shares the transport across tasks via Arc
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MqttTransport>();
    }

    #[test]
    fn test_state_is_none_before_connect() {
        let transport = test_transport();
        assert!(transport.connection_state().is_none());
        assert!(!transport.is_connected());
        assert!(!transport.is_permanently_disconnected());
    }

    #[tokio::test]
    async fn test_publish_fails_without_connection() {
        let transport = test_transport();
        let result = transport
            .publish("/mqrpc/data/x", b"{}".to_vec(), QosLevel::AtLeastOnce, false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_recorded() {
        let transport = test_transport();
        transport
            .subscribe("/mqrpc/requests", QosLevel::AtLeastOnce)
            .await
            .unwrap();
        transport
            .subscribe("/mqrpc/requests", QosLevel::AtLeastOnce)
            .await
            .unwrap();

        let subs = transport.subscriptions.lock().await;
        assert_eq!(subs.len(), 1, "Duplicate subscriptions are collapsed");
        assert_eq!(subs[0].0, "/mqrpc/requests");
    }

    #[tokio::test]
    async fn test_wait_for_connack_success() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        let result =
            MqttTransport::wait_for_connack(state_rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connack_timeout() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        // Keep the sender alive without ever confirming
        let _guard = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(state_tx);
        });

        let result =
            MqttTransport::wait_for_connack(state_rx, Duration::from_millis(20)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_connack_disconnected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            let _ = state_tx.send(ConnectionState::Disconnected("refused".to_string()));
        });

        let result =
            MqttTransport::wait_for_connack(state_rx, Duration::from_millis(200)).await;
        assert!(result.unwrap_err().to_string().contains("refused"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(MqttTransport::interruptible_sleep(shutdown_rx.clone(), 5).await);

        tokio::spawn(async move {
            let _ = shutdown_tx.send(true);
        });
        assert!(!MqttTransport::interruptible_sleep(shutdown_rx, 500).await);
    }

    #[test]
    fn test_forward_publish_drops_when_full() {
        use rumqttc::v5::mqttbytes::v5::Publish;
        use rumqttc::v5::mqttbytes::QoS;

        let (tx, mut rx) = mpsc::channel(1);
        let inbound_tx = StdMutex::new(Some(tx));

        let make_publish = || Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: bytes::Bytes::from_static(b"/mqrpc/data/t"),
            pkid: 0,
            payload: bytes::Bytes::from_static(b"{}"),
            properties: None,
        };

        MqttTransport::forward_publish(&inbound_tx, make_publish());
        // Channel now full; second forward is dropped, not blocked
        MqttTransport::forward_publish(&inbound_tx, make_publish());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
