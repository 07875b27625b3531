//! Mock implementations for testing without a broker
//!
//! `MockTransport` records every publish and lets tests inject inbound
//! messages, standing in for the full MQTT stack. `RecordingSink` and
//! `StaticResponder` are the application-side counterparts.

use crate::dispatch::{MessageSink, RequestHandler};
use crate::protocol::{InboundMessage, QosLevel};
use crate::transport::Transport;
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};

#[derive(Debug, Error)]
pub enum MockTransportError {
    #[error("mock transport forced failure")]
    Forced,
    #[error("no message sender installed")]
    NoSender,
}

/// A publish recorded by the mock transport
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub retain: bool,
    /// Delivery TTL, when published through `publish_with_expiry`
    pub expiry: Option<Duration>,
}

/// In-memory transport for tests
#[derive(Default)]
pub struct MockTransport {
    published_messages: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QosLevel)>>,
    should_fail: AtomicBool,
    connected: AtomicBool,
    inbound_tx: StdMutex<Option<mpsc::Sender<InboundMessage>>>,
    publish_notify: Notify,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose connect/publish/subscribe all fail.
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.should_fail.store(true, Ordering::SeqCst);
        transport
    }

    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<(String, QosLevel)> {
        self.subscriptions.lock().await.clone()
    }

    /// Block until at least `count` messages have been published.
    pub async fn wait_for_publishes(&self, count: usize) -> Vec<PublishedMessage> {
        loop {
            let current = self.published_messages.lock().await.clone();
            if current.len() >= count {
                return current;
            }
            drop(current);
            self.publish_notify.notified().await;
        }
    }

    /// Inject an inbound message as if the broker delivered it.
    pub async fn inject(&self, topic: &str, payload: Vec<u8>) -> Result<(), MockTransportError> {
        self.inject_full(InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from(payload),
            qos: QosLevel::AtLeastOnce,
            retained: false,
        })
        .await
    }

    pub async fn inject_json(
        &self,
        topic: &str,
        value: &Value,
    ) -> Result<(), MockTransportError> {
        let payload = serde_json::to_vec(value).expect("test payload serializes");
        self.inject(topic, payload).await
    }

    pub async fn inject_full(&self, message: InboundMessage) -> Result<(), MockTransportError> {
        let sender = {
            let guard = match self.inbound_tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        match sender {
            Some(sender) => sender
                .send(message)
                .await
                .map_err(|_| MockTransportError::NoSender),
            None => Err(MockTransportError::NoSender),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::Forced);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::Forced);
        }

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            expiry: None,
        });
        self.publish_notify.notify_waiters();
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
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::Forced);
        }

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            expiry,
        });
        self.publish_notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::Forced);
        }
        self.subscriptions
            .lock()
            .await
            .push((topic.to_string(), qos));
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
        self.connected.load(Ordering::SeqCst)
    }
}

/// Sink that records everything it receives
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(String, Value)>>,
    raw: Mutex<Vec<(String, Bytes)>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivered(&self) -> Vec<(String, Value)> {
        self.delivered.lock().await.clone()
    }

    pub async fn raw(&self) -> Vec<(String, Bytes)> {
        self.raw.lock().await.clone()
    }

    /// Block until `count` parsed messages have been delivered.
    pub async fn wait_for_delivered(&self, count: usize) -> Vec<(String, Value)> {
        loop {
            let current = self.delivered.lock().await.clone();
            if current.len() >= count {
                return current;
            }
            drop(current);
            self.notify.notified().await;
        }
    }
}

#[async_trait::async_trait]
impl MessageSink for RecordingSink {
    async fn deliver(&self, topic: &str, message: Value) {
        self.delivered
            .lock()
            .await
            .push((topic.to_string(), message));
        self.notify.notify_waiters();
    }

    async fn deliver_raw(&self, topic: &str, payload: Bytes) {
        self.raw.lock().await.push((topic.to_string(), payload));
        self.notify.notify_waiters();
    }
}

/// Request handler returning a canned value (or a canned failure)
pub struct StaticResponder {
    response: Value,
    failure: Option<String>,
    received: Arc<Mutex<Vec<Value>>>,
}

impl StaticResponder {
    pub fn new(response: Value) -> Self {
        Self {
            response,
            failure: None,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Value::Null,
            failure: Some(message.to_string()),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn received(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl RequestHandler for StaticResponder {
    async fn handle(
        &self,
        request: Value,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        self.received.lock().await.push(request);
        match &self.failure {
            Some(message) => Err(message.clone().into()),
            None => Ok(self.response.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_records_publishes() {
        let transport = MockTransport::new();
        transport
            .publish("/t", b"x".to_vec(), QosLevel::AtMostOnce, false)
            .await
            .unwrap();

        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "/t");
    }

    #[tokio::test]
    async fn test_failing_mock_rejects_everything() {
        let mut transport = MockTransport::failing();
        assert!(transport.connect().await.is_err());
        assert!(transport
            .publish("/t", vec![], QosLevel::AtMostOnce, false)
            .await
            .is_err());
        assert!(transport.subscribe("/t", QosLevel::AtMostOnce).await.is_err());
    }

    #[tokio::test]
    async fn test_inject_flows_to_installed_sender() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        transport.set_message_sender(tx);

        transport
            .inject_json("/t", &json!({"hello": "world"}))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "/t");
    }

    #[tokio::test]
    async fn test_inject_without_sender_errors() {
        let transport = MockTransport::new();
        let result = transport.inject("/t", vec![]).await;
        assert!(matches!(result, Err(MockTransportError::NoSender)));
    }
}
