//! Transport abstraction for pub/sub messaging
//!
//! The request/response layer is generic over this trait so tests can run
//! against an in-memory transport while production uses MQTT.

use crate::protocol::{InboundMessage, QosLevel};
use std::time::Duration;
use tokio::sync::mpsc;

pub mod mqtt;

/// A pub/sub transport: publish, subscribe, and an inbound event stream.
///
/// Inbound messages are delivered through the sender installed with
/// [`Transport::set_message_sender`]. Implementations MUST NOT block their
/// delivery context when the channel is full; they drop the message and
/// log instead.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker/server. Resolves once the connection is
    /// actually acknowledged, not merely attempted.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect gracefully.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Publish a raw payload to a topic.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Publish with a delivery time-to-live. Transports that support
    /// broker-side expiry (MQTT v5 message expiry interval) honor it;
    /// the default ignores the hint and publishes normally.
    async fn publish_with_expiry(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
        expiry: Option<Duration>,
    ) -> Result<(), Self::Error> {
        let _ = expiry;
        self.publish(topic, payload, qos, retain).await
    }

    /// Subscribe to a topic with the given QoS.
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), Self::Error>;

    /// Install the channel that receives inbound messages.
    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>);

    /// Whether the transport currently holds an acknowledged connection.
    fn is_connected(&self) -> bool;
}

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
