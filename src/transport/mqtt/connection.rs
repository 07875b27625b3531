//! Connection state, reconnect policy, and MQTT option construction

use crate::config::BrokerSection;
use crate::protocol::{PresenceMessage, QosLevel, TopicSet};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for the MQTT transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Attempting initial connection
    Connecting,
    /// Connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

impl ConnectionState {
    /// Publishes and subscribes are only permitted while connected.
    pub fn can_operate(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Reconnection policy
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff delays in milliseconds, indexed by attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
    /// How long to wait for a ConnAck before giving up on connect()
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectConfig {
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        match self.backoff_pattern.get(index) {
            Some(delay) => *delay,
            None => self.sustained_delay,
        }
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

pub(crate) fn to_rumqttc_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub(crate) fn from_rumqttc_qos(qos: QoS) -> QosLevel {
    match qos {
        QoS::AtMostOnce => QosLevel::AtMostOnce,
        QoS::AtLeastOnce => QosLevel::AtLeastOnce,
        QoS::ExactlyOnce => QosLevel::ExactlyOnce,
    }
}

/// Build rumqttc options from the broker config.
///
/// The connection-unique client id suffix prevents broker-side session
/// conflicts when a reconnect races the old session's expiry. The last
/// will announces `online: false` on the status topic so peers observe
/// ungraceful disconnects.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &BrokerSection,
    credentials: Option<(String, String)>,
    topics: &TopicSet,
) -> Result<MqttOptions, MqttError> {
    let url =
        Url::parse(&config.url).map_err(|_| MqttError::InvalidBrokerUrl(config.url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let connection_id = format!("{client_id}-{}", &suffix[..8]);
    let mut options = MqttOptions::new(connection_id, host, port);

    if url.scheme() == "mqtts" {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = credentials {
        options.set_credentials(username, password);
    }

    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    let offline = PresenceMessage::new(client_id, false);
    let lwt_payload = serde_json::to_string(&offline).map_err(MqttError::Serialization)?;
    let lwt = LastWill::new(
        topics.status_topic(client_id),
        lwt_payload,
        QoS::AtLeastOnce,
        true,
        None,
    );
    options.set_last_will(lwt);

    Ok(options)
}
