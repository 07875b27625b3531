//! MQTT transport built on rumqttc (MQTT v5)

pub mod client;
pub mod connection;

pub use client::MqttTransport;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
