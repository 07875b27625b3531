//! mqrpc - request/response over MQTT
//!
//! A correlation-based request/response layer with flow control, built on
//! an at-least-once pub/sub transport.
//!
//! # Overview
//!
//! This crate layers RPC semantics onto plain MQTT publishes:
//! - Outbound requests carry a `request_id` and a `reply_to` topic; the
//!   caller awaits the matching response or a timeout
//! - A pending-request table correlates responses to waiters
//! - Rate limiters pace both outbound publishes and inbound processing
//! - A bounded work queue decouples the broker callback from application
//!   processing, dropping (and counting) messages rather than blocking
//!
//! # Quick Start
//!
//! ```rust
//! use mqrpc::client::RequestResponseClient;
//! use mqrpc::observability::FlowMetrics;
//! use mqrpc::protocol::{QosLevel, TopicSet};
//! use mqrpc::testing::mocks::MockTransport;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = Arc::new(MockTransport::new());
//! let client = RequestResponseClient::new(
//!     "sensor-1",
//!     transport,
//!     TopicSet::new("/mqrpc"),
//!     100.0,
//!     Arc::new(FlowMetrics::new()),
//! );
//!
//! // Fire-and-forget publish, paced by the publish limiter
//! client
//!     .send(
//!         "/mqrpc/data/telemetry",
//!         &serde_json::json!({"temp": 21.5}),
//!         QosLevel::AtMostOnce,
//!         false,
//!     )
//!     .await
//!     .unwrap();
//! # }
//! ```
//!
//! For a real broker, construct [`transport::MqttTransport`] from a
//! [`config::ServiceConfig`] and wire an [`dispatch::InboundDispatcher`]
//! plus [`dispatch::MessageProcessor`] around the client.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{PendingRequestTable, RateLimiter, RequestResponseClient};
pub use config::ServiceConfig;
pub use dispatch::{InboundDispatcher, MessageProcessor, MessageSink, RequestHandler};
pub use error::{ClientError, ClientResult};
pub use protocol::{QosLevel, ResponseEnvelope, ResponseStatus, TopicSet};
pub use transport::{MqttTransport, Transport};
