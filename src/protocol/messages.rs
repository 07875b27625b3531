//! Wire-level message types
//!
//! Requests are open JSON objects; the client only imposes three well-known
//! field names: `request_id` (correlation), `reply_to` (where the responder
//! should publish), and `expiry` (application-level unix-seconds deadline
//! checked by the processor before delivery).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

/// Field carrying the correlation id in request and response payloads.
pub const REQUEST_ID_FIELD: &str = "request_id";
/// Field naming the topic a responder should publish its response to.
pub const REPLY_TO_FIELD: &str = "reply_to";
/// Optional unix-seconds deadline after which a message is stale.
pub const EXPIRY_FIELD: &str = "expiry";

/// Transport delivery guarantee level.
///
/// Request publishes always use [`QosLevel::AtLeastOnce`]: correlation
/// correctness depends on the request actually reaching a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    /// QoS 0 - fire and forget
    AtMostOnce,
    /// QoS 1 - delivered at least once, may duplicate
    AtLeastOnce,
    /// QoS 2 - delivered exactly once
    ExactlyOnce,
}

impl QosLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// Outcome status carried in a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Response envelope published by a responder, echoing the request's
/// correlation id.
///
/// ```
/// use mqrpc::protocol::{ResponseEnvelope, ResponseStatus};
/// use uuid::Uuid;
/// use serde_json::json;
///
/// let response = ResponseEnvelope::success(Uuid::new_v4(), json!({"state": "idle"}));
/// assert_eq!(response.status, ResponseStatus::Success);
/// let wire = serde_json::to_string(&response).unwrap();
/// assert!(wire.contains("request_id"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    /// Correlation id copied from the request
    pub request_id: Uuid,
    pub status: ResponseStatus,
    /// Unix seconds at which the responder produced this
    pub timestamp: f64,
    /// Responder-defined result payload
    pub data: Value,
}

impl ResponseEnvelope {
    pub fn success(request_id: Uuid, data: Value) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Success,
            timestamp: unix_now(),
            data,
        }
    }

    pub fn error(request_id: Uuid, message: &str) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Error,
            timestamp: unix_now(),
            data: serde_json::json!({ "message": message }),
        }
    }
}

/// Presence message published to the status topic, and registered as the
/// last will so the broker announces ungraceful disconnects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceMessage {
    pub client_id: String,
    pub online: bool,
    /// Unix seconds
    pub timestamp: f64,
}

impl PresenceMessage {
    pub fn new(client_id: &str, online: bool) -> Self {
        Self {
            client_id: client_id.to_string(),
            online,
            timestamp: unix_now(),
        }
    }
}

/// A message as delivered by the transport's inbound event stream.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retained: bool,
}

/// An inbound message parked on the bounded work queue between the
/// dispatcher and the processor. Owned exclusively by the queue from
/// enqueue to dequeue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: Instant,
    pub qos: QosLevel,
    pub retained: bool,
}

impl From<InboundMessage> for QueuedMessage {
    fn from(msg: InboundMessage) -> Self {
        Self {
            topic: msg.topic,
            payload: msg.payload,
            received_at: Instant::now(),
            qos: msg.qos,
            retained: msg.retained,
        }
    }
}

/// Current time as float unix seconds, the representation used in payload
/// `timestamp` and `expiry` fields.
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
