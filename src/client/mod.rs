//! Request/response client over a pub/sub transport
//!
//! Composes the publish rate limiter and the pending-request table with a
//! transport. `send` is plain rate-limited publishing; `request` layers
//! correlation on top: register, publish at QoS 1, wait with timeout.

pub mod pending;
pub mod rate_limiter;

pub use pending::{PendingHandle, PendingRequestTable};
pub use rate_limiter::RateLimiter;

use crate::error::{ClientError, ClientResult};
use crate::observability::FlowMetrics;
use crate::protocol::messages::unix_now;
use crate::protocol::{
    QosLevel, ResponseEnvelope, TopicSet, EXPIRY_FIELD, REPLY_TO_FIELD, REQUEST_ID_FIELD,
};
use crate::transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct RequestResponseClient<T: Transport> {
    client_id: String,
    transport: Arc<T>,
    publish_limiter: RateLimiter,
    pending: Arc<PendingRequestTable>,
    topics: TopicSet,
    metrics: Arc<FlowMetrics>,
}

impl<T: Transport> RequestResponseClient<T> {
    pub fn new(
        client_id: &str,
        transport: Arc<T>,
        topics: TopicSet,
        publish_rate: f64,
        metrics: Arc<FlowMetrics>,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            transport,
            publish_limiter: RateLimiter::new(publish_rate),
            pending: Arc::new(PendingRequestTable::new()),
            topics,
            metrics,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// The correlation table, shared with the dispatcher.
    pub fn pending(&self) -> Arc<PendingRequestTable> {
        self.pending.clone()
    }

    pub fn metrics(&self) -> Arc<FlowMetrics> {
        self.metrics.clone()
    }

    /// Rate-limited publish of a JSON payload.
    ///
    /// Transport failures come back as [`ClientError::Transport`]; nothing
    /// is retried here.
    pub async fn send(
        &self,
        topic: &str,
        payload: &Value,
        qos: QosLevel,
        retain: bool,
    ) -> ClientResult<()> {
        self.publish_limiter.acquire().await;

        let bytes = serde_json::to_vec(payload)?;
        self.transport
            .publish(topic, bytes, qos, retain)
            .await
            .map_err(ClientError::transport)?;

        self.metrics.record_published();
        debug!(topic = %topic, qos = qos.as_u8(), "Published message");
        Ok(())
    }

    /// Rate-limited publish with a delivery time-to-live.
    ///
    /// The deadline is stamped into the payload's `expiry` field for
    /// receivers that check it at processing time, and also handed to the
    /// transport so an MQTT v5 broker stops delivering the message once
    /// the interval passes.
    pub async fn send_with_expiry(
        &self,
        topic: &str,
        payload: &Value,
        qos: QosLevel,
        retain: bool,
        ttl: Duration,
    ) -> ClientResult<()> {
        let mut payload = payload.clone();
        if let Value::Object(fields) = &mut payload {
            fields.insert(
                EXPIRY_FIELD.to_string(),
                Value::from(unix_now() + ttl.as_secs_f64()),
            );
        }

        self.publish_limiter.acquire().await;

        let bytes = serde_json::to_vec(&payload)?;
        self.transport
            .publish_with_expiry(topic, bytes, qos, retain, Some(ttl))
            .await
            .map_err(ClientError::transport)?;

        self.metrics.record_published();
        debug!(topic = %topic, ttl_secs = ttl.as_secs(), "Published message with expiry");
        Ok(())
    }

    /// Publish a request on the well-known request topic and wait for the
    /// correlated response.
    ///
    /// The payload must be a JSON object; `request_id` and `reply_to`
    /// fields are attached before publishing. The request goes out at
    /// QoS 1 - correlation correctness depends on delivery, so QoS 0 is
    /// not used on this path.
    pub async fn request(&self, payload: Value, timeout: Duration) -> ClientResult<Value> {
        let Value::Object(mut fields) = payload else {
            return Err(ClientError::InvalidPayload(json_type_name(&payload).to_string()));
        };

        let correlation_id = Uuid::new_v4();
        fields.insert(
            REQUEST_ID_FIELD.to_string(),
            Value::String(correlation_id.to_string()),
        );
        fields.insert(
            REPLY_TO_FIELD.to_string(),
            Value::String(self.topics.reply_topic(&self.client_id)),
        );

        // Register before publishing so a response racing back cannot
        // miss the table entry
        let handle = self.pending.register(correlation_id)?;

        let request_topic = self.topics.request_topic();
        if let Err(e) = self
            .send(&request_topic, &Value::Object(fields), QosLevel::AtLeastOnce, false)
            .await
        {
            self.pending.remove(correlation_id);
            return Err(e);
        }
        self.metrics.record_request_sent();

        match tokio::time::timeout(timeout, handle.wait()).await {
            Ok(Ok(response)) => {
                self.metrics.record_response_matched();
                Ok(response)
            }
            Ok(Err(_)) => {
                // Entry dropped without completion; treat as timed out
                warn!(%correlation_id, "Pending entry dropped before completion");
                self.pending.remove(correlation_id);
                Err(ClientError::Timeout { waited: timeout })
            }
            Err(_) => {
                self.pending.remove(correlation_id);
                debug!(%correlation_id, ?timeout, "Request timed out");
                Err(ClientError::Timeout { waited: timeout })
            }
        }
    }

    /// Publish a response envelope to a requester's reply destination,
    /// echoing its correlation id. Used by responder applications.
    pub async fn respond(&self, reply_to: &str, response: &ResponseEnvelope) -> ClientResult<()> {
        let payload = serde_json::to_value(response)?;
        self.send(reply_to, &payload, QosLevel::AtLeastOnce, false)
            .await
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
