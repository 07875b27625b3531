//! Paced draining of the bounded work queue
//!
//! Runs in its own task with a rate budget independent of the publish
//! limiter. Messages whose payload carries a past `expiry` (unix seconds)
//! are discarded before delivery; unparseable payloads go to the sink's
//! raw fallback instead of failing the loop.

use super::MessageSink;
use crate::client::RateLimiter;
use crate::observability::FlowMetrics;
use crate::protocol::{messages::unix_now, QueuedMessage, EXPIRY_FIELD};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct MessageProcessor {
    sink: Arc<dyn MessageSink>,
    limiter: RateLimiter,
    metrics: Arc<FlowMetrics>,
}

impl MessageProcessor {
    pub fn new(sink: Arc<dyn MessageSink>, process_rate: f64, metrics: Arc<FlowMetrics>) -> Self {
        Self {
            sink,
            limiter: RateLimiter::new(process_rate),
            metrics,
        }
    }

    /// Drain the queue until it closes or the stop signal fires. The
    /// in-flight message is always finished before exiting; anything
    /// still queued at shutdown is discarded.
    pub async fn run(
        self,
        mut queue: mpsc::Receiver<QueuedMessage>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                message = queue.recv() => {
                    match message {
                        Some(message) => {
                            self.limiter.acquire().await;
                            self.process(message).await;
                        }
                        None => break,
                    }
                }
            }
        }
        info!("Message processor stopped");
    }

    async fn process(&self, message: QueuedMessage) {
        let value: Value = match serde_json::from_slice(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(topic = %message.topic, "Payload is not valid JSON: {e}");
                self.metrics.record_malformed_payload();
                self.sink.deliver_raw(&message.topic, message.payload).await;
                return;
            }
        };

        if is_expired(&value) {
            debug!(topic = %message.topic, "Discarding expired message");
            self.metrics.record_expired_discarded();
            return;
        }

        self.sink.deliver(&message.topic, value).await;
        self.metrics.record_delivered();
    }
}

fn is_expired(value: &Value) -> bool {
    value
        .get(EXPIRY_FIELD)
        .and_then(Value::as_f64)
        .is_some_and(|expiry| expiry < unix_now())
}
