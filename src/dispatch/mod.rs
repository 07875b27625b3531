//! Inbound message routing and decoupled processing
//!
//! The dispatcher consumes the transport's inbound stream and routes each
//! message to exactly one of: response completion, the application request
//! handler, or the bounded work queue. The processor drains that queue in
//! its own task at an independent rate. Enqueue and processing are never
//! collapsed into one context; the queue is the only coupling between them.

pub mod dispatcher;
pub mod processor;

pub use dispatcher::InboundDispatcher;
pub use processor::MessageProcessor;

use crate::protocol::QueuedMessage;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// Application hook for serving inbound requests.
///
/// The returned value becomes the `data` of a success response envelope,
/// published back to the requester's reply destination. Errors become
/// error envelopes; they never propagate past the dispatcher.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        request: Value,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Application hook for ordinary (non-request, non-response) messages.
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver a parsed, unexpired message.
    async fn deliver(&self, topic: &str, message: Value);

    /// Fallback for payloads that failed to parse as JSON.
    async fn deliver_raw(&self, topic: &str, payload: Bytes) {
        warn!(topic = %topic, bytes = payload.len(), "Unparseable payload dropped by default sink");
    }
}

/// Create the bounded work queue joining dispatcher and processor.
pub fn work_queue(capacity: usize) -> (mpsc::Sender<QueuedMessage>, mpsc::Receiver<QueuedMessage>) {
    mpsc::channel(capacity)
}
