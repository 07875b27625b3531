//! Inbound message routing
//!
//! Per-message state machine:
//! 1. message is on the shared request topic -> run the application
//!    handler and publish its result as a response envelope (a client
//!    serving the request topic sees its own requests echoed back, so
//!    this check comes before correlation matching);
//! 2. payload's `request_id` matches a pending entry -> complete it;
//! 3. otherwise -> non-blocking enqueue onto the work queue, dropping
//!    (with a counted, logged drop) when the queue is full.

use super::RequestHandler;
use crate::client::{PendingRequestTable, RequestResponseClient};
use crate::observability::FlowMetrics;
use crate::protocol::{
    InboundMessage, QueuedMessage, ResponseEnvelope, REPLY_TO_FIELD, REQUEST_ID_FIELD,
};
use crate::transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct InboundDispatcher<T: Transport> {
    client: Arc<RequestResponseClient<T>>,
    pending: Arc<PendingRequestTable>,
    handler: Option<Arc<dyn RequestHandler>>,
    work_tx: mpsc::Sender<QueuedMessage>,
    metrics: Arc<FlowMetrics>,
    request_topic: String,
    reply_topic: String,
}

impl<T: Transport> InboundDispatcher<T> {
    pub fn new(
        client: Arc<RequestResponseClient<T>>,
        handler: Option<Arc<dyn RequestHandler>>,
        work_tx: mpsc::Sender<QueuedMessage>,
    ) -> Self {
        let pending = client.pending();
        let metrics = client.metrics();
        let request_topic = client.topics().request_topic();
        let reply_topic = client.topics().reply_topic(client.client_id());
        Self {
            client,
            pending,
            handler,
            work_tx,
            metrics,
            request_topic,
            reply_topic,
        }
    }

    /// Consume the inbound stream until it closes or the stop signal
    /// fires. Runs in its own task; individual messages never block it
    /// beyond the handler's own work.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut stop: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                message = inbound.recv() => {
                    match message {
                        Some(message) => self.dispatch(message).await,
                        None => break,
                    }
                }
            }
        }
        info!("Inbound dispatcher stopped");
    }

    async fn dispatch(&self, message: InboundMessage) {
        let correlation = extract_correlation(&message.payload);

        if message.topic == self.request_topic {
            self.handle_request(&message, correlation).await;
            return;
        }

        // Response to one of our in-flight requests
        if let Some((id, value)) = &correlation {
            if self.pending.contains(*id) {
                self.pending.complete(*id, value.clone());
                return;
            }

            // A correlated message on our reply topic with no pending entry
            // is a response that lost the race against its timeout
            if message.topic == self.reply_topic {
                warn!(correlation_id = %id, "Late response for timed-out request ignored");
                self.metrics.record_response_late();
                return;
            }
        }

        match self.work_tx.try_send(QueuedMessage::from(message)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(topic = %dropped.topic, "Work queue full, dropping message");
                self.metrics.record_queue_dropped();
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                debug!(topic = %dropped.topic, "Work queue closed, dropping message");
            }
        }
    }

    async fn handle_request(&self, message: &InboundMessage, correlation: Option<(Uuid, Value)>) {
        if message.retained {
            // Old retained requests must not be re-served to every new subscriber
            debug!("Ignoring retained message on request topic");
            return;
        }

        let Some((correlation_id, request)) = correlation else {
            warn!("Request without a parseable request_id ignored");
            self.metrics.record_malformed_payload();
            return;
        };

        let Some(handler) = &self.handler else {
            debug!(%correlation_id, "Request received but no handler configured");
            return;
        };

        let reply_to = request
            .get(REPLY_TO_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(reply_to) = reply_to else {
            warn!(%correlation_id, "Request without reply_to, cannot respond");
            return;
        };

        let envelope = match handler.handle(request).await {
            Ok(data) => ResponseEnvelope::success(correlation_id, data),
            Err(e) => {
                warn!(%correlation_id, "Request handler failed: {e}");
                ResponseEnvelope::error(correlation_id, &e.to_string())
            }
        };

        if let Err(e) = self.client.respond(&reply_to, &envelope).await {
            error!(%correlation_id, "Failed to publish response: {e}");
        }
    }
}

/// Parse the payload as JSON and pull out its correlation id, if any.
fn extract_correlation(payload: &[u8]) -> Option<(Uuid, Value)> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    let id = value
        .get(REQUEST_ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())?;
    Some((id, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{QosLevel, TopicSet};
    use crate::testing::mocks::{MockTransport, StaticResponder};
    use bytes::Bytes;
    use serde_json::json;
    use std::time::Duration;

    fn make_message(topic: &str, payload: Value) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from(serde_json::to_vec(&payload).unwrap()),
            qos: QosLevel::AtLeastOnce,
            retained: false,
        }
    }

    fn make_client(
        transport: Arc<MockTransport>,
    ) -> Arc<RequestResponseClient<MockTransport>> {
        Arc::new(RequestResponseClient::new(
            "dispatch-test",
            transport,
            TopicSet::new("/mqrpc"),
            0.0,
            Arc::new(FlowMetrics::new()),
        ))
    }

    #[tokio::test]
    async fn test_response_completes_pending_entry() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport);
        let (work_tx, mut work_rx) = mpsc::channel(4);
        let dispatcher = InboundDispatcher::new(client.clone(), None, work_tx);

        let id = Uuid::new_v4();
        let handle = client.pending().register(id).unwrap();

        dispatcher
            .dispatch(make_message(
                "/mqrpc/clients/dispatch-test/reply",
                json!({"request_id": id.to_string(), "status": "success"}),
            ))
            .await;

        let response = handle.wait().await.unwrap();
        assert_eq!(response.get("status"), Some(&json!("success")));
        // Not routed to the work queue
        assert!(work_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_response_is_counted_not_queued() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport);
        let (work_tx, mut work_rx) = mpsc::channel(4);
        let dispatcher = InboundDispatcher::new(client.clone(), None, work_tx);

        dispatcher
            .dispatch(make_message(
                "/mqrpc/clients/dispatch-test/reply",
                json!({"request_id": Uuid::new_v4().to_string()}),
            ))
            .await;

        assert_eq!(client.metrics().snapshot().responses_late, 1);
        assert!(work_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_topic_invokes_handler_and_responds() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport.clone());
        let (work_tx, _work_rx) = mpsc::channel(4);
        let handler = Arc::new(StaticResponder::new(json!({"state": "idle"})));
        let dispatcher = InboundDispatcher::new(client, Some(handler), work_tx);

        let id = Uuid::new_v4();
        dispatcher
            .dispatch(make_message(
                "/mqrpc/requests",
                json!({
                    "request_id": id.to_string(),
                    "reply_to": "/mqrpc/clients/someone/reply",
                    "action": "get_status"
                }),
            ))
            .await;

        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "/mqrpc/clients/someone/reply");

        let envelope: ResponseEnvelope = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(envelope.request_id, id);
        assert_eq!(envelope.data, json!({"state": "idle"}));
    }

    #[tokio::test]
    async fn test_handler_failure_publishes_error_envelope() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport.clone());
        let (work_tx, _work_rx) = mpsc::channel(4);
        let handler = Arc::new(StaticResponder::failing("backend unavailable"));
        let dispatcher = InboundDispatcher::new(client, Some(handler), work_tx);

        dispatcher
            .dispatch(make_message(
                "/mqrpc/requests",
                json!({
                    "request_id": Uuid::new_v4().to_string(),
                    "reply_to": "/mqrpc/clients/someone/reply"
                }),
            ))
            .await;

        let published = transport.published().await;
        assert_eq!(published.len(), 1, "handler failure still yields a response");
        let envelope: ResponseEnvelope = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(envelope.status, crate::protocol::ResponseStatus::Error);
        assert!(envelope.data["message"]
            .as_str()
            .unwrap()
            .contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_retained_request_ignored() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport.clone());
        let (work_tx, _work_rx) = mpsc::channel(4);
        let handler = Arc::new(StaticResponder::new(json!({})));
        let dispatcher = InboundDispatcher::new(client, Some(handler), work_tx);

        let mut message = make_message(
            "/mqrpc/requests",
            json!({
                "request_id": Uuid::new_v4().to_string(),
                "reply_to": "/mqrpc/clients/someone/reply"
            }),
        );
        message.retained = true;
        dispatcher.dispatch(message).await;

        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_plain_message_is_enqueued() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport);
        let (work_tx, mut work_rx) = mpsc::channel(4);
        let dispatcher = InboundDispatcher::new(client, None, work_tx);

        dispatcher
            .dispatch(make_message("/mqrpc/data/telemetry", json!({"temp": 21.5})))
            .await;

        let queued = work_rx.try_recv().unwrap();
        assert_eq!(queued.topic, "/mqrpc/data/telemetry");
    }

    #[tokio::test]
    async fn test_full_queue_drops_new_message_keeps_old() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport);
        let (work_tx, mut work_rx) = mpsc::channel(1);
        let dispatcher = InboundDispatcher::new(client.clone(), None, work_tx);

        dispatcher
            .dispatch(make_message("/mqrpc/data/a", json!({"n": 1})))
            .await;
        dispatcher
            .dispatch(make_message("/mqrpc/data/b", json!({"n": 2})))
            .await;

        assert_eq!(client.metrics().snapshot().queue_dropped, 1);

        // The earlier message survives untouched
        let queued = work_rx.try_recv().unwrap();
        assert_eq!(queued.topic, "/mqrpc/data/a");
        assert!(work_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_exits_on_stop_signal() {
        let transport = Arc::new(MockTransport::new());
        let client = make_client(transport);
        let (work_tx, _work_rx) = mpsc::channel(4);
        let dispatcher = InboundDispatcher::new(client, None, work_tx);

        let (_inbound_tx, inbound_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(dispatcher.run(inbound_rx, stop_rx));
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher should stop promptly")
            .unwrap();
    }
}
