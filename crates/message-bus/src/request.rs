//! Correlation-id based request/response on top of the event bus.
//!
//! A request carries a fresh correlation id in its metadata and is
//! published on the event channel of its kind; the responder publishes on
//! the paired response channel with the same id. A timed-out request
//! resolves to `None` — timeouts are recoverable, never faults. Pending
//! bookkeeping and the response subscription are removed on every exit
//! path.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    BusError, EventBus, Message, MessageHandler, MessagePayload, SubscriptionHandle, Topic,
    CORRELATION_ID, IS_REQUEST,
};

/// High-level bus facade adding the request/await-response pattern.
#[derive(Clone)]
pub struct MessageBus {
    bus: Arc<EventBus>,
    pending: Arc<DashMap<String, oneshot::Sender<Message>>>,
}

impl MessageBus {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub async fn publish(&self, message: Message) {
        self.bus.publish(message).await;
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        handler: MessageHandler,
        agent: Option<&str>,
    ) -> SubscriptionHandle {
        self.bus.subscribe(topic, handler, agent)
    }

    /// Send a request and await its correlated response.
    ///
    /// Returns `None` when no matching response arrives within `timeout`.
    /// The pending entry and the response subscription are cleaned up
    /// regardless of outcome.
    pub async fn request(&self, mut message: Message, timeout: Duration) -> Option<Message> {
        let request_id = Uuid::new_v4().to_string();
        message
            .metadata
            .insert(CORRELATION_ID.to_owned(), request_id.clone());
        message
            .metadata
            .insert(IS_REQUEST.to_owned(), "true".to_owned());

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let kind = message.kind();
        let pending = Arc::clone(&self.pending);
        let expected_id = request_id.clone();
        let handle = self.bus.subscribe_fn(
            Topic::Response(kind),
            None,
            move |response: Message| {
                let pending = Arc::clone(&pending);
                let expected_id = expected_id.clone();
                async move {
                    if response.correlation_id() == Some(expected_id.as_str()) {
                        if let Some((_, tx)) = pending.remove(&expected_id) {
                            // Receiver may have timed out already; ignore.
                            let _ = tx.send(response);
                        }
                    }
                    Ok::<(), BusError>(())
                }
            },
        );

        self.bus.publish(message).await;

        let outcome = tokio::time::timeout(timeout, rx).await;

        self.bus.unsubscribe(&handle);
        self.pending.remove(&request_id);

        match outcome {
            Ok(Ok(response)) => {
                debug!(%request_id, "request resolved");
                Some(response)
            }
            Ok(Err(_)) | Err(_) => {
                warn!(%request_id, kind = %kind, "request timed out");
                None
            }
        }
    }

    /// Build the correlated response for a request. Fails when the request
    /// never carried a correlation id.
    pub fn respond(
        request: &Message,
        sender: impl Into<String>,
        payload: MessagePayload,
    ) -> Result<Message, BusError> {
        let correlation_id = request
            .correlation_id()
            .ok_or(BusError::MissingCorrelationId)?
            .to_owned();
        let mut response = Message::event(sender, request.kind(), payload);
        response.topic = Topic::Response(request.kind());
        response.recipient = Some(request.sender.clone());
        response
            .metadata
            .insert(CORRELATION_ID.to_owned(), correlation_id);
        Ok(response)
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::MessageKind;
    use serde_json::json;

    #[tokio::test]
    async fn request_times_out_without_responder() {
        let bus = EventBus::new(16);
        let messages = MessageBus::new(bus);

        let request = Message::event(
            "coordinator",
            MessageKind::PlanningNextAction,
            MessagePayload::Value(json!({"query": "next"})),
        );

        let response = messages
            .request(request, Duration::from_millis(50))
            .await;
        assert!(response.is_none());
        assert_eq!(messages.pending_requests(), 0);
    }

    #[tokio::test]
    async fn request_resolves_with_correlated_response() {
        let bus = EventBus::new(16);
        let messages = MessageBus::new(bus.clone());

        // Responder answers every request on this kind.
        let responder_bus = messages.clone();
        bus.subscribe_fn(
            Topic::Event(MessageKind::PlanningNextAction),
            Some("planner"),
            move |request: Message| {
                let messages = responder_bus.clone();
                async move {
                    let response = MessageBus::respond(
                        &request,
                        "planner",
                        MessagePayload::Value(json!({"action": "open catalog"})),
                    )?;
                    messages.publish(response).await;
                    Ok(())
                }
            },
        );

        let request = Message::event(
            "coordinator",
            MessageKind::PlanningNextAction,
            MessagePayload::Value(json!({"query": "next"})),
        );
        let response = messages
            .request(request, Duration::from_millis(500))
            .await
            .expect("responder should answer in time");

        assert!(response.topic.is_response());
        assert_eq!(response.sender, "planner");
        assert_eq!(response.recipient.as_deref(), Some("coordinator"));
        assert_eq!(messages.pending_requests(), 0);
    }

    #[tokio::test]
    async fn uncorrelated_response_is_ignored() {
        let bus = EventBus::new(16);
        let messages = MessageBus::new(bus.clone());

        // Responder publishes a response with a bogus correlation id.
        let responder_bus = messages.clone();
        bus.subscribe_fn(
            Topic::Event(MessageKind::PlanningNextAction),
            Some("planner"),
            move |request: Message| {
                let messages = responder_bus.clone();
                async move {
                    let mut response = MessageBus::respond(
                        &request,
                        "planner",
                        MessagePayload::Value(json!({})),
                    )?;
                    response
                        .metadata
                        .insert(CORRELATION_ID.to_owned(), "someone-else".to_owned());
                    messages.publish(response).await;
                    Ok(())
                }
            },
        );

        let request = Message::event(
            "coordinator",
            MessageKind::PlanningNextAction,
            MessagePayload::Value(json!({})),
        );
        let response = messages.request(request, Duration::from_millis(80)).await;
        assert!(response.is_none());
    }

    #[test]
    fn respond_requires_correlation_id() {
        let request = Message::event(
            "coordinator",
            MessageKind::PlanningNextAction,
            MessagePayload::Value(json!({})),
        );
        let err = MessageBus::respond(&request, "planner", MessagePayload::Shutdown);
        assert!(matches!(err, Err(BusError::MissingCorrelationId)));
    }
}
