//! Async publish/subscribe bus for agent communication.
//!
//! Messages are routed by [`Topic`] (a message kind, or the response
//! channel paired with a kind). Delivery is fanned out to every handler
//! subscribed to the topic and gathered before `publish` returns; a failing
//! handler is logged and never aborts the publish or starves its siblings.
//! The bus keeps a bounded history ring for diagnostics.
//!
//! The `recipient` field of a message is advisory metadata: the bus never
//! filters on it, handlers self-select by inspecting sender/recipient.

pub mod request;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use pagecrew_core_types::{
    ActionResult, ElementDescriptor, PerceptionData, ReflectionData, ThoughtStep,
};

pub use request::MessageBus;

/// Errors surfaced by bus handlers and the request layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("message is missing a correlation id")]
    MissingCorrelationId,
}

/// Closed set of message kinds exchanged between agents.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    // Perception
    PerceptionPageAnalyzed,
    PerceptionPatternDetected,
    PerceptionElementsFound,
    // Reflection
    ReflectionActionEvaluated,
    ReflectionProgressUpdated,
    ReflectionErrorAnalyzed,
    ReflectionDecisionMade,
    // Action
    ActionStarted,
    ActionCompleted,
    ActionFailed,
    // Planning
    PlanningStepCreated,
    PlanningNextAction,
    PlanningCorrection,
    // System
    SystemShutdown,
    SystemError,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PerceptionPageAnalyzed => "perception_page_analyzed",
            MessageKind::PerceptionPatternDetected => "perception_pattern_detected",
            MessageKind::PerceptionElementsFound => "perception_elements_found",
            MessageKind::ReflectionActionEvaluated => "reflection_action_evaluated",
            MessageKind::ReflectionProgressUpdated => "reflection_progress_updated",
            MessageKind::ReflectionErrorAnalyzed => "reflection_error_analyzed",
            MessageKind::ReflectionDecisionMade => "reflection_decision_made",
            MessageKind::ActionStarted => "action_started",
            MessageKind::ActionCompleted => "action_completed",
            MessageKind::ActionFailed => "action_failed",
            MessageKind::PlanningStepCreated => "planning_step_created",
            MessageKind::PlanningNextAction => "planning_next_action",
            MessageKind::PlanningCorrection => "planning_correction",
            MessageKind::SystemShutdown => "system_shutdown",
            MessageKind::SystemError => "system_error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing key of a message: either the event channel of a kind, or the
/// response channel paired with it (used by the request/response layer).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "channel", content = "kind")]
pub enum Topic {
    Event(MessageKind),
    Response(MessageKind),
}

impl Topic {
    pub fn kind(&self) -> MessageKind {
        match self {
            Topic::Event(kind) | Topic::Response(kind) => *kind,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Topic::Response(_))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Event(kind) => f.write_str(kind.as_str()),
            Topic::Response(kind) => write!(f, "{}_response", kind.as_str()),
        }
    }
}

/// Payload of a message, one concrete shape per kind so handlers can match
/// exhaustively instead of probing attributes at runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum MessagePayload {
    PageAnalyzed(PerceptionData),
    PatternsDetected { patterns: Vec<String> },
    ElementsFound { elements: Vec<ElementDescriptor> },
    ActionEvaluated(ReflectionData),
    ProgressUpdated { progress: f32, should_continue: bool },
    ErrorAnalyzed { error: String, corrections: Vec<String> },
    DecisionMade { next_action: String },
    ActionStarted { action: String },
    ActionCompleted(ActionResult),
    ActionFailed { error: String },
    StepCreated(ThoughtStep),
    NextAction { action: String },
    Correction { corrections: Vec<String> },
    Shutdown,
    Error { message: String },
    /// Free-form body for request/response round-trips.
    Value(serde_json::Value),
}

/// Metadata key carrying the request/response correlation id.
pub const CORRELATION_ID: &str = "request_id";
/// Metadata key marking a message as a request awaiting a response.
pub const IS_REQUEST: &str = "is_request";

/// An immutable message. Owned by the publisher until handed to the bus,
/// logically shared read-only by all subscribers afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    /// Advisory only; absent means broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub topic: Topic,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Build a broadcast event message.
    pub fn event(sender: impl Into<String>, kind: MessageKind, payload: MessagePayload) -> Self {
        Self {
            sender: sender.into(),
            recipient: None,
            topic: Topic::Event(kind),
            payload,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Address the message to a specific agent. Routing is unaffected.
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.topic.kind()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID).map(String::as_str)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let recipient = self.recipient.as_deref().unwrap_or("broadcast");
        write!(f, "[{} -> {}] {}", self.sender, recipient, self.topic)
    }
}

/// Boxed async handler invoked for every message on a subscribed topic.
pub type MessageHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<(), BusError>> + Send + Sync>;

struct Subscriber {
    id: u64,
    agent: Option<String>,
    handler: MessageHandler,
}

/// Capability returned by [`EventBus::subscribe`]; hand it back to
/// [`EventBus::unsubscribe`] to remove the handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscriptionHandle {
    topic: Topic,
    id: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

/// In-memory pub/sub broker with a bounded history ring.
pub struct EventBus {
    subscribers: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    agent_topics: RwLock<HashMap<String, Vec<Topic>>>,
    history: Mutex<VecDeque<Message>>,
    capacity: usize,
    next_id: AtomicU64,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

impl EventBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            agent_topics: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribe a boxed handler to a topic. Multiple handlers per topic run
    /// independently of each other.
    pub fn subscribe(
        &self,
        topic: Topic,
        handler: MessageHandler,
        agent: Option<&str>,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(topic)
            .or_default()
            .push(Subscriber {
                id,
                agent: agent.map(str::to_owned),
                handler,
            });
        if let Some(agent) = agent {
            self.agent_topics
                .write()
                .entry(agent.to_owned())
                .or_default()
                .push(topic);
        }
        SubscriptionHandle { topic, id }
    }

    /// Convenience wrapper boxing a closure-returning-future handler.
    pub fn subscribe_fn<F, Fut>(
        &self,
        topic: Topic,
        agent: Option<&str>,
        handler: F,
    ) -> SubscriptionHandle
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BusError>> + Send + 'static,
    {
        let boxed: MessageHandler = Arc::new(move |message| Box::pin(handler(message)));
        self.subscribe(topic, boxed, agent)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let removed_agent = {
            let mut subscribers = self.subscribers.write();
            subscribers.get_mut(&handle.topic).and_then(|entries| {
                entries
                    .iter()
                    .position(|entry| entry.id == handle.id)
                    .and_then(|pos| entries.remove(pos).agent)
            })
        };
        if let Some(agent) = removed_agent {
            let mut agent_topics = self.agent_topics.write();
            if let Some(topics) = agent_topics.get_mut(&agent) {
                if let Some(pos) = topics.iter().position(|t| *t == handle.topic) {
                    topics.remove(pos);
                }
            }
        }
    }

    /// Publish a message: append to history, then deliver to every handler
    /// of its topic. Completes once all handlers have been attempted; a
    /// publish with zero subscribers is a no-op.
    pub async fn publish(&self, message: Message) {
        {
            let mut history = self.history.lock();
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(message.clone());
        }

        let handlers: Vec<MessageHandler> = {
            let subscribers = self.subscribers.read();
            match subscribers.get(&message.topic) {
                Some(entries) => entries.iter().map(|s| Arc::clone(&s.handler)).collect(),
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            debug!(topic = %message.topic, "no subscribers for message");
            return;
        }

        let deliveries = handlers
            .iter()
            .map(|handler| Self::deliver(handler, message.clone()));
        join_all(deliveries).await;
    }

    async fn deliver(handler: &MessageHandler, message: Message) {
        let topic = message.topic;
        if let Err(err) = handler(message).await {
            // Isolation: report and move on, never back to the publisher.
            error!(%topic, %err, "message handler failed");
        }
    }

    /// Filtered tail of the history buffer, newest last.
    pub fn history(
        &self,
        sender: Option<&str>,
        kind: Option<MessageKind>,
        limit: usize,
    ) -> Vec<Message> {
        let history = self.history.lock();
        let filtered: Vec<Message> = history
            .iter()
            .filter(|m| sender.map_or(true, |s| m.sender == s))
            .filter(|m| kind.map_or(true, |k| m.kind() == k))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Topics an agent registered handlers on, for diagnostics.
    pub fn subscriptions_for(&self, agent: &str) -> Vec<Topic> {
        self.agent_topics
            .read()
            .get(agent)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
