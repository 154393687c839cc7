//! Perception agent: turns a page snapshot into structured findings and
//! context hints.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use pagecrew_core_types::{
    ContextHints, ElementCategory, PageSnapshot, PerceptionData, StateKey,
};
use pagecrew_message_bus::{
    BusError, Message, MessageBus, MessageKind, MessagePayload, Topic,
};
use pagecrew_state_store::SharedState;

use crate::agent::{Agent, AgentCapability, AgentConfig, AgentInput, ProcessOutcome};
use crate::classify::{KeywordClassifier, PageUnderstanding};
use crate::AgentError;

pub const PERCEPTION_AGENT: &str = "perception";

pub struct PerceptionAgent {
    config: AgentConfig,
    messages: MessageBus,
    state: Arc<SharedState>,
    classifier: Arc<dyn PageUnderstanding>,
}

impl PerceptionAgent {
    pub fn new(messages: MessageBus, state: Arc<SharedState>) -> Arc<Self> {
        Self::with_classifier(messages, state, Arc::new(KeywordClassifier))
    }

    pub fn with_classifier(
        messages: MessageBus,
        state: Arc<SharedState>,
        classifier: Arc<dyn PageUnderstanding>,
    ) -> Arc<Self> {
        let config = AgentConfig::new(
            PERCEPTION_AGENT,
            [
                AgentCapability::Perception,
                AgentCapability::PatternDetection,
                AgentCapability::DomAnalysis,
            ],
        );
        let agent = Arc::new(Self {
            config,
            messages,
            state,
            classifier,
        });
        agent.register_handlers();
        agent
    }

    fn register_handlers(&self) {
        // Re-perception itself happens when the coordinator feeds the next
        // snapshot; the handler only records the cue.
        self.messages.event_bus().subscribe_fn(
            Topic::Event(MessageKind::ActionCompleted),
            Some(PERCEPTION_AGENT),
            |message: Message| async move {
                debug!(sender = %message.sender, "action completed, page will be re-perceived");
                Ok::<(), BusError>(())
            },
        );
    }

    /// Assemble structured findings from a snapshot. Pure with respect to
    /// the shared state; only `process` persists anything.
    pub fn perceive(&self, snapshot: &PageSnapshot) -> PerceptionData {
        let page_type = self.classifier.classify(snapshot);
        let patterns = self.classifier.detect_patterns(snapshot);
        let modal_detected = self.classifier.modal_present(snapshot);
        let pagination_detected = self.classifier.pagination_present(snapshot);

        let interactive_elements = snapshot
            .clickable_elements
            .iter()
            .map(|element| {
                let mut element = element.clone();
                element.category = self.classifier.categorize(&element);
                element
            })
            .collect::<Vec<_>>();

        let mut data = PerceptionData {
            page_type,
            patterns,
            interactive_elements,
            modal_detected,
            pagination_detected,
            forms_detected: snapshot.input_elements.clone(),
            confidence: self.classifier.confidence(),
            observations: Vec::new(),
        };
        data.observations = Self::observations(&data);
        data
    }

    fn observations(data: &PerceptionData) -> Vec<String> {
        let mut observations = Vec::new();

        if data.page_type.is_known() {
            observations.push(format!("Page type: {}", data.page_type));
        }
        if data.modal_detected {
            observations.push("A modal dialog is open on the page".to_owned());
        }
        if data.pagination_detected {
            observations.push("The page has pagination controls".to_owned());
        }
        if !data.forms_detected.is_empty() {
            observations.push(format!(
                "{} input field(s) on the page",
                data.forms_detected.len()
            ));
        }
        let buttons = data
            .interactive_elements
            .iter()
            .filter(|e| e.category == ElementCategory::Button)
            .count();
        if buttons > 0 {
            observations.push(format!("{buttons} button(s) detected"));
        }

        observations
    }

    /// Build the bounded hint record passed on to the instruction renderer.
    /// Warnings stay empty here; reflection merges its own in later.
    pub fn context_hints(data: &PerceptionData) -> ContextHints {
        let mut observations = data.observations.clone();
        if data.page_type.is_known() {
            let head = format!("Page type: {}", data.page_type);
            if !observations.contains(&head) {
                observations.insert(0, head);
            }
        }
        if data.patterns.iter().any(|p| p == "quantity_controls_detected") {
            let note = "The page has quantity controls (+/- buttons)".to_owned();
            if !observations.contains(&note) {
                observations.push(note);
            }
        }

        // BTreeSet keeps the category list stable across runs.
        let suggested_categories = data
            .interactive_elements
            .iter()
            .map(|e| e.category)
            .filter(|c| *c != ElementCategory::Unknown)
            .map(|c| c.as_str().to_owned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        ContextHints {
            observations,
            patterns: data.patterns.clone(),
            warnings: Vec::new(),
            suggested_categories,
        }
    }

    async fn run(&self, snapshot: PageSnapshot) -> Result<PerceptionData, AgentError> {
        let data = self.perceive(&snapshot);

        self.state
            .set_as(StateKey::PerceptionResult, &data)
            .await?;
        self.state
            .set(StateKey::CurrentUrl, serde_json::json!(snapshot.url))
            .await;
        self.state
            .set(StateKey::PageTitle, serde_json::json!(snapshot.title))
            .await;
        self.state
            .set_as(StateKey::DetectedPatterns, &data.patterns)
            .await?;
        self.state
            .set_as(StateKey::InteractiveElements, &data.interactive_elements)
            .await?;

        let hints = Self::context_hints(&data);
        self.state.set_as(StateKey::ContextHints, &hints).await?;

        self.messages
            .publish(Message::event(
                PERCEPTION_AGENT,
                MessageKind::PerceptionPageAnalyzed,
                MessagePayload::PageAnalyzed(data.clone()),
            ))
            .await;

        if !data.patterns.is_empty() {
            self.messages
                .publish(Message::event(
                    PERCEPTION_AGENT,
                    MessageKind::PerceptionPatternDetected,
                    MessagePayload::PatternsDetected {
                        patterns: data.patterns.clone(),
                    },
                ))
                .await;
        }
        if !data.interactive_elements.is_empty() {
            self.messages
                .publish(Message::event(
                    PERCEPTION_AGENT,
                    MessageKind::PerceptionElementsFound,
                    MessagePayload::ElementsFound {
                        elements: data.interactive_elements.clone(),
                    },
                ))
                .await;
        }

        info!(page_type = %data.page_type, patterns = data.patterns.len(), "page perceived");
        Ok(data)
    }
}

#[async_trait]
impl Agent for PerceptionAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> &std::collections::HashSet<AgentCapability> {
        &self.config.capabilities
    }

    async fn process(&self, input: AgentInput) -> ProcessOutcome {
        let snapshot = match input {
            AgentInput::Snapshot(snapshot) => snapshot,
            AgentInput::Evaluation { .. } => {
                return ProcessOutcome::failure("perception expects a page snapshot")
            }
        };
        match self.run(snapshot).await {
            Ok(data) => match serde_json::to_value(&data) {
                Ok(value) => ProcessOutcome::ok(value),
                Err(err) => ProcessOutcome::failure(err.to_string()),
            },
            Err(err) => ProcessOutcome::failure(err.to_string()),
        }
    }
}
