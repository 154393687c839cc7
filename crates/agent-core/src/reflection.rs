//! Reflection agent: evaluates the last action, scores task progress and
//! decides the next move.
//!
//! Scoring is delegated to [`ScorePolicy`]; this module owns the judgment
//! around it: whether the action worked, whether the score actually moved,
//! which errors occurred and how to correct them.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use pagecrew_core_types::{
    ActionResult, ContextHints, PageType, PerceptionData, ReflectionData, StateKey,
};
use pagecrew_message_bus::{
    BusError, Message, MessageBus, MessageKind, MessagePayload, Topic,
};
use pagecrew_state_store::SharedState;

use crate::agent::{Agent, AgentCapability, AgentConfig, AgentInput, ProcessOutcome};
use crate::scoring::ScorePolicy;
use crate::AgentError;

pub const REFLECTION_AGENT: &str = "reflection";

/// Error categories recognized by the correction generator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ErrorCategory {
    NotFound,
    Timeout,
    Blocked,
    Other,
}

fn categorize_error(error: &str) -> ErrorCategory {
    let error = error.to_lowercase();
    if error.contains("not found") || error.contains("не найден") {
        ErrorCategory::NotFound
    } else if error.contains("timeout") || error.contains("timed out") {
        ErrorCategory::Timeout
    } else if error.contains("blocked") || error.contains("modal") || error.contains("overlay") {
        ErrorCategory::Blocked
    } else {
        ErrorCategory::Other
    }
}

pub struct ReflectionAgent {
    config: AgentConfig,
    messages: MessageBus,
    state: Arc<SharedState>,
    policy: ScorePolicy,
    /// Scores recorded so far, oldest first. Progress means strictly
    /// exceeding the best score seen before.
    progress_history: Mutex<Vec<f32>>,
}

impl ReflectionAgent {
    pub fn new(messages: MessageBus, state: Arc<SharedState>) -> Arc<Self> {
        Self::with_policy(messages, state, ScorePolicy::default())
    }

    pub fn with_policy(
        messages: MessageBus,
        state: Arc<SharedState>,
        policy: ScorePolicy,
    ) -> Arc<Self> {
        let config = AgentConfig::new(
            REFLECTION_AGENT,
            [
                AgentCapability::Reflection,
                AgentCapability::ProgressEvaluation,
                AgentCapability::ErrorAnalysis,
                AgentCapability::DecisionMaking,
            ],
        );
        let agent = Arc::new(Self {
            config,
            messages,
            state,
            policy,
            progress_history: Mutex::new(Vec::new()),
        });
        agent.register_handlers(Arc::downgrade(&agent));
        agent
    }

    fn register_handlers(&self, this: Weak<Self>) {
        // Completed actions and fresh perceptions are evaluated when the
        // coordinator hands them to `process`; the handlers only log the cue.
        self.messages.event_bus().subscribe_fn(
            Topic::Event(MessageKind::ActionCompleted),
            Some(REFLECTION_AGENT),
            |message: Message| async move {
                debug!(sender = %message.sender, "action completed, awaiting evaluation");
                Ok::<(), BusError>(())
            },
        );
        self.messages.event_bus().subscribe_fn(
            Topic::Event(MessageKind::PerceptionPageAnalyzed),
            Some(REFLECTION_AGENT),
            |message: Message| async move {
                debug!(sender = %message.sender, "page analyzed, awaiting evaluation");
                Ok::<(), BusError>(())
            },
        );
        self.messages.event_bus().subscribe_fn(
            Topic::Event(MessageKind::ActionFailed),
            Some(REFLECTION_AGENT),
            move |message: Message| {
                let this = this.clone();
                async move {
                    let Some(agent) = this.upgrade() else {
                        return Ok::<(), BusError>(());
                    };
                    if let MessagePayload::ActionFailed { error } = &message.payload {
                        agent.analyze_error(error).await?;
                    }
                    Ok(())
                }
            },
        );
    }

    /// Evaluate one observation. Pure apart from the progress history; the
    /// state store is only read, never written.
    pub async fn reflect_on(
        &self,
        action_result: Option<&ActionResult>,
        perception: Option<&PerceptionData>,
    ) -> ReflectionData {
        let action_successful = Self::evaluate_action_success(action_result);
        let progress_score = self.calculate_progress_score(perception, action_result);
        let progress_made = self.evaluate_progress_made(progress_score);

        let errors = self.identify_errors(action_result);
        let suggested_corrections = Self::generate_corrections(&errors);
        let next_action = Self::decide_next_action(progress_score, perception);
        let reasoning = Self::generate_reasoning(
            action_successful,
            progress_score,
            perception.map(|p| p.page_type).unwrap_or_default(),
        );

        let mut confidence: f32 = 0.5;
        if action_successful {
            confidence += 0.2;
        }
        if progress_made {
            confidence += 0.2;
        }
        if !errors.is_empty() {
            confidence -= 0.2;
        }

        ReflectionData {
            action_successful,
            progress_made,
            confidence: confidence.clamp(0.0, 1.0),
            next_action,
            reasoning: Some(reasoning),
            should_correct: !errors.is_empty(),
            errors,
            suggested_corrections,
            should_continue: progress_score < 1.0,
            progress_score,
        }
    }

    fn evaluate_action_success(result: Option<&ActionResult>) -> bool {
        // No action yet counts as success so the first step is not
        // penalized before anything ran.
        result.map(|r| r.success).unwrap_or(true)
    }

    /// Progress means strictly exceeding the best score seen so far.
    fn evaluate_progress_made(&self, score: f32) -> bool {
        let mut history = self.progress_history.lock();
        let best = history.iter().copied().fold(0.0f32, f32::max);
        let made = score > best;
        history.push(score);
        made
    }

    fn calculate_progress_score(
        &self,
        perception: Option<&PerceptionData>,
        action_result: Option<&ActionResult>,
    ) -> f32 {
        let task: String = self
            .state
            .get_as(StateKey::TaskDescription)
            .unwrap_or_default();
        let intent = self.policy.classify_intent(&task);
        let page_type = perception.map(|p| p.page_type).unwrap_or_default();
        let elements_present = perception
            .map(|p| !p.interactive_elements.is_empty())
            .unwrap_or(false);
        let score = self
            .policy
            .score(intent, page_type, elements_present, action_result);
        debug!(?intent, %page_type, score, "progress scored");
        score
    }

    /// Banded decision: explore below 0.3, act on the current page below
    /// 0.7, finalize below 1.0, done at 1.0.
    fn decide_next_action(score: f32, perception: Option<&PerceptionData>) -> Option<String> {
        if score >= 1.0 {
            return None;
        }
        let action = if score < 0.3 {
            "Explore the page and locate elements relevant to the task".to_owned()
        } else if score < 0.7 {
            match perception.map(|p| p.page_type).unwrap_or_default() {
                PageType::Catalog => "Open a suitable product from the catalog".to_owned(),
                PageType::Product => "Add the product to the cart".to_owned(),
                PageType::Cart => "Proceed to checkout".to_owned(),
                _ => "Move the task forward on the current page".to_owned(),
            }
        } else {
            "Finalize the task and confirm the result".to_owned()
        };
        Some(action)
    }

    fn generate_reasoning(action_successful: bool, score: f32, page_type: PageType) -> String {
        let action = if action_successful {
            "last action succeeded"
        } else {
            "last action failed"
        };
        format!(
            "{action}; progress {score:.1} on a {page_type} page",
        )
    }

    fn identify_errors(&self, result: Option<&ActionResult>) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(result) = result {
            if let Some(error) = &result.error {
                errors.push(error.clone());
            } else if !result.success {
                errors.push("action did not complete".to_owned());
            }
        }
        let url: String = self.state.get_as(StateKey::CurrentUrl).unwrap_or_default();
        if url.is_empty() || url == "about:blank" {
            errors.push("no active page".to_owned());
        }
        errors
    }

    fn generate_corrections(errors: &[String]) -> Vec<String> {
        let mut corrections = Vec::new();
        for error in errors {
            let correction = match categorize_error(error) {
                ErrorCategory::NotFound => {
                    "Re-scan the page and retry with a different element"
                }
                ErrorCategory::Timeout => "Wait for the page to settle and retry the action",
                ErrorCategory::Blocked => "Close the blocking dialog before retrying",
                ErrorCategory::Other => "Retry the action or choose an alternative path",
            };
            let correction = correction.to_owned();
            if !corrections.contains(&correction) {
                corrections.push(correction);
            }
        }
        corrections
    }

    /// Record an error, derive corrections, merge a warning into the shared
    /// hints and announce the analysis on the bus.
    pub async fn analyze_error(&self, error: &str) -> Result<(), BusError> {
        let corrections = Self::generate_corrections(std::slice::from_ref(&error.to_owned()));
        warn!(%error, "analyzing reported error");

        let mut history: Vec<serde_json::Value> = self
            .state
            .get_as(StateKey::ErrorHistory)
            .unwrap_or_default();
        history.push(serde_json::json!({
            "error": error,
            "corrections": corrections.clone(),
            "timestamp": Utc::now().to_rfc3339(),
        }));
        self.state
            .set_as(StateKey::ErrorHistory, &history)
            .await
            .map_err(|e| BusError::Handler(e.to_string()))?;

        self.merge_warning(&format!("Previous attempt failed: {error}"))
            .await
            .map_err(|e| BusError::Handler(e.to_string()))?;

        self.messages
            .publish(Message::event(
                REFLECTION_AGENT,
                MessageKind::ReflectionErrorAnalyzed,
                MessagePayload::ErrorAnalyzed {
                    error: error.to_owned(),
                    corrections,
                },
            ))
            .await;
        Ok(())
    }

    /// The three warning classes surfaced to the instruction renderer:
    /// checkout caution, unresolved errors, low evaluation confidence.
    async fn merge_hint_warnings(
        &self,
        data: &ReflectionData,
        perception: Option<&PerceptionData>,
    ) -> Result<(), serde_json::Error> {
        let mut warnings = Vec::new();
        if perception.map(|p| p.page_type) == Some(PageType::Checkout) {
            warnings.push(
                "On the checkout page, fill the fields carefully before confirming".to_owned(),
            );
        }
        if let Some(error) = data.errors.first() {
            warnings.push(format!("The last action had problems: {error}"));
        }
        if data.confidence < 0.4 {
            warnings.push("Low confidence in the current evaluation".to_owned());
        }
        if warnings.is_empty() {
            return Ok(());
        }

        let mut hints: ContextHints = self
            .state
            .get_as(StateKey::ContextHints)
            .unwrap_or_default();
        for warning in warnings {
            hints.push_warning(warning);
        }
        self.state.set_as(StateKey::ContextHints, &hints).await
    }

    async fn merge_warning(&self, warning: &str) -> Result<(), serde_json::Error> {
        let mut hints: ContextHints = self
            .state
            .get_as(StateKey::ContextHints)
            .unwrap_or_default();
        hints.push_warning(warning);
        self.state.set_as(StateKey::ContextHints, &hints).await
    }

    async fn run(
        &self,
        action_result: Option<ActionResult>,
        perception: Option<PerceptionData>,
    ) -> Result<ReflectionData, AgentError> {
        // Fall back to the last stored perception when the caller did not
        // pass one along.
        let perception = match perception {
            Some(p) => Some(p),
            None => self.state.get_as(StateKey::PerceptionResult),
        };

        let data = self
            .reflect_on(action_result.as_ref(), perception.as_ref())
            .await;

        self.state.set_as(StateKey::ReflectionResult, &data).await?;
        // Stored as a rounded f64 so readers see the policy ladder's exact
        // values rather than f32 widening artifacts.
        let stored_score = (f64::from(data.progress_score) * 1000.0).round() / 1000.0;
        self.state
            .set(StateKey::ProgressScore, serde_json::json!(stored_score))
            .await;
        self.merge_hint_warnings(&data, perception.as_ref()).await?;

        self.messages
            .publish(Message::event(
                REFLECTION_AGENT,
                MessageKind::ReflectionActionEvaluated,
                MessagePayload::ActionEvaluated(data.clone()),
            ))
            .await;
        self.messages
            .publish(Message::event(
                REFLECTION_AGENT,
                MessageKind::ReflectionProgressUpdated,
                MessagePayload::ProgressUpdated {
                    progress: data.progress_score,
                    should_continue: data.should_continue,
                },
            ))
            .await;
        if let Some(next_action) = &data.next_action {
            self.messages
                .publish(Message::event(
                    REFLECTION_AGENT,
                    MessageKind::ReflectionDecisionMade,
                    MessagePayload::DecisionMade {
                        next_action: next_action.clone(),
                    },
                ))
                .await;
        }

        info!(
            progress = data.progress_score,
            should_continue = data.should_continue,
            "reflection complete"
        );
        Ok(data)
    }

    /// Scores recorded so far, oldest first.
    pub fn progress_history(&self) -> Vec<f32> {
        self.progress_history.lock().clone()
    }

    /// Forget the recorded scores. Called when a new task begins.
    pub fn reset(&self) {
        self.progress_history.lock().clear();
    }
}

#[async_trait]
impl Agent for ReflectionAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> &std::collections::HashSet<AgentCapability> {
        &self.config.capabilities
    }

    async fn process(&self, input: AgentInput) -> ProcessOutcome {
        let (action_result, perception) = match input {
            AgentInput::Evaluation {
                action_result,
                perception,
            } => (action_result, perception),
            AgentInput::Snapshot(_) => {
                return ProcessOutcome::failure("reflection expects an evaluation input")
            }
        };
        match self.run(action_result, perception).await {
            Ok(data) => match serde_json::to_value(&data) {
                Ok(value) => ProcessOutcome::ok(value),
                Err(err) => ProcessOutcome::failure(err.to_string()),
            },
            Err(err) => ProcessOutcome::failure(err.to_string()),
        }
    }
}
