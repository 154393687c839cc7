//! Task coordinator: wires the agents, the thinking engine and the action
//! gate into one observe/evaluate/decide cycle.
//!
//! The embedder drives the loop: it feeds a [`PageSnapshot`] per cycle,
//! executes the proposed action externally and reports the result back via
//! [`Coordinator::record_action_result`]. The coordinator owns the
//! thinking context; nothing about the current run lives in globals.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use pagecrew_agent_core::{
    Agent, AgentInput, Continuation, PerceptionAgent, ReflectionAgent, ThinkingContext,
    ThinkingEngine,
};
use pagecrew_core_types::{ActionResult, ContextHints, PageSnapshot, StateKey, TaskStatus};
use pagecrew_message_bus::{EventBus, Message, MessageBus, MessageKind, MessagePayload};
use pagecrew_state_store::SharedState;

use crate::config::CoordinatorConfig;
use crate::errors::PagecrewError;
use crate::gate::{ActionGate, AllowAll, GateDecision};
use crate::prompt;

pub const COORDINATOR: &str = "coordinator";

/// Everything one cycle produced, returned to the embedder.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub step: pagecrew_core_types::ThoughtStep,
    pub reflection: pagecrew_core_types::ReflectionData,
    pub decision: GateDecision,
    pub continuation: Continuation,
    pub status: TaskStatus,
}

pub struct Coordinator {
    state: Arc<SharedState>,
    messages: MessageBus,
    perception: Arc<PerceptionAgent>,
    reflection: Arc<ReflectionAgent>,
    engine: ThinkingEngine,
    gate: Arc<dyn ActionGate>,
    config: CoordinatorConfig,
    context: Mutex<Option<ThinkingContext>>,
    /// Last reported action result, consumed by the next cycle.
    pending_result: Mutex<Option<ActionResult>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_gate(config, Arc::new(AllowAll))
    }

    pub fn with_gate(config: CoordinatorConfig, gate: Arc<dyn ActionGate>) -> Self {
        let bus = EventBus::new(config.history_capacity);
        let messages = MessageBus::new(bus);
        let state = SharedState::new();
        let perception = PerceptionAgent::new(messages.clone(), Arc::clone(&state));
        let reflection = ReflectionAgent::new(messages.clone(), Arc::clone(&state));
        let engine = ThinkingEngine::new(messages.clone(), Arc::clone(&state));
        Self {
            state,
            messages,
            perception,
            reflection,
            engine,
            gate,
            config,
            context: Mutex::new(None),
            pending_result: Mutex::new(None),
        }
    }

    /// Begin a new task. Clears any state left by the previous run and
    /// resets the thinking context; the message history is kept for
    /// diagnostics.
    pub async fn start_task(&self, task: &str) {
        self.state.clear();
        self.state
            .set(StateKey::TaskDescription, json!(task))
            .await;
        self.state
            .set(StateKey::TaskStatus, json!(TaskStatus::Running.as_str()))
            .await;

        self.reflection.reset();
        let context =
            self.engine
                .create_context(task, self.config.max_steps, self.config.max_errors);
        *self.context.lock().await = Some(context);
        *self.pending_result.lock().await = None;
        info!(%task, "task started");
    }

    /// Report the outcome of the previously proposed action. Failures are
    /// announced on the bus, which also feeds the error analysis.
    pub async fn record_action_result(
        &self,
        result: ActionResult,
    ) -> Result<(), PagecrewError> {
        self.state
            .set_as(StateKey::LastActionResult, &result)
            .await?;
        if let Some(action) = &result.action {
            self.state.set(StateKey::LastAction, json!(action)).await;
        }

        if result.success {
            self.messages
                .publish(Message::event(
                    COORDINATOR,
                    MessageKind::ActionCompleted,
                    MessagePayload::ActionCompleted(result.clone()),
                ))
                .await;
        } else {
            self.messages
                .publish(Message::event(
                    COORDINATOR,
                    MessageKind::ActionFailed,
                    MessagePayload::ActionFailed {
                        error: result
                            .error
                            .clone()
                            .unwrap_or_else(|| "action did not complete".to_owned()),
                    },
                ))
                .await;
        }

        *self.pending_result.lock().await = Some(result);
        Ok(())
    }

    /// Run one full cycle on a fresh snapshot: perceive, reflect, think,
    /// gate, announce, and settle the task status.
    pub async fn step(&self, snapshot: PageSnapshot) -> Result<StepReport, PagecrewError> {
        let mut guard = self.context.lock().await;
        let context = guard.as_mut().ok_or(PagecrewError::NoActiveTask)?;

        let outcome = self
            .perception
            .process(AgentInput::Snapshot(snapshot))
            .await;
        if !outcome.success {
            warn!(error = ?outcome.error, "perception failed, continuing with empty findings");
        }
        let perception = outcome.perception().unwrap_or_default();

        let action_result = self.pending_result.lock().await.take();

        let reflection_outcome = self
            .reflection
            .process(AgentInput::Evaluation {
                action_result,
                perception: Some(perception.clone()),
            })
            .await;
        if !reflection_outcome.success {
            warn!(error = ?reflection_outcome.error, "reflection failed, using neutral evaluation");
        }
        let reflection = reflection_outcome.reflection().unwrap_or_default();

        let step = self
            .engine
            .think_step(context, &perception, &reflection)
            .await?;

        let decision = self.gate.review(&step.action, &self.state).await;
        match &decision {
            GateDecision::Allowed => {
                self.messages
                    .publish(Message::event(
                        COORDINATOR,
                        MessageKind::PlanningNextAction,
                        MessagePayload::NextAction {
                            action: step.action.clone(),
                        },
                    ))
                    .await;
            }
            GateDecision::Blocked { reason } => {
                // A blocked action charges the error budget like any failure.
                context.error_count += 1;
                warn!(%reason, action = %step.action, "action blocked by gate");
                self.messages
                    .publish(Message::event(
                        COORDINATOR,
                        MessageKind::PlanningCorrection,
                        MessagePayload::Correction {
                            corrections: vec![reason.clone()],
                        },
                    ))
                    .await;
            }
        }

        let continuation = self.engine.continuation(context);
        let status = match continuation {
            Continuation::Continue => TaskStatus::Running,
            Continuation::Completed => TaskStatus::Completed,
            Continuation::StepBudgetExhausted | Continuation::ErrorBudgetExhausted => {
                TaskStatus::Failed
            }
        };
        self.state
            .set(StateKey::TaskStatus, json!(status.as_str()))
            .await;

        Ok(StepReport {
            step,
            reflection,
            decision,
            continuation,
            status,
        })
    }

    /// Base instruction plus whatever hints the agents accumulated so far.
    pub fn render_instruction(&self, base: &str) -> String {
        let hints: ContextHints = self
            .state
            .get_as(StateKey::ContextHints)
            .unwrap_or_default();
        prompt::render_instruction(base, &hints)
    }

    /// Compact run report for diagnostics.
    pub async fn summary(&self) -> serde_json::Value {
        let guard = self.context.lock().await;
        json!({
            "run": guard.as_ref().map(|context| self.engine.summary(context)),
            "context": self.state.context_summary(),
        })
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn messages(&self) -> &MessageBus {
        &self.messages
    }
}
