//! Sequential thinking engine.
//!
//! Each cycle appends one immutable [`ThoughtStep`] derived from the
//! latest perception and reflection, then the continuation check decides
//! whether the loop keeps running. The context is owned by the caller and
//! passed explicitly; the engine itself is stateless between calls.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use pagecrew_core_types::{PerceptionData, ReflectionData, StateKey, ThoughtStep};
use pagecrew_message_bus::{Message, MessageBus, MessageKind, MessagePayload};
use pagecrew_state_store::SharedState;

use crate::AgentError;

/// Mutable state of one reasoning run. Steps only grow; budgets are fixed
/// at creation.
#[derive(Clone, Debug)]
pub struct ThinkingContext {
    pub task: String,
    pub steps: Vec<ThoughtStep>,
    pub error_count: u32,
    pub completed: bool,
    pub max_steps: u32,
    pub max_errors: u32,
}

impl ThinkingContext {
    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn last_step(&self) -> Option<&ThoughtStep> {
        self.steps.last()
    }
}

/// Why the loop keeps running or stops. Budget exhaustion is checked
/// before completion, so a run that completes on its final permitted step
/// still reports the exhausted budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Continuation {
    Continue,
    StepBudgetExhausted,
    ErrorBudgetExhausted,
    Completed,
}

impl Continuation {
    pub fn should_continue(&self) -> bool {
        matches!(self, Continuation::Continue)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Continuation::Continue => "in progress",
            Continuation::StepBudgetExhausted => "step budget exhausted",
            Continuation::ErrorBudgetExhausted => "error budget exhausted",
            Continuation::Completed => "task completed",
        }
    }
}

/// Derives thought steps and persists the chain. Owns no run state.
pub struct ThinkingEngine {
    messages: MessageBus,
    state: Arc<SharedState>,
}

pub const THINKING_ENGINE: &str = "thinking";

impl ThinkingEngine {
    pub fn new(messages: MessageBus, state: Arc<SharedState>) -> Self {
        Self { messages, state }
    }

    pub fn create_context(
        &self,
        task: impl Into<String>,
        max_steps: u32,
        max_errors: u32,
    ) -> ThinkingContext {
        ThinkingContext {
            task: task.into(),
            steps: Vec::new(),
            error_count: 0,
            completed: false,
            max_steps,
            max_errors,
        }
    }

    /// Run one thinking cycle: derive the five parts of a step, append it
    /// to the context, persist the chain and announce the step.
    pub async fn think_step(
        &self,
        context: &mut ThinkingContext,
        perception: &PerceptionData,
        reflection: &ReflectionData,
    ) -> Result<ThoughtStep, AgentError> {
        let step_number = context.step_count() + 1;

        let thought = self.derive_thought(context, reflection);
        let observation = Self::derive_observation(perception);
        let action = self.derive_action(context, perception, reflection);
        let reflection_text = Self::derive_reflection(reflection);
        let next_thought = Self::derive_next_thought(context, reflection);

        let mut step = ThoughtStep::new(step_number, thought, observation, action);
        step.reflection = Some(reflection_text);
        step.next_thought = Some(next_thought);
        step.confidence = reflection.confidence;

        context.steps.push(step.clone());

        self.state
            .set_as(StateKey::ThoughtChain, &context.steps)
            .await?;
        self.state
            .set(StateKey::NextStep, json!(step.action))
            .await;

        self.messages
            .publish(Message::event(
                THINKING_ENGINE,
                MessageKind::PlanningStepCreated,
                MessagePayload::StepCreated(step.clone()),
            ))
            .await;

        debug!(step = step_number, action = %step.action, "thought step recorded");
        Ok(step)
    }

    /// An error in the last cycle dominates the thought and burns one unit
    /// of the error budget; otherwise the thought restates where the task
    /// stands, naming the current page when one is known.
    fn derive_thought(&self, context: &mut ThinkingContext, reflection: &ReflectionData) -> String {
        if !reflection.action_successful || !reflection.errors.is_empty() {
            context.error_count += 1;
            let error = reflection
                .errors
                .first()
                .map(String::as_str)
                .unwrap_or("the last action failed");
            return format!("The last cycle hit a problem ({error}); adjusting the approach");
        }
        let mut thought = if context.steps.is_empty() {
            format!("Starting task: {}", context.task)
        } else {
            format!(
                "Continuing the task, progress at {:.1}",
                reflection.progress_score
            )
        };
        if let Some(url) = self
            .state
            .get_as::<String>(StateKey::CurrentUrl)
            .filter(|url| !url.is_empty())
        {
            thought.push_str(&format!("; currently on {url}"));
        }
        thought
    }

    fn derive_observation(perception: &PerceptionData) -> String {
        // An open modal outranks everything else on the page.
        if perception.modal_detected {
            return "A modal dialog is blocking the page".to_owned();
        }
        if perception.observations.is_empty() {
            format!("On a {} page", perception.page_type)
        } else {
            perception.observations.join("; ")
        }
    }

    /// A stored plan that still covers the upcoming step is followed
    /// verbatim; past its end (or without one) an open modal wins, then
    /// the reflection's decision.
    fn derive_action(
        &self,
        context: &ThinkingContext,
        perception: &PerceptionData,
        reflection: &ReflectionData,
    ) -> String {
        if let Some(plan) = self.state.get_as::<Vec<String>>(StateKey::CurrentPlan) {
            if let Some(planned) = plan.get(context.steps.len()) {
                return planned.clone();
            }
        }
        if perception.modal_detected {
            return "Close the modal dialog".to_owned();
        }
        reflection
            .next_action
            .clone()
            .unwrap_or_else(|| "Assess the current page".to_owned())
    }

    fn derive_reflection(reflection: &ReflectionData) -> String {
        if reflection.action_successful {
            format!("Progress at {:.1}", reflection.progress_score)
        } else {
            format!(
                "Last action failed: {}",
                reflection.errors.first().map(String::as_str).unwrap_or("unknown")
            )
        }
    }

    fn derive_next_thought(context: &mut ThinkingContext, reflection: &ReflectionData) -> String {
        if reflection.progress_score >= 1.0 {
            context.completed = true;
            return "The task goal is reached; wrapping up".to_owned();
        }
        if !reflection.action_successful || !reflection.errors.is_empty() {
            return "The last action failed; trying an alternate approach".to_owned();
        }
        match &reflection.next_action {
            Some(action) => format!("Next: {action}"),
            None => "Re-evaluate the page after the next observation".to_owned(),
        }
    }

    /// Budget checks run in a fixed order: steps, then errors, then
    /// completion.
    pub fn continuation(&self, context: &ThinkingContext) -> Continuation {
        let continuation = if context.step_count() >= context.max_steps {
            Continuation::StepBudgetExhausted
        } else if context.error_count >= context.max_errors {
            Continuation::ErrorBudgetExhausted
        } else if context.completed {
            Continuation::Completed
        } else {
            Continuation::Continue
        };
        if !continuation.should_continue() {
            info!(reason = continuation.reason(), "thinking loop stops");
        }
        continuation
    }

    /// Compact view of a run for diagnostics and the final report.
    pub fn summary(&self, context: &ThinkingContext) -> serde_json::Value {
        json!({
            "task": context.task,
            "steps": context.step_count(),
            "error_count": context.error_count,
            "completed": context.completed,
            "last_action": context.last_step().map(|s| s.action.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pagecrew_core_types::PageType;
    use pagecrew_message_bus::EventBus;

    fn engine() -> (ThinkingEngine, Arc<SharedState>) {
        let bus = EventBus::new(64);
        let state = SharedState::new();
        (
            ThinkingEngine::new(MessageBus::new(bus), Arc::clone(&state)),
            state,
        )
    }

    fn reflection_with_progress(progress: f32) -> ReflectionData {
        ReflectionData {
            progress_score: progress,
            next_action: Some("Proceed to checkout".to_owned()),
            confidence: 0.7,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn steps_are_numbered_and_persisted() {
        let (engine, state) = engine();
        let mut context = engine.create_context("buy pizza", 10, 3);

        let perception = PerceptionData {
            page_type: PageType::Cart,
            ..Default::default()
        };
        let first = engine
            .think_step(&mut context, &perception, &reflection_with_progress(0.6))
            .await
            .unwrap();
        let second = engine
            .think_step(&mut context, &perception, &reflection_with_progress(0.8))
            .await
            .unwrap();

        assert_eq!(first.step_number, 1);
        assert_eq!(second.step_number, 2);
        assert!(first.thought.starts_with("Starting task"));
        assert!(second.thought.starts_with("Continuing"));

        let chain: Vec<ThoughtStep> = state.get_as(StateKey::ThoughtChain).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(state.get(StateKey::NextStep), Some(json!("Proceed to checkout")));
    }

    #[tokio::test]
    async fn failed_reflection_burns_error_budget() {
        let (engine, _state) = engine();
        let mut context = engine.create_context("buy pizza", 10, 3);

        let reflection = ReflectionData {
            action_successful: false,
            errors: vec!["element not found".to_owned()],
            ..Default::default()
        };
        engine
            .think_step(&mut context, &PerceptionData::default(), &reflection)
            .await
            .unwrap();

        assert_eq!(context.error_count, 1);
        assert!(context.steps[0].thought.contains("element not found"));
    }

    #[tokio::test]
    async fn modal_takes_priority_in_observation_and_action() {
        let (engine, _state) = engine();
        let mut context = engine.create_context("buy pizza", 10, 3);

        let perception = PerceptionData {
            modal_detected: true,
            ..Default::default()
        };
        let step = engine
            .think_step(&mut context, &perception, &reflection_with_progress(0.4))
            .await
            .unwrap();

        assert_eq!(step.observation, "A modal dialog is blocking the page");
        assert_eq!(step.action, "Close the modal dialog");
    }

    #[tokio::test]
    async fn stored_plan_drives_the_action_while_it_covers_the_step() {
        let (engine, state) = engine();
        state
            .set(
                StateKey::CurrentPlan,
                json!(["Open the pizza category", "Pick the margherita"]),
            )
            .await;
        let mut context = engine.create_context("buy pizza", 10, 3);

        let first = engine
            .think_step(
                &mut context,
                &PerceptionData::default(),
                &reflection_with_progress(0.2),
            )
            .await
            .unwrap();
        assert_eq!(first.action, "Open the pizza category");

        let second = engine
            .think_step(
                &mut context,
                &PerceptionData::default(),
                &reflection_with_progress(0.4),
            )
            .await
            .unwrap();
        assert_eq!(second.action, "Pick the margherita");

        // Past the plan's end the reflection's decision takes over.
        let third = engine
            .think_step(
                &mut context,
                &PerceptionData::default(),
                &reflection_with_progress(0.6),
            )
            .await
            .unwrap();
        assert_eq!(third.action, "Proceed to checkout");
    }

    #[tokio::test]
    async fn planned_action_outranks_an_open_modal() {
        let (engine, state) = engine();
        state
            .set(StateKey::CurrentPlan, json!(["Open the pizza category"]))
            .await;
        let mut context = engine.create_context("buy pizza", 10, 3);

        let perception = PerceptionData {
            modal_detected: true,
            ..Default::default()
        };
        let step = engine
            .think_step(&mut context, &perception, &reflection_with_progress(0.2))
            .await
            .unwrap();
        assert_eq!(step.action, "Open the pizza category");
    }

    #[tokio::test]
    async fn failed_cycle_hints_an_alternate_approach() {
        let (engine, _state) = engine();
        let mut context = engine.create_context("buy pizza", 10, 3);

        let reflection = ReflectionData {
            action_successful: false,
            errors: vec!["element not found".to_owned()],
            next_action: Some("Explore the page".to_owned()),
            ..Default::default()
        };
        let step = engine
            .think_step(&mut context, &PerceptionData::default(), &reflection)
            .await
            .unwrap();

        assert_eq!(
            step.next_thought.as_deref(),
            Some("The last action failed; trying an alternate approach")
        );
    }

    #[tokio::test]
    async fn thought_names_the_current_page() {
        let (engine, state) = engine();
        state
            .set(StateKey::CurrentUrl, json!("https://shop.example/cart"))
            .await;
        let mut context = engine.create_context("buy pizza", 10, 3);

        let step = engine
            .think_step(
                &mut context,
                &PerceptionData::default(),
                &reflection_with_progress(0.6),
            )
            .await
            .unwrap();
        assert_eq!(
            step.thought,
            "Starting task: buy pizza; currently on https://shop.example/cart"
        );
    }

    #[tokio::test]
    async fn full_progress_marks_context_completed() {
        let (engine, _state) = engine();
        let mut context = engine.create_context("buy pizza", 10, 3);

        engine
            .think_step(
                &mut context,
                &PerceptionData::default(),
                &reflection_with_progress(1.0),
            )
            .await
            .unwrap();

        assert!(context.completed);
        assert_eq!(engine.continuation(&context), Continuation::Completed);
    }

    #[tokio::test]
    async fn budget_checks_run_steps_then_errors_then_completion() {
        let (engine, _state) = engine();

        // All three stop conditions at once: step budget wins.
        let mut context = engine.create_context("buy pizza", 1, 1);
        context.error_count = 1;
        context.completed = true;
        context.steps.push(ThoughtStep::new(1, "t", "o", "a"));
        assert_eq!(
            engine.continuation(&context),
            Continuation::StepBudgetExhausted
        );

        // Errors beat completion when steps remain.
        let mut context = engine.create_context("buy pizza", 10, 1);
        context.error_count = 1;
        context.completed = true;
        assert_eq!(
            engine.continuation(&context),
            Continuation::ErrorBudgetExhausted
        );

        let context = engine.create_context("buy pizza", 10, 3);
        assert_eq!(engine.continuation(&context), Continuation::Continue);
    }

    #[tokio::test]
    async fn summary_reports_the_run() {
        let (engine, _state) = engine();
        let mut context = engine.create_context("buy pizza", 10, 3);
        engine
            .think_step(
                &mut context,
                &PerceptionData::default(),
                &reflection_with_progress(0.4),
            )
            .await
            .unwrap();

        let summary = engine.summary(&context);
        assert_eq!(summary["task"], json!("buy pizza"));
        assert_eq!(summary["steps"], json!(1));
        assert_eq!(summary["completed"], json!(false));
        assert_eq!(summary["last_action"], json!("Proceed to checkout"));
    }
}
