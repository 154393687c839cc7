//! Shared primitives for the pagecrew coordination substrate.
//!
//! Everything that crosses a component boundary lives here: the well-known
//! state keys, page classification, the perception/reflection records the
//! agents exchange, thought steps and the bounded context hints handed to
//! the external instruction renderer.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a task run, readable at any time from the state store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known keys of the shared state store. The set is closed: agents
/// never invent keys at runtime, so readers can match exhaustively.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    // Task context
    TaskDescription,
    TaskGoal,
    TaskStatus,
    // Browser state
    CurrentUrl,
    PageTitle,
    DomContent,
    // Perception data
    PerceptionResult,
    DetectedPatterns,
    InteractiveElements,
    // Reflection data
    ReflectionResult,
    ProgressScore,
    ActionHistory,
    ErrorHistory,
    // Action data
    LastAction,
    LastActionResult,
    PendingActions,
    // Planning
    CurrentPlan,
    NextStep,
    ThoughtChain,
    // User/session state
    UserLoggedIn,
    CartItems,
    CheckoutStage,
    // Aggregated hints for the instruction renderer
    ContextHints,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::TaskDescription => "task_description",
            StateKey::TaskGoal => "task_goal",
            StateKey::TaskStatus => "task_status",
            StateKey::CurrentUrl => "current_url",
            StateKey::PageTitle => "page_title",
            StateKey::DomContent => "dom_content",
            StateKey::PerceptionResult => "perception_result",
            StateKey::DetectedPatterns => "detected_patterns",
            StateKey::InteractiveElements => "interactive_elements",
            StateKey::ReflectionResult => "reflection_result",
            StateKey::ProgressScore => "progress_score",
            StateKey::ActionHistory => "action_history",
            StateKey::ErrorHistory => "error_history",
            StateKey::LastAction => "last_action",
            StateKey::LastActionResult => "last_action_result",
            StateKey::PendingActions => "pending_actions",
            StateKey::CurrentPlan => "current_plan",
            StateKey::NextStep => "next_step",
            StateKey::ThoughtChain => "thought_chain",
            StateKey::UserLoggedIn => "user_logged_in",
            StateKey::CartItems => "cart_items",
            StateKey::CheckoutStage => "checkout_stage",
            StateKey::ContextHints => "context_hints",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page classification produced by a page-understanding provider.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Catalog,
    Product,
    Cart,
    Checkout,
    Search,
    Profile,
    Login,
    /// Order confirmation / success page, terminal for acquisition flows.
    Confirmation,
    #[default]
    Unknown,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Catalog => "catalog",
            PageType::Product => "product",
            PageType::Cart => "cart",
            PageType::Checkout => "checkout",
            PageType::Search => "search",
            PageType::Profile => "profile",
            PageType::Login => "login",
            PageType::Confirmation => "confirmation",
            PageType::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, PageType::Unknown)
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category assigned to an interactive element.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCategory {
    Button,
    Link,
    Input,
    /// Buttons that advance the task (add to cart, buy, order).
    ActionButton,
    Navigation,
    #[default]
    Unknown,
}

impl ElementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementCategory::Button => "button",
            ElementCategory::Link => "link",
            ElementCategory::Input => "input",
            ElementCategory::ActionButton => "action_button",
            ElementCategory::Navigation => "navigation",
            ElementCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ElementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One interactive element as delivered by the page-inspection collaborator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Stable index within the current snapshot, if the inspector assigns one.
    pub index: Option<u32>,
    pub tag: String,
    pub text: String,
    #[serde(default)]
    pub category: ElementCategory,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ElementDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One form field detected on the page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub tag: String,
    pub input_type: String,
    pub name: String,
    pub placeholder: String,
}

/// Raw observation handed to the core by the external page inspector.
///
/// The core never parses DOM structure itself; it only consumes this
/// pre-digested snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub clickable_elements: Vec<ElementDescriptor>,
    #[serde(default)]
    pub input_elements: Vec<FormDescriptor>,
    /// Set by the inspector when it already knows a modal is open.
    #[serde(default)]
    pub modal_present: bool,
    #[serde(default)]
    pub pagination_present: bool,
}

/// Outcome of an action run by the external execution collaborator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(action: impl Into<String>) -> Self {
        Self {
            success: true,
            action: Some(action.into()),
            error: None,
        }
    }

    pub fn failed(action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action: Some(action.into()),
            error: Some(error.into()),
        }
    }
}

/// Structured findings produced by the perception agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerceptionData {
    pub page_type: PageType,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub interactive_elements: Vec<ElementDescriptor>,
    #[serde(default)]
    pub modal_detected: bool,
    #[serde(default)]
    pub pagination_detected: bool,
    #[serde(default)]
    pub forms_detected: Vec<FormDescriptor>,
    /// Classifier confidence in [0, 1].
    pub confidence: f32,
    #[serde(default)]
    pub observations: Vec<String>,
}

/// Evaluation produced by the reflection agent after each observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReflectionData {
    pub action_successful: bool,
    pub progress_made: bool,
    /// Confidence in [0, 1].
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub suggested_corrections: Vec<String>,
    pub should_continue: bool,
    pub should_correct: bool,
    /// Progress estimate in [0, 1]; 1.0 signals completion.
    pub progress_score: f32,
}

impl Default for ReflectionData {
    fn default() -> Self {
        Self {
            action_successful: true,
            progress_made: false,
            confidence: 0.0,
            next_action: None,
            reasoning: None,
            errors: Vec::new(),
            suggested_corrections: Vec::new(),
            should_continue: true,
            should_correct: false,
            progress_score: 0.0,
        }
    }
}

/// One immutable entry of the thought chain. Never mutated after it is
/// appended, so the chain can be replayed or audited later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThoughtStep {
    /// 1-based, strictly increasing within one context.
    pub step_number: u32,
    pub thought: String,
    pub observation: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_thought: Option<String>,
    pub confidence: f32,
}

impl ThoughtStep {
    pub fn new(
        step_number: u32,
        thought: impl Into<String>,
        observation: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            step_number,
            thought: thought.into(),
            observation: observation.into(),
            action: action.into(),
            reflection: None,
            next_thought: None,
            confidence: 0.5,
        }
    }
}

/// Bounds applied when rendering [`ContextHints`] into prompt context.
const MAX_HINT_OBSERVATIONS: usize = 3;
const MAX_HINT_PATTERNS: usize = 5;
const MAX_HINT_WARNINGS: usize = 2;
const MAX_HINT_CATEGORIES: usize = 4;

/// Bounded aggregation of observations, patterns and warnings handed to the
/// external instruction renderer. Deliberately carries no instructions,
/// only facts the downstream model may use.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextHints {
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggested_categories: Vec<String>,
}

impl ContextHints {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
            && self.patterns.is_empty()
            && self.warnings.is_empty()
            && self.suggested_categories.is_empty()
    }

    /// Append a warning unless an identical one is already present.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Append an observation unless an identical one is already present.
    pub fn push_observation(&mut self, observation: impl Into<String>) {
        let observation = observation.into();
        if !self.observations.contains(&observation) {
            self.observations.push(observation);
        }
    }

    /// Render the hints as a compact prompt fragment. Each section is
    /// truncated to its bound; empty sections are skipped entirely.
    pub fn to_prompt_context(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if !self.observations.is_empty() {
            let obs = self
                .observations
                .iter()
                .take(MAX_HINT_OBSERVATIONS)
                .map(|o| format!("- {o}"))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push(format!("### Observations:\n{obs}"));
        }

        if !self.patterns.is_empty() {
            let patterns = self
                .patterns
                .iter()
                .take(MAX_HINT_PATTERNS)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("### Patterns: {patterns}"));
        }

        if !self.warnings.is_empty() {
            let warnings = self
                .warnings
                .iter()
                .take(MAX_HINT_WARNINGS)
                .map(|w| format!("- {w}"))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push(format!("### Important:\n{warnings}"));
        }

        if !self.suggested_categories.is_empty() {
            let cats = self
                .suggested_categories
                .iter()
                .take(MAX_HINT_CATEGORIES)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("### Element categories: {cats}"));
        }

        parts.join("\n\n")
    }
}
