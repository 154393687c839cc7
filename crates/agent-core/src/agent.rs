//! Agent abstraction: capability tags, typed inputs and the tagged
//! process outcome.
//!
//! Agents never hold references to each other; everything they exchange
//! travels through the state store or the message bus, and `process` never
//! propagates an error — internal failures come back as a tagged outcome
//! so the coordination loop always receives a well-formed result.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pagecrew_core_types::{ActionResult, PageSnapshot, PerceptionData, ReflectionData};

/// Closed set of capability tags an agent may declare.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    // Perception
    Perception,
    PatternDetection,
    DomAnalysis,
    // Reflection
    Reflection,
    ProgressEvaluation,
    ErrorAnalysis,
    DecisionMaking,
    // Action
    ActionExecution,
    FormFilling,
    Navigation,
    ElementInteraction,
    // Planning
    Planning,
    SequentialThinking,
}

/// Static agent configuration.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub name: String,
    pub capabilities: HashSet<AgentCapability>,
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = AgentCapability>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

/// Input handed to an agent's `process`.
#[derive(Clone, Debug)]
pub enum AgentInput {
    /// A fresh page observation for perception.
    Snapshot(PageSnapshot),
    /// Material for reflection: the last action outcome and, optionally,
    /// the perception it should be evaluated against.
    Evaluation {
        action_result: Option<ActionResult>,
        perception: Option<PerceptionData>,
    },
}

/// Tagged result of one `process` call. Failures are data, not panics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessOutcome {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Deserialize the payload as perception data, if present and well-formed.
    pub fn perception(&self) -> Option<PerceptionData> {
        self.payload
            .as_ref()
            .and_then(|p| serde_json::from_value(p.clone()).ok())
    }

    /// Deserialize the payload as reflection data, if present and well-formed.
    pub fn reflection(&self) -> Option<ReflectionData> {
        self.payload
            .as_ref()
            .and_then(|p| serde_json::from_value(p.clone()).ok())
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            f.write_str("ok")
        } else {
            write!(f, "failed: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

/// A capability-tagged unit participating in a shared task.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &HashSet<AgentCapability>;

    /// Process one input. Must not panic or return early with an error:
    /// internal failures surface as `ProcessOutcome { success: false, .. }`.
    async fn process(&self, input: AgentInput) -> ProcessOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_accessors_round_trip() {
        let data = PerceptionData::default();
        let outcome = ProcessOutcome::ok(serde_json::to_value(&data).unwrap());
        assert!(outcome.success);
        assert_eq!(outcome.perception().unwrap(), data);

        let failed = ProcessOutcome::failure("no snapshot");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("no snapshot"));
        assert!(failed.perception().is_none());
        assert_eq!(failed.to_string(), "failed: no snapshot");
    }

    #[test]
    fn config_collects_capabilities() {
        let config = AgentConfig::new(
            "perception",
            [
                AgentCapability::Perception,
                AgentCapability::PatternDetection,
                AgentCapability::Perception,
            ],
        );
        assert_eq!(config.capabilities.len(), 2);
    }
}
