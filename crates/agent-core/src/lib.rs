//! Agent layer of the pagecrew coordination substrate: the agent trait,
//! the perception and reflection agents, page understanding, progress
//! scoring and the sequential thinking engine.

pub mod agent;
pub mod classify;
pub mod perception;
pub mod reflection;
pub mod scoring;
pub mod thinking;

use thiserror::Error;

pub use agent::{Agent, AgentCapability, AgentConfig, AgentInput, ProcessOutcome};
pub use classify::{KeywordClassifier, PageUnderstanding};
pub use perception::{PerceptionAgent, PERCEPTION_AGENT};
pub use reflection::{ReflectionAgent, REFLECTION_AGENT};
pub use scoring::{ScorePolicy, TaskIntent};
pub use thinking::{Continuation, ThinkingContext, ThinkingEngine, THINKING_ENGINE};

/// Internal agent failures. These never cross `Agent::process`, which
/// reports them as a tagged outcome instead.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
