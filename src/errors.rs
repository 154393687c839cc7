//! Unified error type for the coordination layer.

use thiserror::Error;

use pagecrew_agent_core::AgentError;
use pagecrew_state_store::StateError;

#[derive(Debug, Error)]
pub enum PagecrewError {
    /// `step` was called before `start_task`.
    #[error("no active task")]
    NoActiveTask,

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
