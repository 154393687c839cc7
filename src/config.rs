//! Coordinator configuration.

use serde::{Deserialize, Serialize};

/// Tunables of a coordination run. `Default` carries the shipped budgets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Hard cap on thinking steps per task.
    pub max_steps: u32,
    /// Hard cap on errors per task.
    pub max_errors: u32,
    /// Capacity of the message history ring.
    pub history_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            max_errors: 3,
            history_capacity: 1000,
        }
    }
}
