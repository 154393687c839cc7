//! Action gate: reviews each proposed action before it is announced.
//!
//! A blocked action is an ordinary decision, not a fault; the coordinator
//! turns it into a correction and charges the error budget.

use std::sync::Arc;

use async_trait::async_trait;

use pagecrew_state_store::SharedState;

/// Verdict on a proposed action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GateDecision {
    Allowed,
    Blocked { reason: String },
}

impl GateDecision {
    pub fn blocked(reason: impl Into<String>) -> Self {
        GateDecision::Blocked {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Policy seam for vetting proposed actions against the current state.
#[async_trait]
pub trait ActionGate: Send + Sync {
    async fn review(&self, action: &str, state: &Arc<SharedState>) -> GateDecision;
}

/// Default gate: every action passes.
pub struct AllowAll;

#[async_trait]
impl ActionGate for AllowAll {
    async fn review(&self, _action: &str, _state: &Arc<SharedState>) -> GateDecision {
        GateDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_passes_everything() {
        let state = SharedState::new();
        let decision = AllowAll.review("click checkout", &state).await;
        assert!(decision.is_allowed());
    }

    #[test]
    fn blocked_carries_its_reason() {
        let decision = GateDecision::blocked("checkout disabled in this run");
        assert!(!decision.is_allowed());
        assert_eq!(
            decision,
            GateDecision::Blocked {
                reason: "checkout disabled in this run".to_owned()
            }
        );
    }
}
