//! Pagecrew: a coordination substrate for cooperating page-automation
//! agents.
//!
//! The workspace crates provide the moving parts — a pub/sub message bus,
//! a concurrency-safe state store, the perception/reflection agents and
//! the sequential thinking engine. This crate wires them into a
//! [`Coordinator`] the embedder drives one page snapshot at a time.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod gate;
pub mod prompt;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, StepReport, COORDINATOR};
pub use errors::PagecrewError;
pub use gate::{ActionGate, AllowAll, GateDecision};

pub use pagecrew_agent_core as agent_core;
pub use pagecrew_core_types as core_types;
pub use pagecrew_message_bus as message_bus;
pub use pagecrew_state_store as state_store;

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
