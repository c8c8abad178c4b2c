mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::LapsecamOrchestrator;
pub use types::{ComponentState, ShutdownReason};
