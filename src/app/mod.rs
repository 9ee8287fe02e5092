mod environment;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod steps;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use environment::validate_environment;
pub use orchestrator::BootOrchestrator;
pub use state::{AppState, Slot, StartupHandle, StatusReport};
pub use types::{ShutdownReason, StartupPhase, StepOutcome};
