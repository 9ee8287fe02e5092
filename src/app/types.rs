use crate::error::StartupError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall startup state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPhase {
    NotStarted,
    Foundation,
    CoreServices,
    ChatPipeline,
    OptionalServices,
    Validation,
    Complete,
    Failed,
}

impl StartupPhase {
    /// Phases executed by a boot, in order
    pub const SEQUENCE: [StartupPhase; 5] = [
        StartupPhase::Foundation,
        StartupPhase::CoreServices,
        StartupPhase::ChatPipeline,
        StartupPhase::OptionalServices,
        StartupPhase::Validation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StartupPhase::NotStarted => "not_started",
            StartupPhase::Foundation => "foundation",
            StartupPhase::CoreServices => "core_services",
            StartupPhase::ChatPipeline => "chat_pipeline",
            StartupPhase::OptionalServices => "optional_services",
            StartupPhase::Validation => "validation",
            StartupPhase::Complete => "complete",
            StartupPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one startup step or phase
#[derive(Debug)]
pub enum StepOutcome {
    Ok,
    /// Up with reduced functionality
    Degraded(String),
    /// Abort the run
    Fatal(StartupError),
}

impl From<crate::error::Result<()>> for StepOutcome {
    fn from(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => StepOutcome::Ok,
            Err(err) => StepOutcome::Fatal(err),
        }
    }
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    UserRequest,
}
