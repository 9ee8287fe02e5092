use std::time::Duration;
use thiserror::Error;

use crate::app::StartupPhase;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Configuration violation: {message}")]
    ConfigurationViolation { message: String },

    #[error("{component} timed out after {timeout:?}")]
    Timeout { component: String, timeout: Duration },

    #[error("Service error in {service}: {message}")]
    Service { service: String, message: String },

    #[error("Postcondition violated for {component}: {message}")]
    Postcondition { component: String, message: String },

    #[error("Circuit breaker open for {component}")]
    CircuitOpen { component: String },

    #[error("{component} depends on {dependency}, which is not running")]
    DependencyFailed {
        component: String,
        dependency: String,
    },

    #[error("Component {component} failed to start: {message}")]
    ComponentFailed { component: String, message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl StartupError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn violation<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationViolation {
            message: message.into(),
        }
    }

    pub fn service<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn postcondition<S: Into<String>, M: Into<String>>(component: S, message: M) -> Self {
        Self::Postcondition {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn component_failed<S: Into<String>, M: Into<String>>(component: S, message: M) -> Self {
        Self::ComponentFailed {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether another attempt of the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StartupError::Timeout { .. } | StartupError::Service { .. } | StartupError::Io(_)
        )
    }
}

/// The only error that leaves the top-level startup entry point
#[derive(Error, Debug)]
#[error("Startup aborted during {phase}: {cause}")]
pub struct FatalStartupError {
    pub phase: StartupPhase,
    #[source]
    pub cause: StartupError,
}

impl FatalStartupError {
    pub fn new(phase: StartupPhase, cause: StartupError) -> Self {
        Self { phase, cause }
    }
}

pub type Result<T> = std::result::Result<T, StartupError>;
