pub mod app;
pub mod circuit_breaker;
pub mod component;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod initializer;
pub mod manager;
pub mod metrics;
pub mod pipeline;
pub mod recovery;
pub mod registry;
pub mod resolver;
pub mod services;

pub use app::{BootOrchestrator, StartupHandle, StartupPhase, StepOutcome};
pub use component::{ComponentSpec, ComponentStatus, Priority};
pub use config::StartupConfig;
pub use error::{FatalStartupError, Result, StartupError};
pub use events::{EventBus, StartupEvent};
pub use health::{HealthReport, ValidationCheck, ValidationReport};
pub use manager::StartupManager;
pub use registry::{ComponentRegistry, StatusSnapshot};
pub use resolver::Resolution;
