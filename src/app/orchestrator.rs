use super::state::{AppState, StartupHandle};
use super::steps;
use super::types::{StartupPhase, StepOutcome};
use crate::config::StartupConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::manager::StartupManager;
use crate::registry::ComponentRegistry;
use crate::services::Collaborators;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared by every startup step
pub(super) struct BootContext {
    pub(super) config: StartupConfig,
    pub(super) services: Collaborators,
    pub(super) state: AppState,
    degraded: Mutex<BTreeMap<String, String>>,
}

impl BootContext {
    /// Turn a step outcome into what the initializer expects
    ///
    /// Degradation is remembered and applied once the component reached RUNNING.
    pub(super) fn settle(&self, component: &str, outcome: StepOutcome) -> Result<()> {
        match outcome {
            StepOutcome::Ok => Ok(()),
            StepOutcome::Degraded(reason) => {
                debug!("Step '{}' completed degraded: {}", component, reason);
                self.degraded.lock().insert(component.to_string(), reason);
                Ok(())
            }
            StepOutcome::Fatal(cause) => Err(cause),
        }
    }

    pub(super) fn take_degraded(&self, component: &str) -> Option<String> {
        self.degraded.lock().remove(component)
    }
}

/// Drives one process boot through the five startup phases
pub struct BootOrchestrator {
    pub(super) context: Arc<BootContext>,
    pub(super) manager: StartupManager,
    pub(super) event_bus: EventBus,
    pub(super) handle: StartupHandle,
    pub(super) phase_members: BTreeMap<StartupPhase, Vec<String>>,
    pub(super) cancellation_token: CancellationToken,
}

impl BootOrchestrator {
    /// Create an orchestrator and register every startup step as a component
    pub fn new(config: StartupConfig, services: Collaborators) -> Self {
        Self::with_event_bus(config, services, EventBus::default())
    }

    pub fn with_event_bus(config: StartupConfig, services: Collaborators, event_bus: EventBus) -> Self {
        let registry = Arc::new(ComponentRegistry::with_breaker_settings(
            config.circuit_breaker.failure_threshold,
            config.recovery_timeout(),
        ));
        let manager = StartupManager::new(Arc::clone(&registry), event_bus.clone())
            .with_shutdown_timeout(config.shutdown_timeout());

        let context = Arc::new(BootContext {
            config,
            services,
            state: AppState::default(),
            degraded: Mutex::new(BTreeMap::new()),
        });

        let phase_members = steps::register_components(&context, &manager);
        debug!(
            "Registered {} startup components across {} phases",
            registry.len(),
            phase_members.len()
        );

        Self {
            context,
            manager,
            event_bus,
            handle: StartupHandle::new(registry),
            phase_members,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &StartupConfig {
        &self.context.config
    }

    pub fn manager(&self) -> &StartupManager {
        &self.manager
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Components started by `phase`
    pub fn phase_components(&self, phase: StartupPhase) -> &[String] {
        self.phase_members
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
