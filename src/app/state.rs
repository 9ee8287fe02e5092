use super::{BootOrchestrator, StartupPhase};
use crate::health::{self, HealthReport};
use crate::pipeline::{AgentWebSocketBridge, MessageRouter, ToolDispatcher};
use crate::registry::{ComponentRegistry, StatusSnapshot};
use crate::services::{
    AgentSupervisor, CacheHandle, DatabaseHandle, KeyManager, LlmManager, WebSocketManager,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One optional value written by a startup step
pub struct Slot<T>(RwLock<Option<T>>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(RwLock::new(None))
    }
}

impl<T: Clone> Slot<T> {
    pub fn get(&self) -> Option<T> {
        self.0.read().clone()
    }

    pub fn set(&self, value: T) {
        *self.0.write() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.0.write().take()
    }

    pub fn is_set(&self) -> bool {
        self.0.read().is_some()
    }
}

/// Everything the service needs once it accepts traffic
///
/// All named slots are critical; after validation each one must be populated.
#[derive(Default)]
pub struct AppState {
    pub database: Slot<DatabaseHandle>,
    pub cache: Slot<CacheHandle>,
    pub key_manager: Slot<Arc<KeyManager>>,
    pub llm_manager: Slot<Arc<LlmManager>>,
    pub tool_dispatcher: Slot<Arc<ToolDispatcher>>,
    pub websocket_manager: Slot<Arc<dyn WebSocketManager>>,
    pub websocket_bridge: Slot<Arc<AgentWebSocketBridge>>,
    pub agent_supervisor: Slot<Arc<dyn AgentSupervisor>>,
    pub message_router: Slot<MessageRouter>,
    optional_services: RwLock<BTreeSet<String>>,
}

impl AppState {
    /// Critical slots that are still empty
    pub fn missing_critical_slots(&self) -> Vec<&'static str> {
        [
            ("database", self.database.is_set()),
            ("cache", self.cache.is_set()),
            ("key_manager", self.key_manager.is_set()),
            ("llm_manager", self.llm_manager.is_set()),
            ("tool_dispatcher", self.tool_dispatcher.is_set()),
            ("websocket_manager", self.websocket_manager.is_set()),
            ("websocket_bridge", self.websocket_bridge.is_set()),
            ("agent_supervisor", self.agent_supervisor.is_set()),
            ("message_router", self.message_router.is_set()),
        ]
        .into_iter()
        .filter(|(_, set)| !set)
        .map(|(name, _)| name)
        .collect()
    }

    pub fn add_optional_service(&self, name: &str) {
        self.optional_services.write().insert(name.to_string());
    }

    pub fn remove_optional_service(&self, name: &str) {
        self.optional_services.write().remove(name);
    }

    /// Optional services that started successfully
    pub fn optional_services(&self) -> BTreeSet<String> {
        self.optional_services.read().clone()
    }
}

/// Serializable view for status endpoints and `--status-json`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub phase: StartupPhase,
    pub ready: bool,
    pub error: Option<String>,
    pub health: HealthReport,
    pub status: StatusSnapshot,
}

/// Cloneable read-only view of a boot in progress
#[derive(Clone)]
pub struct StartupHandle {
    phase: Arc<RwLock<StartupPhase>>,
    ready: Arc<AtomicBool>,
    error: Arc<RwLock<Option<String>>>,
    registry: Arc<ComponentRegistry>,
}

impl StartupHandle {
    pub(super) fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            phase: Arc::new(RwLock::new(StartupPhase::NotStarted)),
            ready: Arc::new(AtomicBool::new(false)),
            error: Arc::new(RwLock::new(None)),
            registry,
        }
    }

    pub fn phase(&self) -> StartupPhase {
        *self.phase.read()
    }

    /// Readiness probe; only true after validation passed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Error that aborted startup
    pub fn last_error(&self) -> Option<String> {
        self.error.read().clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.registry.get_status()
    }

    pub fn health(&self) -> HealthReport {
        health::health_check(&self.registry.get_status())
    }

    pub fn report(&self) -> StatusReport {
        let status = self.status();
        StatusReport {
            phase: self.phase(),
            ready: self.is_ready(),
            error: self.last_error(),
            health: health::health_check(&status),
            status,
        }
    }

    pub(super) fn set_phase(&self, phase: StartupPhase) {
        *self.phase.write() = phase;
        debug!("Startup phase changed to: {}", phase);
    }

    pub(super) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub(super) fn set_error(&self, error: String) {
        *self.error.write() = Some(error);
    }
}

impl BootOrchestrator {
    /// Handle for health endpoints and other observers
    pub fn handle(&self) -> StartupHandle {
        self.handle.clone()
    }

    pub fn phase(&self) -> StartupPhase {
        self.handle.phase()
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_ready()
    }

    pub fn state(&self) -> &AppState {
        &self.context.state
    }
}
