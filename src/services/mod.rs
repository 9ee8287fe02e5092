//! Narrow interfaces to the subsystems the orchestrator brings up
//!
//! The orchestrator never reaches into a collaborator beyond these traits. In-process
//! implementations live in [`local`].

pub mod env;
pub mod local;

use crate::error::Result;
use crate::pipeline::ToolDispatcher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

pub use env::{EnvSource, MapEnv, ProcessEnv};

/// Open database connection pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseHandle {
    pub id: Uuid,
    pub url: String,
}

/// Open cache client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHandle {
    pub id: Uuid,
    pub url: String,
}

/// Credentials loaded from settings; only key names are kept
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyManager {
    pub environment: String,
    pub loaded_keys: BTreeSet<String>,
}

/// Configured LLM providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmManager {
    pub providers: Vec<String>,
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn run_migrations(&self) -> Result<usize>;
    async fn connect(&self) -> Result<DatabaseHandle>;
    /// Subset of `expected` that does not exist
    async fn missing_tables(
        &self,
        handle: &DatabaseHandle,
        expected: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>>;
    async fn create_missing_tables(
        &self,
        handle: &DatabaseHandle,
        missing: &BTreeSet<String>,
    ) -> Result<()>;
    async fn dispose(&self, handle: DatabaseHandle) -> Result<()>;
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn connect(&self) -> Result<CacheHandle>;
    async fn ping(&self, handle: &CacheHandle) -> bool;
    async fn close(&self, handle: CacheHandle) -> Result<()>;
}

#[async_trait]
pub trait CredentialLoader: Send + Sync {
    async fn load_from_settings(&self, settings: &dyn EnvSource) -> Option<KeyManager>;
}

#[async_trait]
pub trait LlmManagerFactory: Send + Sync {
    async fn create(&self, keys: &KeyManager) -> Result<LlmManager>;
}

#[async_trait]
pub trait StartupFixes: Send + Sync {
    /// Apply idempotent data fixes, returning how many were applied
    async fn apply(&self, database: &DatabaseHandle) -> Result<usize>;
}

#[async_trait]
pub trait WebSocketManager: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn register_handlers(&self, message_types: &[String]) -> Result<()>;
    /// Deliver a message to every connection on a channel; false when it could not be sent
    async fn send_to_channel(&self, channel: &str, message: serde_json::Value) -> bool;
    async fn shutdown(&self) -> Result<()>;
}

/// Capability contract the orchestrator checks on the built supervisor
pub trait AgentSupervisor: Send + Sync {
    fn tool_dispatcher(&self) -> Option<Arc<ToolDispatcher>>;

    fn has_websocket_bridge(&self) -> bool {
        self.tool_dispatcher()
            .map(|d| d.websocket_enhanced())
            .unwrap_or(false)
    }
}

/// Everything the supervisor factory is handed
#[derive(Clone)]
pub struct SupervisorDeps {
    pub database: DatabaseHandle,
    pub llm_manager: Arc<LlmManager>,
    pub websocket_manager: Arc<dyn WebSocketManager>,
    pub tool_dispatcher: Arc<ToolDispatcher>,
}

#[async_trait]
pub trait SupervisorFactory: Send + Sync {
    async fn build(&self, deps: SupervisorDeps) -> Result<Arc<dyn AgentSupervisor>>;
}

/// Background service whose failure only degrades the system
#[async_trait]
pub trait OptionalService: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> crate::component::Priority {
        crate::component::Priority::Low
    }

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// The full set of collaborators one boot uses
#[derive(Clone)]
pub struct Collaborators {
    pub env: Arc<dyn EnvSource>,
    pub database: Arc<dyn Database>,
    pub cache: Arc<dyn Cache>,
    pub credentials: Arc<dyn CredentialLoader>,
    pub llm: Arc<dyn LlmManagerFactory>,
    pub fixes: Arc<dyn StartupFixes>,
    pub websocket: Arc<dyn WebSocketManager>,
    pub supervisor: Arc<dyn SupervisorFactory>,
    pub optional: Vec<Arc<dyn OptionalService>>,
}
