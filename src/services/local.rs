//! In-process collaborators
//!
//! Used by the binary when no external infrastructure is wired in, and by tests. Each
//! one exposes a few knobs to inject the failures the orchestrator must handle.

use super::*;
use crate::component::Priority;
use crate::error::StartupError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};

fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Table-set database
pub struct LocalDatabase {
    url: String,
    tables: Mutex<BTreeSet<String>>,
    migration_tables: BTreeSet<String>,
    connect_failures: AtomicU32,
    fail_migrations: AtomicBool,
    fail_table_creation: AtomicBool,
    connect_delay: Mutex<Duration>,
    inspect_delay: Mutex<Duration>,
    connects: AtomicU32,
    open_handles: AtomicU32,
}

impl LocalDatabase {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            tables: Mutex::new(BTreeSet::new()),
            migration_tables: BTreeSet::new(),
            connect_failures: AtomicU32::new(0),
            fail_migrations: AtomicBool::new(false),
            fail_table_creation: AtomicBool::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            inspect_delay: Mutex::new(Duration::ZERO),
            connects: AtomicU32::new(0),
            open_handles: AtomicU32::new(0),
        }
    }

    /// Tables that already exist
    pub fn with_tables<I, S>(self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.lock().extend(tables.into_iter().map(Into::into));
        self
    }

    /// Tables created by running migrations
    pub fn with_migrations<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.migration_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_migrations(&self, fail: bool) {
        self.fail_migrations.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_table_creation(&self, fail: bool) {
        self.fail_table_creation.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Stall schema inspection after the connection is open
    pub fn set_inspect_delay(&self, delay: Duration) {
        *self.inspect_delay.lock() = delay;
    }

    pub fn drop_table(&self, table: &str) {
        self.tables.lock().remove(table);
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> u32 {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn tables(&self) -> BTreeSet<String> {
        self.tables.lock().clone()
    }
}

#[async_trait]
impl Database for LocalDatabase {
    async fn run_migrations(&self) -> Result<usize> {
        if self.fail_migrations.load(Ordering::SeqCst) {
            return Err(StartupError::service("database", "migration lock held"));
        }
        let mut tables = self.tables.lock();
        let before = tables.len();
        tables.extend(self.migration_tables.iter().cloned());
        Ok(tables.len() - before)
    }

    async fn connect(&self) -> Result<DatabaseHandle> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.connect_failures) {
            return Err(StartupError::service("database", "connection refused"));
        }
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(DatabaseHandle {
            id: Uuid::new_v4(),
            url: self.url.clone(),
        })
    }

    async fn missing_tables(
        &self,
        _handle: &DatabaseHandle,
        expected: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let delay = *self.inspect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let tables = self.tables.lock();
        Ok(expected.difference(&tables).cloned().collect())
    }

    async fn create_missing_tables(
        &self,
        _handle: &DatabaseHandle,
        missing: &BTreeSet<String>,
    ) -> Result<()> {
        if self.fail_table_creation.load(Ordering::SeqCst) {
            return Err(StartupError::service("database", "permission denied for schema"));
        }
        self.tables.lock().extend(missing.iter().cloned());
        Ok(())
    }

    async fn dispose(&self, handle: DatabaseHandle) -> Result<()> {
        debug!("Disposing database handle {}", handle.id);
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Cache that answers pings while healthy
pub struct LocalCache {
    url: String,
    healthy: AtomicBool,
    connect_failures: AtomicU32,
}

impl LocalCache {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            healthy: AtomicBool::new(true),
            connect_failures: AtomicU32::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn connect(&self) -> Result<CacheHandle> {
        if take_failure(&self.connect_failures) {
            return Err(StartupError::service("cache", "connection refused"));
        }
        Ok(CacheHandle {
            id: Uuid::new_v4(),
            url: self.url.clone(),
        })
    }

    async fn ping(&self, _handle: &CacheHandle) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn close(&self, handle: CacheHandle) -> Result<()> {
        debug!("Closing cache handle {}", handle.id);
        Ok(())
    }
}

/// Loads the JWT secret and any `*_API_KEY` provider credentials
#[derive(Debug, Clone)]
pub struct EnvCredentialLoader {
    pub environment_key: String,
    pub secret_key: String,
    pub provider_keys: Vec<String>,
}

impl Default for EnvCredentialLoader {
    fn default() -> Self {
        Self {
            environment_key: "ENVIRONMENT".to_string(),
            secret_key: "JWT_SECRET_KEY".to_string(),
            provider_keys: vec![
                "OPENAI_API_KEY".to_string(),
                "ANTHROPIC_API_KEY".to_string(),
                "GEMINI_API_KEY".to_string(),
            ],
        }
    }
}

#[async_trait]
impl CredentialLoader for EnvCredentialLoader {
    async fn load_from_settings(&self, settings: &dyn EnvSource) -> Option<KeyManager> {
        if !settings.is_set(&self.secret_key) {
            return None;
        }
        let mut loaded_keys = BTreeSet::from([self.secret_key.clone()]);
        loaded_keys.extend(
            self.provider_keys
                .iter()
                .filter(|key| settings.is_set(key))
                .cloned(),
        );
        Some(KeyManager {
            environment: settings.get(&self.environment_key, "development"),
            loaded_keys,
        })
    }
}

/// One provider per loaded `*_API_KEY`
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedLlmFactory;

#[async_trait]
impl LlmManagerFactory for KeyedLlmFactory {
    async fn create(&self, keys: &KeyManager) -> Result<LlmManager> {
        let providers: Vec<String> = keys
            .loaded_keys
            .iter()
            .filter_map(|key| key.strip_suffix("_API_KEY"))
            .map(|provider| provider.to_ascii_lowercase())
            .collect();

        if providers.is_empty() {
            return Err(StartupError::service(
                "llm_manager",
                "no LLM provider credentials loaded",
            ));
        }
        Ok(LlmManager { providers })
    }
}

/// Fix runner with a fixed number of fixes
#[derive(Debug, Default)]
pub struct LocalStartupFixes {
    fixes: usize,
    fail: AtomicBool,
}

impl LocalStartupFixes {
    pub fn new(fixes: usize) -> Self {
        Self {
            fixes,
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StartupFixes for LocalStartupFixes {
    async fn apply(&self, _database: &DatabaseHandle) -> Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StartupError::service("startup_fixes", "fix script raised"));
        }
        Ok(self.fixes)
    }
}

/// Socket manager that records every delivered message
#[derive(Default)]
pub struct LocalWebSocketManager {
    initialized: AtomicBool,
    deliver: AtomicBool,
    fail_initialize: AtomicBool,
    handlers: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, serde_json::Value)>>,
}

impl LocalWebSocketManager {
    pub fn new() -> Self {
        Self {
            deliver: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Simulate a manager whose sends silently go nowhere
    pub fn set_delivery(&self, deliver: bool) {
        self.deliver.store(deliver, Ordering::SeqCst);
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn handlers(&self) -> Vec<String> {
        self.handlers.lock().clone()
    }

    pub fn sent(&self) -> Vec<(String, serde_json::Value)> {
        self.sent.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSocketManager for LocalWebSocketManager {
    async fn initialize(&self) -> Result<()> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(StartupError::service("websocket", "address already in use"));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn register_handlers(&self, message_types: &[String]) -> Result<()> {
        self.handlers.lock().extend(message_types.iter().cloned());
        Ok(())
    }

    async fn send_to_channel(&self, channel: &str, message: serde_json::Value) -> bool {
        if !self.is_initialized() || !self.deliver.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push((channel.to_string(), message));
        true
    }

    async fn shutdown(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Supervisor built from the dependencies it was handed
pub struct LocalSupervisor {
    dispatcher: Option<Arc<ToolDispatcher>>,
}

impl AgentSupervisor for LocalSupervisor {
    fn tool_dispatcher(&self) -> Option<Arc<ToolDispatcher>> {
        self.dispatcher.clone()
    }
}

/// How the local factory wires the supervisor's tool dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorWiring {
    /// Use the bridged dispatcher handed in by the orchestrator
    #[default]
    Bridged,
    /// Build a private dispatcher that never sees the WebSocket bridge
    Detached,
    /// Build a supervisor without any tool dispatcher
    NoDispatcher,
}

#[derive(Debug, Default)]
pub struct LocalSupervisorFactory {
    wiring: SupervisorWiring,
}

impl LocalSupervisorFactory {
    pub fn new(wiring: SupervisorWiring) -> Self {
        Self { wiring }
    }
}

#[async_trait]
impl SupervisorFactory for LocalSupervisorFactory {
    async fn build(&self, deps: SupervisorDeps) -> Result<Arc<dyn AgentSupervisor>> {
        let dispatcher = match self.wiring {
            SupervisorWiring::Bridged => Some(deps.tool_dispatcher),
            SupervisorWiring::Detached => Some(Arc::new(ToolDispatcher::new(
                deps.tool_dispatcher.tools().to_vec(),
            ))),
            SupervisorWiring::NoDispatcher => None,
        };
        info!(
            "Agent supervisor built with {} LLM providers",
            deps.llm_manager.providers.len()
        );
        Ok(Arc::new(LocalSupervisor { dispatcher }))
    }
}

/// Background service that flips a running flag
pub struct LocalOptionalService {
    name: String,
    priority: Priority,
    dependencies: Vec<String>,
    fail: AtomicBool,
    running: AtomicBool,
}

impl LocalOptionalService {
    pub fn new<S: Into<String>>(name: S, priority: Priority) -> Self {
        Self {
            name: name.into(),
            priority,
            dependencies: Vec::new(),
            fail: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OptionalService for LocalOptionalService {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    async fn start(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StartupError::service(self.name.clone(), "backend unreachable"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// The standard optional services: analytics, tracing, background tasks,
/// index optimizer and connection monitor
pub fn default_optional_services(
    config: &crate::config::OptionalConfig,
) -> Vec<Arc<dyn OptionalService>> {
    let candidates = [
        (
            config.analytics,
            LocalOptionalService::new("analytics", Priority::Medium).depends_on(["database"]),
        ),
        (
            config.metrics,
            LocalOptionalService::new("metrics", Priority::Low),
        ),
        (
            config.background_tasks,
            LocalOptionalService::new("background_tasks", Priority::Medium)
                .depends_on(["cache"]),
        ),
        (
            config.index_optimizer,
            LocalOptionalService::new("index_optimizer", Priority::Low)
                .depends_on(["database"]),
        ),
        (
            config.connection_monitor,
            LocalOptionalService::new("connection_monitor", Priority::Low)
                .depends_on(["database", "cache"]),
        ),
    ];

    candidates
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, service)| Arc::new(service) as Arc<dyn OptionalService>)
        .collect()
}

impl Collaborators {
    /// In-process collaborators reading credentials from `env`
    pub fn local(env: Arc<dyn EnvSource>, config: &crate::config::StartupConfig) -> Self {
        let database_url = env.get("DATABASE_URL", "postgresql://localhost:5432/chat");
        let cache_url = env.get("REDIS_URL", "redis://localhost:6379/0");
        let mut tables = config.schema.critical_tables.clone();
        tables.extend(config.schema.optional_tables.iter().cloned());

        Self {
            database: Arc::new(LocalDatabase::new(database_url).with_migrations(tables)),
            cache: Arc::new(LocalCache::new(cache_url)),
            credentials: Arc::new(EnvCredentialLoader {
                environment_key: config.environment.environment_key.clone(),
                ..EnvCredentialLoader::default()
            }),
            llm: Arc::new(KeyedLlmFactory),
            fixes: Arc::new(LocalStartupFixes::new(0)),
            websocket: Arc::new(LocalWebSocketManager::new()),
            supervisor: Arc::new(LocalSupervisorFactory::default()),
            optional: default_optional_services(&config.optional),
            env,
        }
    }
}
