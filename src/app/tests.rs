use super::*;
use crate::component::{ComponentStatus, Priority};
use crate::config::StartupConfig;
use crate::error::{Result, StartupError};
use crate::events::StartupEvent;
use crate::services::local::{
    LocalCache, LocalDatabase, LocalOptionalService, LocalSupervisorFactory,
    LocalWebSocketManager, SupervisorWiring,
};
use crate::services::{Collaborators, MapEnv, OptionalService};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

fn create_test_env() -> MapEnv {
    MapEnv::from_pairs([
        ("ENVIRONMENT", "development"),
        ("DATABASE_URL", "postgresql://localhost:5432/chat"),
        ("REDIS_URL", "redis://localhost:6379/0"),
        ("JWT_SECRET_KEY", "test-secret"),
        ("OPENAI_API_KEY", "sk-test"),
    ])
}

fn all_tables(config: &StartupConfig) -> Vec<String> {
    let mut tables = config.schema.critical_tables.clone();
    tables.extend(config.schema.optional_tables.iter().cloned());
    tables
}

struct Fixture {
    config: StartupConfig,
    env: MapEnv,
    database: Arc<LocalDatabase>,
    cache: Arc<LocalCache>,
    websocket: Arc<LocalWebSocketManager>,
    wiring: SupervisorWiring,
    optional: Vec<Arc<dyn OptionalService>>,
}

impl Fixture {
    fn new() -> Self {
        let config = StartupConfig::default();
        let database = LocalDatabase::new("postgresql://localhost:5432/chat")
            .with_migrations(all_tables(&config));
        Self {
            database: Arc::new(database),
            cache: Arc::new(LocalCache::new("redis://localhost:6379/0")),
            websocket: Arc::new(LocalWebSocketManager::new()),
            wiring: SupervisorWiring::Bridged,
            optional: Vec::new(),
            env: create_test_env(),
            config,
        }
    }

    fn with_database(mut self, database: LocalDatabase) -> Self {
        self.database = Arc::new(database);
        self
    }

    fn orchestrator(&self) -> BootOrchestrator {
        let services = Collaborators {
            database: self.database.clone(),
            cache: self.cache.clone(),
            websocket: self.websocket.clone(),
            supervisor: Arc::new(LocalSupervisorFactory::new(self.wiring)),
            optional: self.optional.clone(),
            ..Collaborators::local(Arc::new(self.env.clone()), &self.config)
        };
        BootOrchestrator::new(self.config.clone(), services)
    }
}

fn drain(receiver: &mut broadcast::Receiver<StartupEvent>) -> Vec<StartupEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn phases_entered(events: &[StartupEvent]) -> Vec<StartupPhase> {
    events
        .iter()
        .filter_map(|event| match event {
            StartupEvent::PhaseEntered { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

fn status_of(orchestrator: &BootOrchestrator, component: &str) -> Option<ComponentStatus> {
    orchestrator.manager().registry().status(component)
}

#[tokio::test(start_paused = true)]
async fn test_full_boot_reaches_ready() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    let mut events = orchestrator.event_bus().subscribe();

    assert_eq!(orchestrator.phase(), StartupPhase::NotStarted);
    assert!(!orchestrator.is_ready());

    orchestrator.start().await.unwrap();

    assert_eq!(orchestrator.phase(), StartupPhase::Complete);
    assert!(orchestrator.is_ready());
    assert!(orchestrator.state().missing_critical_slots().is_empty());

    let health = orchestrator.handle().health();
    assert!(health.healthy);
    let status = orchestrator.handle().status();
    assert!(status.initialized);
    for name in ["database", "cache", "key_manager", "llm_manager", "agent_supervisor"] {
        assert_eq!(status.components[name].status, ComponentStatus::Running);
    }

    let sent = fixture.websocket.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "startup-validation");
    assert_eq!(sent[0].1["type"], "startup_probe");
    assert_eq!(
        fixture.websocket.handlers(),
        fixture.config.websocket.message_handlers
    );

    let events = drain(&mut events);
    assert_eq!(phases_entered(&events), StartupPhase::SEQUENCE.to_vec());
    assert!(matches!(events.last(), Some(StartupEvent::Ready { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_dependencies_start_before_dependents() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();

    let resolution = orchestrator.manager().resolve_order();
    let position = |name: &str| resolution.position(name).unwrap();
    assert!(position("migrations") < position("database"));
    assert!(position("database") < position("startup_fixes"));
    assert!(position("key_manager") < position("llm_manager"));
    assert!(position("websocket_manager") < position("websocket_bridge"));
    assert!(position("tool_dispatcher") < position("websocket_bridge"));
    assert!(position("websocket_bridge") < position("agent_supervisor"));
    assert!(position("agent_supervisor") < position("message_router"));
    assert!(resolution.cyclic.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_flag_in_staging_fails_before_other_phases() {
    let mut fixture = Fixture::new();
    fixture.env = MapEnv::from_pairs([
        ("ENVIRONMENT", "staging"),
        ("DATABASE_URL", "postgresql://db.internal:5432/chat"),
        ("REDIS_URL", "redis://cache.internal:6379/0"),
        ("JWT_SECRET_KEY", "staging-secret"),
        ("OPENAI_API_KEY", "sk-staging"),
        ("TESTING", "true"),
    ]);
    let orchestrator = fixture.orchestrator();
    let mut events = orchestrator.event_bus().subscribe();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::Foundation);
    assert!(matches!(err.cause, StartupError::ConfigurationViolation { .. }));
    assert_eq!(orchestrator.phase(), StartupPhase::Failed);
    assert!(!orchestrator.is_ready());
    assert!(orchestrator.handle().last_error().unwrap().contains("TESTING"));

    // Nothing was touched, not even the best-effort migrations
    assert!(fixture.database.tables().is_empty());
    assert_eq!(fixture.database.connect_count(), 0);
    assert_eq!(status_of(&orchestrator, "migrations"), Some(ComponentStatus::NotStarted));
    assert_eq!(status_of(&orchestrator, "database"), Some(ComponentStatus::NotStarted));

    let events = drain(&mut events);
    assert_eq!(phases_entered(&events), vec![StartupPhase::Foundation]);
    assert!(matches!(
        events.last(),
        Some(StartupEvent::StartupFailed {
            phase: StartupPhase::Foundation,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failing_database_aborts_core_services() {
    let fixture = Fixture::new();
    fixture.database.fail_next_connects(u32::MAX);
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::CoreServices);
    assert!(matches!(err.cause, StartupError::ComponentFailed { .. }));
    assert!(err.to_string().contains("database"));
    assert_eq!(fixture.database.connect_count(), 3);
    assert_eq!(status_of(&orchestrator, "database"), Some(ComponentStatus::Failed));
    assert_eq!(status_of(&orchestrator, "startup_fixes"), Some(ComponentStatus::NotStarted));
    assert_eq!(status_of(&orchestrator, "agent_supervisor"), Some(ComponentStatus::NotStarted));
    assert!(!orchestrator.state().database.is_set());
    assert!(!orchestrator.is_ready());
    assert!(!orchestrator.handle().health().healthy);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_database_recovers_with_retries() {
    let fixture = Fixture::new();
    fixture.database.fail_next_connects(2);
    let orchestrator = fixture.orchestrator();

    orchestrator.start().await.unwrap();

    let status = orchestrator.handle().status();
    assert_eq!(status.components["database"].status, ComponentStatus::Running);
    assert_eq!(status.components["database"].retry_count, 2);
    assert_eq!(fixture.database.open_handles(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_optional_failure_keeps_service_healthy() {
    let mut fixture = Fixture::new();
    let analytics = Arc::new(
        LocalOptionalService::new("analytics", Priority::Medium).depends_on(["database"]),
    );
    fixture.optional = vec![
        analytics.clone(),
        Arc::new(LocalOptionalService::new("optional_metrics", Priority::Low).failing()),
    ];
    let orchestrator = fixture.orchestrator();

    orchestrator.start().await.unwrap();

    assert!(orchestrator.is_ready());
    assert!(orchestrator.handle().health().healthy);
    assert!(analytics.is_running());
    assert_eq!(status_of(&orchestrator, "optional_metrics"), Some(ComponentStatus::Failed));

    let started = orchestrator.state().optional_services();
    assert!(started.contains("analytics"));
    assert!(!started.contains("optional_metrics"));
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_without_websocket_events_fails_validation() {
    let mut fixture = Fixture::new();
    fixture.wiring = SupervisorWiring::Detached;
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::Validation);
    match &err.cause {
        StartupError::Validation { message } => assert!(message.contains("websocket_enhanced")),
        other => panic!("Unexpected cause: {}", other),
    }
    // The pipeline itself came up without raising
    assert_eq!(status_of(&orchestrator, "agent_supervisor"), Some(ComponentStatus::Running));
    assert_eq!(orchestrator.phase(), StartupPhase::Failed);
    assert!(!orchestrator.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_without_dispatcher_fails_pipeline() {
    let mut fixture = Fixture::new();
    fixture.wiring = SupervisorWiring::NoDispatcher;
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::ChatPipeline);
    assert!(err.to_string().contains("agent_supervisor"));
    assert_eq!(status_of(&orchestrator, "agent_supervisor"), Some(ComponentStatus::Failed));
    assert_eq!(status_of(&orchestrator, "message_router"), Some(ComponentStatus::NotStarted));
}

#[tokio::test(start_paused = true)]
async fn test_undelivered_probe_fails_validation() {
    let fixture = Fixture::new();
    fixture.websocket.set_delivery(false);
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::Validation);
    assert!(err.to_string().contains("websocket_probe"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_migrations_are_swallowed() {
    let config = StartupConfig::default();
    let database = LocalDatabase::new("postgresql://localhost:5432/chat").with_tables(all_tables(&config));
    database.set_fail_migrations(true);
    let fixture = Fixture::new().with_database(database);
    let orchestrator = fixture.orchestrator();

    orchestrator.start().await.unwrap();

    assert_eq!(status_of(&orchestrator, "migrations"), Some(ComponentStatus::Degraded));
    assert_eq!(status_of(&orchestrator, "database"), Some(ComponentStatus::Running));
    assert!(orchestrator.handle().health().healthy);
}

#[tokio::test(start_paused = true)]
async fn test_missing_critical_tables_abort_core_services() {
    let database = LocalDatabase::new("postgresql://localhost:5432/chat").with_tables(["users"]);
    database.set_fail_migrations(true);
    let fixture = Fixture::new().with_database(database);
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::CoreServices);
    assert!(err.to_string().contains("critical tables missing"));
    assert_eq!(fixture.database.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_uncreatable_optional_tables_degrade_database() {
    let config = StartupConfig::default();
    let database = LocalDatabase::new("postgresql://localhost:5432/chat")
        .with_tables(config.schema.critical_tables.clone());
    database.set_fail_migrations(true);
    database.set_fail_table_creation(true);
    let fixture = Fixture::new().with_database(database);
    let orchestrator = fixture.orchestrator();

    orchestrator.start().await.unwrap();

    assert!(orchestrator.is_ready());
    assert_eq!(status_of(&orchestrator, "database"), Some(ComponentStatus::Degraded));
    assert_eq!(orchestrator.manager().metrics().degraded(), 2);
}

struct ReadinessProbe {
    handle: Arc<Mutex<Option<StartupHandle>>>,
    seen: Arc<Mutex<Vec<(StartupPhase, bool)>>>,
}

#[async_trait]
impl OptionalService for ReadinessProbe {
    fn name(&self) -> &str {
        "readiness_probe"
    }

    async fn start(&self) -> Result<()> {
        let handle = self.handle.lock().clone();
        if let Some(handle) = handle {
            self.seen.lock().push((handle.phase(), handle.is_ready()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_not_ready_until_validation_passes() {
    let handle = Arc::new(Mutex::new(None));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut fixture = Fixture::new();
    fixture.optional = vec![Arc::new(ReadinessProbe {
        handle: Arc::clone(&handle),
        seen: Arc::clone(&seen),
    })];
    let orchestrator = fixture.orchestrator();
    *handle.lock() = Some(orchestrator.handle());

    orchestrator.start().await.unwrap();

    assert_eq!(*seen.lock(), vec![(StartupPhase::OptionalServices, false)]);
    assert!(orchestrator.handle().is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_everything() {
    let mut fixture = Fixture::new();
    let analytics = Arc::new(LocalOptionalService::new("analytics", Priority::Medium));
    fixture.optional = vec![analytics.clone()];
    let orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();
    assert!(fixture.websocket.is_initialized());

    let exit_code = orchestrator.shutdown().await;

    assert_eq!(exit_code, 0);
    assert!(!orchestrator.is_ready());
    assert!(!fixture.websocket.is_initialized());
    assert!(!analytics.is_running());
    assert_eq!(fixture.database.open_handles(), 0);
    assert!(!orchestrator.state().database.is_set());
    assert!(!orchestrator.state().cache.is_set());
    assert_eq!(status_of(&orchestrator, "database"), Some(ComponentStatus::Stopped));
    assert!(!orchestrator.handle().status().initialized);
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_after_shutdown_request() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();

    orchestrator.request_shutdown();
    let exit_code = orchestrator.run().await.unwrap();
    assert_eq!(exit_code, 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_requires_completed_startup() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    assert!(matches!(
        orchestrator.run().await,
        Err(StartupError::System { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_start_is_single_use() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();

    let err = orchestrator.start().await.unwrap_err();
    assert_eq!(err.phase, StartupPhase::Complete);
    assert!(orchestrator.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_status_report_serializes() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();
    orchestrator.start().await.unwrap();

    let report = serde_json::to_value(orchestrator.handle().report()).unwrap();
    assert_eq!(report["phase"], "complete");
    assert_eq!(report["ready"], true);
    assert_eq!(report["health"]["healthy"], true);
    assert_eq!(report["status"]["components"]["database"]["status"], "running");
    assert_eq!(report["status"]["components"]["database"]["priority"], "critical");
}

#[tokio::test(start_paused = true)]
async fn test_hanging_database_times_out() {
    let mut fixture = Fixture::new();
    fixture.config.timeouts.database_secs = 1;
    fixture.database.set_connect_delay(std::time::Duration::from_secs(5));
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::CoreServices);
    assert!(err.to_string().contains("timed out"));
    assert_eq!(fixture.database.connect_count(), 3);
    assert_eq!(fixture.database.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_cache_aborts_core_services() {
    let fixture = Fixture::new();
    fixture.cache.set_healthy(false);
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();

    assert_eq!(err.phase, StartupPhase::CoreServices);
    assert!(err.to_string().contains("cache"));
    assert_eq!(status_of(&orchestrator, "cache"), Some(ComponentStatus::Failed));
    assert!(!orchestrator.state().cache.is_set());

    assert_eq!(orchestrator.shutdown().await, 0);
    assert_eq!(fixture.database.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_schema_check_releases_handles() {
    let mut fixture = Fixture::new();
    fixture.config.timeouts.database_secs = 1;
    fixture.database.set_inspect_delay(std::time::Duration::from_secs(60));
    let orchestrator = fixture.orchestrator();

    let err = orchestrator.start().await.unwrap_err();
    assert_eq!(err.phase, StartupPhase::CoreServices);
    assert!(err.to_string().contains("timed out"));
    assert_eq!(fixture.database.connect_count(), 3);
    assert_eq!(fixture.database.open_handles(), 0);
    assert!(orchestrator.state().database.get().is_none());

    assert_eq!(orchestrator.shutdown().await, 0);
    assert_eq!(fixture.database.open_handles(), 0);
}
