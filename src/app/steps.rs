//! Startup steps registered as components
//!
//! Every step reads its inputs from the application state and writes its product into
//! one slot. Steps are retried by the initializer, so a step that fails must leave its
//! slot empty.

use super::orchestrator::BootContext;
use super::types::{StartupPhase, StepOutcome};
use crate::component::{ComponentSpec, Priority};
use crate::error::{Result, StartupError};
use crate::manager::StartupManager;
use crate::pipeline::{AgentWebSocketBridge, MessageRouter, ToolDispatcher};
use crate::services::{OptionalService, SupervisorDeps};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Wrap a step as a component init function using the configured retry policy
fn step<F, Fut>(
    ctx: &Arc<BootContext>,
    name: &str,
    priority: Priority,
    timeout: Duration,
    step: F,
) -> ComponentSpec
where
    F: Fn(Arc<BootContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutcome> + Send + 'static,
{
    let max_retries = ctx.config.retry.max_retries;
    let (base, max) = (ctx.config.backoff_base(), ctx.config.backoff_max());
    let component = name.to_string();
    let ctx = Arc::clone(ctx);

    ComponentSpec::new(name, priority, move || {
        let ctx = Arc::clone(&ctx);
        let component = component.clone();
        let outcome = step(Arc::clone(&ctx));
        async move { ctx.settle(&component, outcome.await) }
    })
    .with_timeout(timeout)
    .with_max_retries(max_retries)
    .with_backoff(base, max)
}

fn with_cleanup<F, Fut>(spec: ComponentSpec, ctx: &Arc<BootContext>, cleanup: F) -> ComponentSpec
where
    F: Fn(Arc<BootContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    spec.with_cleanup(move || cleanup(Arc::clone(&ctx)))
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

/// Register every step and return the components of each phase
pub(super) fn register_components(
    ctx: &Arc<BootContext>,
    manager: &StartupManager,
) -> BTreeMap<StartupPhase, Vec<String>> {
    let timeouts = ctx.config.timeouts.clone();
    let mut phases: BTreeMap<StartupPhase, Vec<String>> = BTreeMap::new();
    let mut add = |phase: StartupPhase, spec: ComponentSpec| {
        phases.entry(phase).or_default().push(spec.name.clone());
        manager.register(spec);
    };

    // Foundation: migrations are best effort and never retried
    add(
        StartupPhase::Foundation,
        step(ctx, "migrations", Priority::High, secs(timeouts.migration_secs), run_migrations)
            .with_max_retries(1),
    );

    // Core services
    add(
        StartupPhase::CoreServices,
        with_cleanup(
            step(ctx, "database", Priority::Critical, secs(timeouts.database_secs), connect_database)
                .depends_on(["migrations"]),
            ctx,
            dispose_database,
        ),
    );
    add(
        StartupPhase::CoreServices,
        with_cleanup(
            step(ctx, "cache", Priority::Critical, secs(timeouts.cache_secs), connect_cache),
            ctx,
            close_cache,
        ),
    );
    add(
        StartupPhase::CoreServices,
        step(ctx, "key_manager", Priority::Critical, secs(timeouts.service_secs), load_key_manager),
    );
    add(
        StartupPhase::CoreServices,
        step(ctx, "llm_manager", Priority::Critical, secs(timeouts.service_secs), create_llm_manager)
            .depends_on(["key_manager"]),
    );
    add(
        StartupPhase::CoreServices,
        step(ctx, "startup_fixes", Priority::Critical, secs(timeouts.service_secs), apply_startup_fixes)
            .depends_on(["database"]),
    );

    // Chat pipeline
    add(
        StartupPhase::ChatPipeline,
        step(ctx, "tool_dispatcher", Priority::Critical, secs(timeouts.service_secs), create_tool_dispatcher),
    );
    add(
        StartupPhase::ChatPipeline,
        with_cleanup(
            step(ctx, "websocket_manager", Priority::Critical, secs(timeouts.websocket_secs), initialize_websocket),
            ctx,
            shutdown_websocket,
        ),
    );
    add(
        StartupPhase::ChatPipeline,
        step(ctx, "websocket_bridge", Priority::Critical, secs(timeouts.websocket_secs), integrate_bridge)
            .depends_on(["websocket_manager", "tool_dispatcher"]),
    );
    add(
        StartupPhase::ChatPipeline,
        step(ctx, "agent_supervisor", Priority::Critical, secs(timeouts.supervisor_secs), build_supervisor)
            .depends_on(["database", "llm_manager", "websocket_bridge"]),
    );
    add(
        StartupPhase::ChatPipeline,
        step(ctx, "message_router", Priority::Critical, secs(timeouts.websocket_secs), register_message_handlers)
            .depends_on(["agent_supervisor", "websocket_manager"]),
    );

    // Optional services never register as critical
    for (index, service) in ctx.services.optional.iter().enumerate() {
        let priority = service.priority().max(Priority::High);
        let spec = step(ctx, service.name(), priority, secs(timeouts.optional_secs), move |ctx| {
            start_optional(ctx, index)
        })
        .depends_on(service.dependencies());
        add(
            StartupPhase::OptionalServices,
            with_cleanup(spec, ctx, move |ctx| stop_optional(ctx, index)),
        );
    }

    phases
}

fn optional_service(ctx: &BootContext, index: usize) -> Result<Arc<dyn OptionalService>> {
    ctx.services
        .optional
        .get(index)
        .cloned()
        .ok_or_else(|| StartupError::system(format!("no optional service at index {}", index)))
}

fn missing(component: &str, slot: &str) -> StepOutcome {
    StepOutcome::Fatal(StartupError::postcondition(
        component,
        format!("{} is not available", slot),
    ))
}

fn table_set(tables: &[String]) -> BTreeSet<String> {
    tables.iter().cloned().collect()
}

fn join(tables: &BTreeSet<String>) -> String {
    tables.iter().cloned().collect::<Vec<_>>().join(", ")
}

async fn run_migrations(ctx: Arc<BootContext>) -> StepOutcome {
    match ctx.services.database.run_migrations().await {
        Ok(applied) => {
            info!("Applied {} database migrations", applied);
            StepOutcome::Ok
        }
        Err(err) => {
            warn!("Database migrations failed, continuing: {}", err);
            StepOutcome::Degraded(format!("migrations failed: {}", err))
        }
    }
}

async fn connect_database(ctx: Arc<BootContext>) -> StepOutcome {
    let database = &ctx.services.database;
    // A previous attempt cut off by its timeout may have left a handle behind
    release_database(&ctx).await;

    let handle = match database.connect().await {
        Ok(handle) => handle,
        Err(err) => return StepOutcome::Fatal(err),
    };
    // Parked in the slot so a timeout or shutdown can still dispose it
    ctx.state.database.set(handle.clone());

    let critical = table_set(&ctx.config.schema.critical_tables);
    let missing_critical = match database.missing_tables(&handle, &critical).await {
        Ok(missing) => missing,
        Err(err) => {
            release_database(&ctx).await;
            return StepOutcome::Fatal(err);
        }
    };
    if !missing_critical.is_empty() {
        release_database(&ctx).await;
        return StepOutcome::Fatal(StartupError::postcondition(
            "database",
            format!("critical tables missing: {}", join(&missing_critical)),
        ));
    }

    let optional = table_set(&ctx.config.schema.optional_tables);
    let mut outcome = StepOutcome::Ok;
    match database.missing_tables(&handle, &optional).await {
        Ok(missing) if !missing.is_empty() => {
            info!("Creating missing tables: {}", join(&missing));
            if let Err(err) = database.create_missing_tables(&handle, &missing).await {
                outcome = StepOutcome::Degraded(format!(
                    "tables {} missing and could not be created: {}",
                    join(&missing),
                    err
                ));
            }
        }
        Ok(_) => {}
        Err(err) => {
            outcome = StepOutcome::Degraded(format!("could not inspect optional tables: {}", err));
        }
    }

    info!("Database connected: {}", handle.id);
    outcome
}

async fn release_database(ctx: &BootContext) {
    if let Err(err) = dispose_database_handle(ctx).await {
        warn!("Error disposing database handle: {}", err);
    }
}

async fn dispose_database_handle(ctx: &BootContext) -> Result<()> {
    match ctx.state.database.take() {
        Some(handle) => ctx.services.database.dispose(handle).await,
        None => Ok(()),
    }
}

async fn dispose_database(ctx: Arc<BootContext>) -> Result<()> {
    dispose_database_handle(&ctx).await
}

async fn connect_cache(ctx: Arc<BootContext>) -> StepOutcome {
    let cache = &ctx.services.cache;
    let handle = match cache.connect().await {
        Ok(handle) => handle,
        Err(err) => return StepOutcome::Fatal(err),
    };
    if !cache.ping(&handle).await {
        if let Err(err) = cache.close(handle).await {
            warn!("Error closing cache handle: {}", err);
        }
        return StepOutcome::Fatal(StartupError::postcondition("cache", "ping failed"));
    }
    info!("Cache connected: {}", handle.id);
    ctx.state.cache.set(handle);
    StepOutcome::Ok
}

async fn close_cache(ctx: Arc<BootContext>) -> Result<()> {
    match ctx.state.cache.take() {
        Some(handle) => ctx.services.cache.close(handle).await,
        None => Ok(()),
    }
}

async fn load_key_manager(ctx: Arc<BootContext>) -> StepOutcome {
    match ctx
        .services
        .credentials
        .load_from_settings(ctx.services.env.as_ref())
        .await
    {
        Some(keys) => {
            info!("Key manager loaded {} keys", keys.loaded_keys.len());
            ctx.state.key_manager.set(Arc::new(keys));
            StepOutcome::Ok
        }
        None => StepOutcome::Fatal(StartupError::postcondition(
            "key_manager",
            "credential loader returned no key manager",
        )),
    }
}

async fn create_llm_manager(ctx: Arc<BootContext>) -> StepOutcome {
    let Some(keys) = ctx.state.key_manager.get() else {
        return missing("llm_manager", "key manager");
    };
    match ctx.services.llm.create(&keys).await {
        Ok(llm) => {
            info!("LLM manager ready with providers {:?}", llm.providers);
            ctx.state.llm_manager.set(Arc::new(llm));
            StepOutcome::Ok
        }
        Err(err) => StepOutcome::Fatal(err),
    }
}

async fn apply_startup_fixes(ctx: Arc<BootContext>) -> StepOutcome {
    let Some(database) = ctx.state.database.get() else {
        return missing("startup_fixes", "database");
    };
    match ctx.services.fixes.apply(&database).await {
        Ok(applied) => {
            info!("Applied {} startup fixes", applied);
            StepOutcome::Ok
        }
        Err(err) => StepOutcome::Fatal(err),
    }
}

async fn create_tool_dispatcher(ctx: Arc<BootContext>) -> StepOutcome {
    let tools = ctx.config.tools.enabled.clone();
    info!("Tool dispatcher created with {} tools", tools.len());
    ctx.state.tool_dispatcher.set(Arc::new(ToolDispatcher::new(tools)));
    StepOutcome::Ok
}

async fn initialize_websocket(ctx: Arc<BootContext>) -> StepOutcome {
    let websocket = Arc::clone(&ctx.services.websocket);
    if let Err(err) = websocket.initialize().await {
        return StepOutcome::Fatal(err);
    }
    ctx.state.websocket_manager.set(websocket);
    StepOutcome::Ok
}

async fn shutdown_websocket(ctx: Arc<BootContext>) -> Result<()> {
    match ctx.state.websocket_manager.take() {
        Some(websocket) => websocket.shutdown().await,
        None => Ok(()),
    }
}

async fn integrate_bridge(ctx: Arc<BootContext>) -> StepOutcome {
    let (Some(websocket), Some(dispatcher)) = (
        ctx.state.websocket_manager.get(),
        ctx.state.tool_dispatcher.get(),
    ) else {
        return missing("websocket_bridge", "websocket manager or tool dispatcher");
    };

    let bridge = AgentWebSocketBridge::new(websocket, dispatcher);
    if let Err(err) = bridge.integrate() {
        return StepOutcome::Fatal(err);
    }
    if !bridge.is_integrated() {
        return StepOutcome::Fatal(StartupError::postcondition(
            "websocket_bridge",
            "bridge reported success but is not integrated",
        ));
    }
    ctx.state.websocket_bridge.set(Arc::new(bridge));
    StepOutcome::Ok
}

async fn build_supervisor(ctx: Arc<BootContext>) -> StepOutcome {
    let (Some(database), Some(llm_manager), Some(bridge)) = (
        ctx.state.database.get(),
        ctx.state.llm_manager.get(),
        ctx.state.websocket_bridge.get(),
    ) else {
        return missing("agent_supervisor", "database, LLM manager or WebSocket bridge");
    };

    let deps = SupervisorDeps {
        database,
        llm_manager,
        websocket_manager: Arc::clone(bridge.websocket()),
        tool_dispatcher: Arc::clone(bridge.dispatcher()),
    };
    let supervisor = match ctx.services.supervisor.build(deps).await {
        Ok(supervisor) => supervisor,
        Err(err) => return StepOutcome::Fatal(err),
    };
    if supervisor.tool_dispatcher().is_none() {
        return StepOutcome::Fatal(StartupError::postcondition(
            "agent_supervisor",
            "supervisor exposes no tool dispatcher",
        ));
    }
    ctx.state.agent_supervisor.set(supervisor);
    StepOutcome::Ok
}

async fn register_message_handlers(ctx: Arc<BootContext>) -> StepOutcome {
    let (Some(websocket), true) = (
        ctx.state.websocket_manager.get(),
        ctx.state.agent_supervisor.is_set(),
    ) else {
        return missing("message_router", "websocket manager or agent supervisor");
    };
    match MessageRouter::register(&websocket, &ctx.config.websocket.message_handlers).await {
        Ok(router) => {
            ctx.state.message_router.set(router);
            StepOutcome::Ok
        }
        Err(err) => StepOutcome::Fatal(err),
    }
}

async fn start_optional(ctx: Arc<BootContext>, index: usize) -> StepOutcome {
    let service = match optional_service(&ctx, index) {
        Ok(service) => service,
        Err(err) => return StepOutcome::Fatal(err),
    };
    match service.start().await {
        Ok(()) => {
            ctx.state.add_optional_service(service.name());
            StepOutcome::Ok
        }
        Err(err) => StepOutcome::Fatal(err),
    }
}

async fn stop_optional(ctx: Arc<BootContext>, index: usize) -> Result<()> {
    let service = optional_service(&ctx, index)?;
    ctx.state.remove_optional_service(service.name());
    service.stop().await
}
