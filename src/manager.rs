use crate::component::{ComponentSpec, ComponentStatus, Priority};
use crate::error::StartupError;
use crate::events::{EventBus, StartupEvent};
use crate::health::{self, HealthReport};
use crate::initializer::ComponentInitializer;
use crate::metrics::StartupMetrics;
use crate::registry::{ComponentRegistry, StatusSnapshot};
use crate::resolver::{self, Resolution};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of running a sequence of components
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceOutcome {
    pub started: Vec<String>,
    pub failed_optional: Vec<String>,
    pub failed_critical: Option<String>,
}

impl SequenceOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_critical.is_none()
    }
}

/// Registry, resolver and initializer wired together
///
/// Critical components start one at a time. Consecutive non-critical components of the
/// same priority that do not depend on each other start concurrently.
#[derive(Clone)]
pub struct StartupManager {
    registry: Arc<ComponentRegistry>,
    metrics: Arc<Mutex<StartupMetrics>>,
    initializer: ComponentInitializer,
    event_bus: EventBus,
    resolution: Arc<Mutex<Option<Resolution>>>,
    shutdown_timeout: Duration,
}

impl Default for StartupManager {
    fn default() -> Self {
        Self::new(Arc::new(ComponentRegistry::new()), EventBus::default())
    }
}

impl StartupManager {
    pub fn new(registry: Arc<ComponentRegistry>, event_bus: EventBus) -> Self {
        let metrics = Arc::new(Mutex::new(StartupMetrics::new()));
        let initializer =
            ComponentInitializer::new(Arc::clone(&registry), Arc::clone(&metrics), event_bus.clone());
        Self {
            registry,
            metrics,
            initializer,
            event_bus,
            resolution: Arc::new(Mutex::new(None)),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn register(&self, spec: ComponentSpec) {
        self.registry.register(spec);
        // A new component invalidates any previously resolved order
        self.resolution.lock().take();
    }

    /// Resolve the global startup order, caching it for shutdown
    pub fn resolve_order(&self) -> Resolution {
        let resolution = resolver::resolve(&self.registry);
        debug!("Resolved startup order: {:?}", resolution.order);
        *self.resolution.lock() = Some(resolution.clone());
        resolution
    }

    pub async fn initialize(&self, name: &str) -> bool {
        self.initializer.initialize(name).await
    }

    /// Start every registered component; false when a critical component failed
    pub async fn startup(&self) -> bool {
        let started = Instant::now();
        self.metrics.lock().reset();
        self.registry.set_initialized(false);

        let order = self.resolve_order().order;
        let outcome = self.run_sequence(&order).await;

        let elapsed = started.elapsed();
        self.metrics.lock().total_duration = Some(elapsed);

        match &outcome.failed_critical {
            None => {
                self.registry.set_initialized(true);
                info!(
                    "Startup completed in {:?}: {} running, {} optional failures",
                    elapsed,
                    outcome.started.len(),
                    outcome.failed_optional.len()
                );
                true
            }
            Some(component) => {
                error!("Startup aborted by critical component '{}'", component);
                false
            }
        }
    }

    /// Run components in the given order, stopping at the first critical failure
    pub async fn run_sequence(&self, names: &[String]) -> SequenceOutcome {
        let mut outcome = SequenceOutcome::default();
        let mut index = 0;

        while index < names.len() {
            let batch = self.next_batch(&names[index..]);
            index += batch.len();

            let mut runnable = Vec::with_capacity(batch.len());
            for name in batch {
                match self.check_dependencies(name) {
                    Ok(()) => runnable.push(name.clone()),
                    Err(err) => {
                        warn!("{}", err);
                        self.registry.update(name, |c| {
                            c.status = ComponentStatus::Failed;
                            c.last_error = Some(err.to_string());
                            c.finished_at = Some(Utc::now());
                        });
                        self.event_bus.publish(StartupEvent::ComponentFailed {
                            component: name.clone(),
                            error: err.to_string(),
                        });
                        if self.is_critical(name) {
                            outcome.failed_critical = Some(name.clone());
                            return outcome;
                        }
                        outcome.failed_optional.push(name.clone());
                    }
                }
            }

            if runnable.len() > 1 {
                debug!("Starting components concurrently: {:?}", runnable);
            }
            let results = join_all(runnable.iter().map(|name| self.initializer.initialize(name))).await;

            for (name, ok) in runnable.into_iter().zip(results) {
                if ok {
                    outcome.started.push(name);
                } else if self.is_critical(&name) {
                    outcome.failed_critical = Some(name);
                    return outcome;
                } else {
                    warn!(
                        "Non-critical component '{}' failed, continuing with degraded functionality",
                        name
                    );
                    outcome.failed_optional.push(name);
                }
            }
        }

        outcome
    }

    /// Longest prefix that may start together
    fn next_batch<'a>(&self, names: &'a [String]) -> &'a [String] {
        let Some(first) = names.first() else {
            return names;
        };
        let priority = self.registry.priority(first).unwrap_or(Priority::Critical);
        if priority.is_critical() {
            return &names[..1];
        }

        let mut members: HashSet<&str> = HashSet::from([first.as_str()]);
        let mut len = 1;
        for name in &names[1..] {
            let Some(spec) = self.registry.spec(name) else {
                break;
            };
            if spec.priority != priority
                || spec.dependencies.iter().any(|d| members.contains(d.as_str()))
            {
                break;
            }
            members.insert(name.as_str());
            len += 1;
        }
        &names[..len]
    }

    fn check_dependencies(&self, name: &str) -> Result<(), StartupError> {
        let Some(spec) = self.registry.spec(name) else {
            return Ok(());
        };
        let on_cycle = self
            .resolution
            .lock()
            .as_ref()
            .is_some_and(|r| r.cyclic.iter().any(|c| c == name));

        for dependency in &spec.dependencies {
            match self.registry.status(dependency) {
                Some(ComponentStatus::Running) | Some(ComponentStatus::Degraded) => {}
                Some(ComponentStatus::NotStarted) if on_cycle => {
                    warn!(
                        "Component '{}' starting before '{}' because of a dependency cycle",
                        name, dependency
                    );
                }
                Some(ComponentStatus::Failed) if !self.is_critical(dependency) => {
                    warn!(
                        "Component '{}' starting without failed optional dependency '{}'",
                        name, dependency
                    );
                }
                None => {
                    warn!(
                        "Component '{}' starting without unknown dependency '{}'",
                        name, dependency
                    );
                }
                Some(_) => {
                    return Err(StartupError::DependencyFailed {
                        component: name.to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn is_critical(&self, name: &str) -> bool {
        self.registry
            .priority(name)
            .map(Priority::is_critical)
            .unwrap_or(false)
    }

    /// Mark a running component as up with reduced functionality
    pub fn mark_degraded(&self, name: &str, reason: &str) {
        warn!("Component '{}' degraded: {}", name, reason);
        self.registry.update(name, |c| {
            c.status = ComponentStatus::Degraded;
            c.last_error = Some(reason.to_string());
        });
        self.metrics.lock().record_degraded(name);
        self.event_bus.publish(StartupEvent::ComponentDegraded {
            component: name.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn get_status(&self) -> StatusSnapshot {
        self.registry.get_status()
    }

    pub fn health_check(&self) -> HealthReport {
        health::health_check(&self.registry.get_status())
    }

    pub fn metrics(&self) -> StartupMetrics {
        self.metrics.lock().clone()
    }

    pub fn set_total_duration(&self, duration: Duration) {
        self.metrics.lock().total_duration = Some(duration);
    }

    /// Clean up started components in exact reverse of the resolved order
    ///
    /// Returns the cleanup order and an exit code of 1 if any cleanup failed or timed out.
    pub async fn shutdown(&self) -> (Vec<String>, i32) {
        info!("Beginning graceful shutdown");
        let cached = self.resolution.lock().clone();
        let order = match cached {
            Some(resolution) => resolution.order,
            None => resolver::resolve(&self.registry).order,
        };

        let mut exit_code = 0;
        let mut cleaned = Vec::new();

        for name in order.iter().rev() {
            let Some(component) = self.registry.component(name) else {
                continue;
            };
            if !component.status.is_started() {
                continue;
            }

            cleaned.push(name.clone());
            self.registry.set_status(name, ComponentStatus::Stopping);

            let result = match &component.spec.cleanup {
                Some(cleanup) => match timeout(self.shutdown_timeout, cleanup()).await {
                    Ok(result) => result,
                    Err(_) => Err(StartupError::Timeout {
                        component: name.clone(),
                        timeout: self.shutdown_timeout,
                    }),
                },
                None => Ok(()),
            };

            match result {
                Ok(()) => {
                    self.registry.set_status(name, ComponentStatus::Stopped);
                    info!("{} component stopped", name);
                }
                Err(err) => {
                    error!("Error stopping {} component: {}", name, err);
                    self.registry.update(name, |c| {
                        c.status = ComponentStatus::Failed;
                        c.last_error = Some(err.to_string());
                    });
                    exit_code = 1;
                }
            }
        }

        self.registry.set_initialized(false);
        self.metrics.lock().reset();
        self.event_bus
            .publish(StartupEvent::ShutdownComplete { exit_code });
        info!("Graceful shutdown completed with exit code: {}", exit_code);
        (cleaned, exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ok(name: &str, priority: Priority) -> ComponentSpec {
        ComponentSpec::new(name, priority, || async { Ok(()) })
    }

    fn failing(name: &str, priority: Priority) -> ComponentSpec {
        let service = name.to_string();
        ComponentSpec::new(name, priority, move || {
            let service = service.clone();
            async move { Err(StartupError::service(service, "connection refused")) }
        })
        .with_max_retries(1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_component_chain() {
        let manager = StartupManager::default();
        let completed = Arc::new(Mutex::new(Vec::new()));

        for (name, priority, deps) in [
            ("websocket", Priority::High, vec!["database", "cache"]),
            ("database", Priority::Critical, vec![]),
            ("cache", Priority::High, vec!["database"]),
        ] {
            let completed = Arc::clone(&completed);
            let label = name.to_string();
            manager.register(
                ComponentSpec::new(name, priority, move || {
                    let completed = Arc::clone(&completed);
                    let label = label.clone();
                    async move {
                        completed.lock().push(label);
                        Ok(())
                    }
                })
                .depends_on(deps),
            );
        }

        assert!(manager.startup().await);
        assert_eq!(*completed.lock(), vec!["database", "cache", "websocket"]);

        let status = manager.get_status();
        assert!(status.initialized);
        for name in ["database", "cache", "websocket"] {
            assert_eq!(status.components[name].status, ComponentStatus::Running);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_failure_blocks_dependents() {
        let manager = StartupManager::default();
        manager.register(failing("database", Priority::Critical));
        manager.register(ok("cache", Priority::High).depends_on(["database"]));

        assert!(!manager.startup().await);
        assert_eq!(
            manager.registry().status("database"),
            Some(ComponentStatus::Failed)
        );
        assert_ne!(
            manager.registry().status("cache"),
            Some(ComponentStatus::Running)
        );
        assert!(!manager.get_status().initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optional_failure_keeps_system_healthy() {
        let manager = StartupManager::default();
        manager.register(ok("database", Priority::Critical));
        manager.register(failing("optional_metrics", Priority::Low));

        assert!(manager.startup().await);
        assert!(manager.health_check().healthy);
        assert_eq!(
            manager.registry().status("optional_metrics"),
            Some(ComponentStatus::Failed)
        );
        assert!(!manager.health_check().components["optional_metrics"].healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optional_components_start_concurrently() {
        let manager = StartupManager::default();
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        for name in ["analytics", "tracing", "monitor"] {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            manager.register(ComponentSpec::new(name, Priority::Low, move || {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }));
        }

        assert!(manager.startup().await);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_optional_dependency_is_settled() {
        let manager = StartupManager::default();
        manager.register(failing("analytics", Priority::Medium));
        manager.register(ok("reports", Priority::Low).depends_on(["analytics"]));

        assert!(manager.startup().await);
        assert_eq!(
            manager.registry().status("reports"),
            Some(ComponentStatus::Running)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reverses_startup_order() {
        let manager = StartupManager::default();
        let cleaned = Arc::new(Mutex::new(Vec::new()));

        for (name, priority, deps) in [
            ("database", Priority::Critical, vec![]),
            ("cache", Priority::High, vec!["database"]),
            ("websocket", Priority::High, vec!["cache"]),
            ("metrics", Priority::Low, vec![]),
        ] {
            let cleaned = Arc::clone(&cleaned);
            let label = name.to_string();
            manager.register(
                ok(name, priority)
                    .depends_on(deps)
                    .with_cleanup(move || {
                        let cleaned = Arc::clone(&cleaned);
                        let label = label.clone();
                        async move {
                            cleaned.lock().push(label);
                            Ok(())
                        }
                    }),
            );
        }

        assert!(manager.startup().await);
        let mut expected = manager.resolve_order().order;
        expected.reverse();

        let (order, exit_code) = manager.shutdown().await;
        assert_eq!(exit_code, 0);
        assert_eq!(order, expected);
        assert_eq!(*cleaned.lock(), expected);
        assert_eq!(
            manager.registry().status("database"),
            Some(ComponentStatus::Stopped)
        );
        assert!(!manager.get_status().initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_timeout_sets_exit_code() {
        let manager = StartupManager::default().with_shutdown_timeout(Duration::from_secs(10));
        manager.register(ok("websocket", Priority::High).with_cleanup(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));

        assert!(manager.startup().await);
        let (_, exit_code) = manager.shutdown().await;
        assert_eq!(exit_code, 1);
        assert_eq!(
            manager.registry().status("websocket"),
            Some(ComponentStatus::Failed)
        );
    }
}
