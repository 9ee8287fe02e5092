use crate::circuit_breaker::CircuitBreakerState;
use crate::component::{Component, ComponentSpec, ComponentStatus, Priority};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

struct Entry {
    component: Component,
    breaker: CircuitBreakerState,
}

/// Point-in-time view of one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatusEntry {
    pub status: ComponentStatus,
    pub priority: Priority,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Point-in-time view of the whole registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub initialized: bool,
    pub components: BTreeMap<String, ComponentStatusEntry>,
}

/// Named startup components and their circuit breakers
///
/// Locks are held only for the duration of a field read or write and never across an
/// await point, so status readers never wait on an in-flight init function.
pub struct ComponentRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    initialized: AtomicBool,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::with_breaker_settings(3, Duration::from_secs(30))
    }

    pub fn with_breaker_settings(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Insert a component with a fresh circuit breaker, replacing any previous entry
    pub fn register(&self, spec: ComponentSpec) {
        debug!(
            "Registering component '{}' ({} priority, deps: {:?})",
            spec.name, spec.priority, spec.dependencies
        );
        let name = spec.name.clone();
        let entry = Entry {
            component: Component::new(spec),
            breaker: CircuitBreakerState::new(self.failure_threshold, self.recovery_timeout),
        };
        self.entries.write().insert(name, entry);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn component(&self, name: &str) -> Option<Component> {
        self.entries.read().get(name).map(|e| e.component.clone())
    }

    pub fn spec(&self, name: &str) -> Option<ComponentSpec> {
        self.entries.read().get(name).map(|e| e.component.spec.clone())
    }

    pub fn status(&self, name: &str) -> Option<ComponentStatus> {
        self.entries.read().get(name).map(|e| e.component.status)
    }

    pub fn priority(&self, name: &str) -> Option<Priority> {
        self.entries.read().get(name).map(|e| e.component.priority())
    }

    /// `(name, priority, dependencies)` for every component
    pub fn dependency_graph(&self) -> Vec<(String, Priority, Vec<String>)> {
        self.entries
            .read()
            .values()
            .map(|e| {
                (
                    e.component.spec.name.clone(),
                    e.component.spec.priority,
                    e.component.spec.dependencies.clone(),
                )
            })
            .collect()
    }

    /// Apply a mutation to one component; returns false for unknown names
    pub fn update<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut Component),
    {
        match self.entries.write().get_mut(name) {
            Some(entry) => {
                f(&mut entry.component);
                true
            }
            None => false,
        }
    }

    pub fn set_status(&self, name: &str, status: ComponentStatus) {
        if self.update(name, |c| c.status = status) {
            debug!("Component '{}' state changed to: {:?}", name, status);
        }
    }

    pub fn allow_attempt(&self, name: &str) -> bool {
        self.entries
            .write()
            .get_mut(name)
            .map(|e| e.breaker.allow_attempt(name))
            .unwrap_or(false)
    }

    pub fn record_failure(&self, name: &str) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.breaker.record_failure(name);
        }
    }

    pub fn breaker(&self, name: &str) -> Option<CircuitBreakerState> {
        self.entries.read().get(name).map(|e| e.breaker.clone())
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Snapshot of system initialization and every component's state
    pub fn get_status(&self) -> StatusSnapshot {
        let entries = self.entries.read();
        let components = entries
            .iter()
            .map(|(name, e)| {
                let c = &e.component;
                (
                    name.clone(),
                    ComponentStatusEntry {
                        status: c.status,
                        priority: c.priority(),
                        retry_count: c.retry_count,
                        last_error: c.last_error.clone(),
                        duration_ms: c.duration.map(|d| d.as_millis() as u64),
                    },
                )
            })
            .collect();

        StatusSnapshot {
            initialized: self.is_initialized(),
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str, priority: Priority) -> ComponentSpec {
        ComponentSpec::new(name, priority, || async { Ok(()) })
    }

    #[test]
    fn test_register_and_snapshot() {
        let registry = ComponentRegistry::new();
        registry.register(noop("database", Priority::Critical));
        registry.register(noop("cache", Priority::High).depends_on(["database"]));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.status("cache"), Some(ComponentStatus::NotStarted));

        let snapshot = registry.get_status();
        assert!(!snapshot.initialized);
        assert_eq!(snapshot.components.len(), 2);
        assert_eq!(snapshot.components["database"].priority, Priority::Critical);
        assert_eq!(snapshot.components["cache"].duration_ms, None);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = ComponentRegistry::new();
        registry.register(noop("cache", Priority::Low));
        registry.set_status("cache", ComponentStatus::Failed);
        registry.register(noop("cache", Priority::High));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.priority("cache"), Some(Priority::High));
        assert_eq!(registry.status("cache"), Some(ComponentStatus::NotStarted));
    }

    #[test]
    fn test_unknown_component_operations() {
        let registry = ComponentRegistry::new();
        assert!(!registry.update("missing", |c| c.retry_count = 1));
        assert!(!registry.allow_attempt("missing"));
        assert!(registry.breaker("missing").is_none());
    }
}
