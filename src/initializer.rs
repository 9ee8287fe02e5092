use crate::component::{ComponentSpec, ComponentStatus};
use crate::error::StartupError;
use crate::events::{EventBus, StartupEvent};
use crate::metrics::StartupMetrics;
use crate::recovery::RetryPolicy;
use crate::registry::ComponentRegistry;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Runs one component's init function under timeout, retry and circuit breaker control
#[derive(Clone)]
pub struct ComponentInitializer {
    registry: Arc<ComponentRegistry>,
    metrics: Arc<Mutex<StartupMetrics>>,
    event_bus: EventBus,
}

impl ComponentInitializer {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        metrics: Arc<Mutex<StartupMetrics>>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry,
            metrics,
            event_bus,
        }
    }

    /// Bring one component to RUNNING, returning false once it ends FAILED
    pub async fn initialize(&self, name: &str) -> bool {
        let Some(spec) = self.registry.spec(name) else {
            error!("Cannot initialize unknown component '{}'", name);
            return false;
        };

        if !self.registry.allow_attempt(name) {
            let err = StartupError::CircuitOpen {
                component: name.to_string(),
            };
            warn!("{}", err);
            self.registry.update(name, |c| {
                c.status = ComponentStatus::Failed;
                c.last_error = Some(err.to_string());
                c.finished_at = Some(Utc::now());
            });
            self.event_bus.publish(StartupEvent::ComponentFailed {
                component: name.to_string(),
                error: err.to_string(),
            });
            return false;
        }

        let started = Instant::now();
        self.registry.update(name, |c| {
            c.status = ComponentStatus::Starting;
            c.started_at = Some(Utc::now());
            c.finished_at = None;
            c.retry_count = 0;
        });
        info!("Starting component '{}' ({} priority)", name, spec.priority);

        let policy = RetryPolicy::from_spec(&spec);
        let mut last_error = String::new();

        for attempt in 0..policy.attempts() {
            self.registry.update(name, |c| c.retry_count = attempt);

            let outcome = match timeout(spec.timeout, (spec.init)()).await {
                Ok(result) => result,
                Err(_) => {
                    self.release_partial(name, &spec).await;
                    Err(StartupError::Timeout {
                        component: name.to_string(),
                        timeout: spec.timeout,
                    })
                }
            };

            match outcome {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    self.registry.update(name, |c| {
                        c.status = ComponentStatus::Running;
                        c.finished_at = Some(Utc::now());
                        c.duration = Some(elapsed);
                        c.last_error = None;
                    });
                    self.metrics.lock().record_success(name, elapsed, attempt);
                    self.event_bus.publish(StartupEvent::ComponentRunning {
                        component: name.to_string(),
                        retry_count: attempt,
                    });
                    info!(
                        "Component '{}' running after {:?} ({} retries)",
                        name, elapsed, attempt
                    );
                    return true;
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.registry
                        .update(name, |c| c.last_error = Some(last_error.clone()));

                    if policy.has_attempts_left(attempt) {
                        let delay = policy.calculate_delay(attempt);
                        let kind = if err.is_transient() { "transient" } else { "persistent" };
                        warn!(
                            "Component '{}' attempt {}/{} failed ({}): {}; retrying in {:?}",
                            name,
                            attempt + 1,
                            policy.attempts(),
                            kind,
                            err,
                            delay
                        );
                        sleep(delay).await;
                    } else {
                        debug!(
                            "Component '{}' attempt {}/{} failed: {}",
                            name,
                            attempt + 1,
                            policy.attempts(),
                            err
                        );
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        let retries = policy.attempts() - 1;
        self.registry.update(name, |c| {
            c.status = ComponentStatus::Failed;
            c.finished_at = Some(Utc::now());
            c.duration = Some(elapsed);
        });
        self.registry.record_failure(name);
        self.metrics.lock().record_failure(name, elapsed, retries);
        self.event_bus.publish(StartupEvent::ComponentFailed {
            component: name.to_string(),
            error: last_error.clone(),
        });
        error!(
            "Component '{}' failed after {} attempts: {}",
            name,
            policy.attempts(),
            last_error
        );
        false
    }

    /// Run the cleanup hook after an attempt was cut off by its timeout
    ///
    /// A dropped init future may already hold resources it never handed back.
    async fn release_partial(&self, name: &str, spec: &ComponentSpec) {
        let Some(cleanup) = &spec.cleanup else {
            return;
        };
        match timeout(spec.timeout, cleanup()).await {
            Ok(Ok(())) => debug!("Released partial state of '{}' after timeout", name),
            Ok(Err(err)) => warn!("Cleanup of timed out '{}' failed: {}", name, err),
            Err(_) => warn!("Cleanup of timed out '{}' timed out", name),
        }
    }
}
