use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Async startup function of a component
pub type InitFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Async cleanup function run during shutdown
pub type CleanupFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Startup priority; lower value starts first within a dependency layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
}

impl Priority {
    pub fn is_critical(self) -> bool {
        self == Priority::Critical
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    NotStarted,
    Starting,
    Running,
    Degraded,
    Failed,
    Stopping,
    Stopped,
}

impl ComponentStatus {
    /// Whether the component came up and may need cleanup
    pub fn is_started(self) -> bool {
        matches!(self, ComponentStatus::Running | ComponentStatus::Degraded)
    }
}

/// Registration parameters for a component
#[derive(Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub priority: Priority,
    pub dependencies: Vec<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub init: InitFn,
    pub cleanup: Option<CleanupFn>,
}

impl ComponentSpec {
    /// Create a spec with default timing: 30s timeout, 3 attempts, 1s..30s backoff
    pub fn new<N, F, Fut>(name: N, priority: Priority, init: F) -> Self
    where
        N: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let init: InitFn = Arc::new(move || Box::pin(init()));
        Self {
            name: name.into(),
            priority,
            dependencies: Vec::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),
            init,
            cleanup: None,
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff_base = base;
        self.retry_backoff_max = max;
        self
    }

    pub fn with_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.cleanup = Some(Arc::new(move || Box::pin(cleanup())));
        self
    }
}

impl fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// A registered unit of startup work and its runtime state
#[derive(Clone)]
pub struct Component {
    pub spec: ComponentSpec,
    pub status: ComponentStatus,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub retry_count: u32,
}

impl Component {
    pub fn new(spec: ComponentSpec) -> Self {
        Self {
            spec,
            status: ComponentStatus::NotStarted,
            last_error: None,
            started_at: None,
            finished_at: None,
            duration: None,
            retry_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn priority(&self) -> Priority {
        self.spec.priority
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.spec.name)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("last_error", &self.last_error)
            .finish()
    }
}
