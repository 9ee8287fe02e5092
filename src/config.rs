use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct StartupConfig {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub optional: OptionalConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EnvironmentConfig {
    /// Variable naming the deployment environment
    #[serde(default = "default_environment_key")]
    pub environment_key: String,

    /// Environment assumed when the variable is unset
    #[serde(default = "default_environment")]
    pub default_environment: String,

    /// Environments in which test-only flags and localhost URLs are violations
    #[serde(default = "default_protected_environments")]
    pub protected_environments: Vec<String>,

    /// Test-only flags that must not be enabled in protected environments
    #[serde(default = "default_forbidden_flags")]
    pub forbidden_flags: Vec<String>,

    /// Variables that must be present in every environment
    #[serde(default = "default_required_vars")]
    pub required_vars: Vec<String>,

    /// Connection URLs that must not point at localhost outside development
    #[serde(default = "default_url_vars")]
    pub url_vars: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts per component, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for the backoff delay in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_migration_secs")]
    pub migration_secs: u64,
    #[serde(default = "default_database_secs")]
    pub database_secs: u64,
    #[serde(default = "default_cache_secs")]
    pub cache_secs: u64,
    #[serde(default = "default_service_secs")]
    pub service_secs: u64,
    #[serde(default = "default_websocket_secs")]
    pub websocket_secs: u64,
    #[serde(default = "default_supervisor_secs")]
    pub supervisor_secs: u64,
    #[serde(default = "default_optional_secs")]
    pub optional_secs: u64,
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    /// Bound for each cleanup call, independent of startup timeouts
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SchemaConfig {
    /// Tables whose absence is fatal
    #[serde(default = "default_critical_tables")]
    pub critical_tables: Vec<String>,

    /// Tables created on demand; their absence only degrades the database component
    #[serde(default = "default_optional_tables")]
    pub optional_tables: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WebSocketConfig {
    /// Channel used by the delivery probe during validation
    #[serde(default = "default_probe_channel")]
    pub probe_channel: String,

    /// Message types routed to the agent supervisor
    #[serde(default = "default_message_handlers")]
    pub message_handlers: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_tools")]
    pub enabled: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OptionalConfig {
    #[serde(default = "default_true")]
    pub analytics: bool,
    #[serde(default = "default_true")]
    pub metrics: bool,
    #[serde(default = "default_true")]
    pub background_tasks: bool,
    #[serde(default = "default_true")]
    pub index_optimizer: bool,
    #[serde(default = "default_true")]
    pub connection_monitor: bool,
}

impl StartupConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            // CHATBOOT_RETRY__MAX_RETRIES=5 overrides retry.max_retries
            .add_source(
                Environment::with_prefix("CHATBOOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: StartupConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Message(
                "retry.max_retries must be greater than 0".to_string(),
            ));
        }

        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(ConfigError::Message(
                "retry.backoff_base_ms must not exceed retry.backoff_max_ms".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "circuit_breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }

        let timeouts = [
            ("migration_secs", self.timeouts.migration_secs),
            ("database_secs", self.timeouts.database_secs),
            ("cache_secs", self.timeouts.cache_secs),
            ("service_secs", self.timeouts.service_secs),
            ("websocket_secs", self.timeouts.websocket_secs),
            ("supervisor_secs", self.timeouts.supervisor_secs),
            ("optional_secs", self.timeouts.optional_secs),
            ("probe_secs", self.timeouts.probe_secs),
            ("shutdown_secs", self.timeouts.shutdown_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Message(format!(
                "timeouts.{} must be greater than 0",
                name
            )));
        }

        if self.schema.critical_tables.is_empty() {
            return Err(ConfigError::Message(
                "schema.critical_tables must list at least one table".to_string(),
            ));
        }

        if self.websocket.probe_channel.trim().is_empty() {
            return Err(ConfigError::Message(
                "websocket.probe_channel must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry.backoff_max_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker.recovery_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.shutdown_secs)
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            environment_key: default_environment_key(),
            default_environment: default_environment(),
            protected_environments: default_protected_environments(),
            forbidden_flags: default_forbidden_flags(),
            required_vars: default_required_vars(),
            url_vars: default_url_vars(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            migration_secs: default_migration_secs(),
            database_secs: default_database_secs(),
            cache_secs: default_cache_secs(),
            service_secs: default_service_secs(),
            websocket_secs: default_websocket_secs(),
            supervisor_secs: default_supervisor_secs(),
            optional_secs: default_optional_secs(),
            probe_secs: default_probe_secs(),
            shutdown_secs: default_shutdown_secs(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            critical_tables: default_critical_tables(),
            optional_tables: default_optional_tables(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            probe_channel: default_probe_channel(),
            message_handlers: default_message_handlers(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_tools(),
        }
    }
}

impl Default for OptionalConfig {
    fn default() -> Self {
        Self {
            analytics: true,
            metrics: true,
            background_tasks: true,
            index_optimizer: true,
            connection_monitor: true,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// Default value functions
fn default_environment_key() -> String {
    "ENVIRONMENT".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_protected_environments() -> Vec<String> {
    strings(&["staging", "production"])
}
fn default_forbidden_flags() -> Vec<String> {
    strings(&[
        "TESTING",
        "E2E_TESTING",
        "PYTEST_CURRENT_TEST",
        "ALLOW_DEV_OAUTH_SIMULATION",
    ])
}
fn default_required_vars() -> Vec<String> {
    strings(&["DATABASE_URL", "REDIS_URL", "JWT_SECRET_KEY"])
}
fn default_url_vars() -> Vec<String> {
    strings(&["DATABASE_URL", "REDIS_URL", "CLICKHOUSE_URL"])
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_migration_secs() -> u64 {
    60
}
fn default_database_secs() -> u64 {
    30
}
fn default_cache_secs() -> u64 {
    10
}
fn default_service_secs() -> u64 {
    20
}
fn default_websocket_secs() -> u64 {
    15
}
fn default_supervisor_secs() -> u64 {
    30
}
fn default_optional_secs() -> u64 {
    20
}
fn default_probe_secs() -> u64 {
    5
}
fn default_shutdown_secs() -> u64 {
    10
}

fn default_critical_tables() -> Vec<String> {
    strings(&["users", "threads", "messages", "runs", "assistants"])
}
fn default_optional_tables() -> Vec<String> {
    strings(&["agent_executions", "tool_usage_logs", "audit_logs"])
}

fn default_probe_channel() -> String {
    "startup-validation".to_string()
}
fn default_message_handlers() -> Vec<String> {
    strings(&["user_message", "start_agent", "thread_history", "stop_agent"])
}

fn default_tools() -> Vec<String> {
    strings(&["web_search", "code_execution", "data_analysis"])
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StartupConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.recovery_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_validation() {
        let mut config = StartupConfig::default();

        config.retry.backoff_base_ms = 60_000;
        assert!(config.validate().is_err());
        config.retry.backoff_base_ms = 500;
        assert!(config.validate().is_ok());

        config.timeouts.probe_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("probe_secs"));
        config.timeouts.probe_secs = 5;

        config.schema.critical_tables.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[retry]\nmax_retries = 5\n\n[websocket]\nprobe_channel = \"boot-probe\""
        )
        .unwrap();

        let config = StartupConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_base_ms, default_backoff_base_ms());
        assert_eq!(config.websocket.probe_channel, "boot-probe");
        assert_eq!(config.schema, SchemaConfig::default());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let config = StartupConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: StartupConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
