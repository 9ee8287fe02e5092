use crate::config::EnvironmentConfig;
use crate::error::{Result, StartupError};
use crate::services::EnvSource;
use tracing::{debug, error, info};

const DEVELOPMENT: &str = "development";
const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "0.0.0.0"];

/// Check the environment before anything else is touched
///
/// Collects every violation and reports them together: test-only flags in a protected
/// environment, missing required variables, and connection URLs pointing at the local
/// host outside development.
pub fn validate_environment(env: &dyn EnvSource, config: &EnvironmentConfig) -> Result<()> {
    let environment = env
        .get(&config.environment_key, &config.default_environment)
        .trim()
        .to_ascii_lowercase();
    info!("Validating environment '{}'", environment);

    let mut violations = Vec::new();

    if config
        .protected_environments
        .iter()
        .any(|protected| protected.eq_ignore_ascii_case(&environment))
    {
        for flag in &config.forbidden_flags {
            if env.is_enabled(flag) {
                violations.push(format!("{} must not be set in {}", flag, environment));
            }
        }
    }

    for var in &config.required_vars {
        if !env.is_set(var) {
            violations.push(format!("{} is required", var));
        }
    }

    if environment != DEVELOPMENT {
        for var in &config.url_vars {
            let value = env.get(var, "").to_ascii_lowercase();
            if LOCAL_HOSTS.iter().any(|host| value.contains(host)) {
                violations.push(format!("{} points at localhost in {}", var, environment));
            }
        }
    }

    if violations.is_empty() {
        debug!("Environment '{}' passed validation", environment);
        return Ok(());
    }

    for violation in &violations {
        error!("Environment violation: {}", violation);
    }
    Err(StartupError::violation(violations.join("; ")))
}
