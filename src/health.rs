use crate::component::{ComponentStatus, Priority};
use crate::registry::StatusSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Health of a single component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub status: ComponentStatus,
    pub priority: Priority,
}

/// Health of the whole service
///
/// `healthy` only looks at critical components; failed optional components show up as
/// unhealthy entries without flipping the overall flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: BTreeMap<String, ComponentHealth>,
}

pub fn health_check(snapshot: &StatusSnapshot) -> HealthReport {
    let components: BTreeMap<String, ComponentHealth> = snapshot
        .components
        .iter()
        .map(|(name, entry)| {
            (
                name.clone(),
                ComponentHealth {
                    healthy: entry.status == ComponentStatus::Running,
                    status: entry.status,
                    priority: entry.priority,
                },
            )
        })
        .collect();

    let healthy = components
        .values()
        .filter(|c| c.priority.is_critical())
        .all(|c| c.healthy);

    HealthReport {
        healthy,
        components,
    }
}

/// One post-startup assertion
#[derive(Debug, Clone, Serialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub critical: bool,
    pub details: Option<String>,
    pub timestamp: SystemTime,
}

impl ValidationCheck {
    pub fn pass<S: Into<String>>(name: S, critical: bool) -> Self {
        Self {
            name: name.into(),
            passed: true,
            critical,
            details: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn fail<S: Into<String>, D: Into<String>>(name: S, critical: bool, details: D) -> Self {
        Self {
            name: name.into(),
            passed: false,
            critical,
            details: Some(details.into()),
            timestamp: SystemTime::now(),
        }
    }
}

/// Pass/fail report produced by the validation phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, check: ValidationCheck) {
        if check.passed {
            debug!("Validation check '{}' passed", check.name);
        } else if check.critical {
            error!(
                "Critical validation check '{}' failed: {}",
                check.name,
                check.details.as_deref().unwrap_or("no details")
            );
        } else {
            warn!(
                "Validation check '{}' failed: {}",
                check.name,
                check.details.as_deref().unwrap_or("no details")
            );
        }
        self.checks.push(check);
    }

    pub fn passed(&self) -> bool {
        self.critical_failures().next().is_none()
    }

    pub fn critical_failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| c.critical && !c.passed)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.critical && !c.passed)
    }

    /// Join critical failures into one message
    pub fn failure_summary(&self) -> String {
        self.critical_failures()
            .map(|c| format!("{}: {}", c.name, c.details.as_deref().unwrap_or("failed")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn log_summary(&self) {
        let failed = self.checks.iter().filter(|c| !c.passed).count();
        info!(
            "=== Validation Report: {} checks, {} failed ===",
            self.checks.len(),
            failed
        );
        for check in self.warnings() {
            warn!("Non-critical check '{}' did not pass", check.name);
        }
    }
}
