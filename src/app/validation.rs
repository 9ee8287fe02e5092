use super::{BootOrchestrator, StepOutcome};
use crate::component::ComponentStatus;
use crate::error::StartupError;
use crate::health::{ValidationCheck, ValidationReport};
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

impl BootOrchestrator {
    /// Re-check the assembled service end to end
    pub(super) async fn validate(&self) -> StepOutcome {
        let report = self.validation_report().await;
        report.log_summary();
        if report.passed() {
            StepOutcome::Ok
        } else {
            StepOutcome::Fatal(StartupError::validation(report.failure_summary()))
        }
    }

    pub(super) async fn validation_report(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        let state = &self.context.state;

        let missing = state.missing_critical_slots();
        report.record(if missing.is_empty() {
            ValidationCheck::pass("critical_slots", true)
        } else {
            ValidationCheck::fail(
                "critical_slots",
                true,
                format!("unset: {}", missing.join(", ")),
            )
        });

        report.record(match state.agent_supervisor.get() {
            Some(supervisor) if supervisor.has_websocket_bridge() => {
                ValidationCheck::pass("websocket_enhanced", true)
            }
            Some(_) => ValidationCheck::fail(
                "websocket_enhanced",
                true,
                "supervisor tool dispatcher is not wired to WebSocket events",
            ),
            None => ValidationCheck::fail("websocket_enhanced", true, "no agent supervisor"),
        });

        report.record(self.probe_websocket().await);

        for check in self.check_schema().await {
            report.record(check);
        }

        let registry = self.manager.registry();
        for name in self.phase_components(super::StartupPhase::OptionalServices) {
            let name = name.as_str();
            let check = format!("optional:{}", name);
            report.record(match registry.status(name) {
                Some(ComponentStatus::Running) => ValidationCheck::pass(check, false),
                status => ValidationCheck::fail(check, false, format!("status {:?}", status)),
            });
        }

        report
    }

    /// Send a synthetic event through the live WebSocket manager
    async fn probe_websocket(&self) -> ValidationCheck {
        let Some(websocket) = self.context.state.websocket_manager.get() else {
            return ValidationCheck::fail("websocket_probe", true, "no WebSocket manager");
        };
        let config = &self.context.config;
        let probe = serde_json::json!({
            "type": "startup_probe",
            "probe_id": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        let limit = Duration::from_secs(config.timeouts.probe_secs);

        match timeout(limit, websocket.send_to_channel(&config.websocket.probe_channel, probe)).await {
            Ok(true) => ValidationCheck::pass("websocket_probe", true),
            Ok(false) => ValidationCheck::fail(
                "websocket_probe",
                true,
                format!("probe not delivered to '{}'", config.websocket.probe_channel),
            ),
            Err(_) => ValidationCheck::fail(
                "websocket_probe",
                true,
                format!("probe timed out after {:?}", limit),
            ),
        }
    }

    async fn check_schema(&self) -> Vec<ValidationCheck> {
        let Some(handle) = self.context.state.database.get() else {
            return vec![ValidationCheck::fail("schema_consistency", true, "no database handle")];
        };
        let database = &self.context.services.database;
        let schema = &self.context.config.schema;
        let critical: BTreeSet<String> = schema.critical_tables.iter().cloned().collect();
        let optional: BTreeSet<String> = schema.optional_tables.iter().cloned().collect();

        let mut checks = Vec::with_capacity(2);
        checks.push(match database.missing_tables(&handle, &critical).await {
            Ok(missing) if missing.is_empty() => ValidationCheck::pass("schema_consistency", true),
            Ok(missing) => ValidationCheck::fail(
                "schema_consistency",
                true,
                format!("missing critical tables: {:?}", missing),
            ),
            Err(err) => ValidationCheck::fail("schema_consistency", true, err.to_string()),
        });
        checks.push(match database.missing_tables(&handle, &optional).await {
            Ok(missing) if missing.is_empty() => ValidationCheck::pass("optional_tables", false),
            Ok(missing) => ValidationCheck::fail(
                "optional_tables",
                false,
                format!("missing optional tables: {:?}", missing),
            ),
            Err(err) => ValidationCheck::fail("optional_tables", false, err.to_string()),
        });
        checks
    }
}
