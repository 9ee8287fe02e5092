use super::environment::validate_environment;
use super::{BootOrchestrator, StartupPhase, StepOutcome};
use crate::error::{FatalStartupError, StartupError};
use crate::events::StartupEvent;
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

impl BootOrchestrator {
    /// Run every startup phase in order
    ///
    /// Readiness stays false until validation passes. Any fatal step moves the boot to
    /// `Failed` and is returned wrapped with the phase it happened in.
    pub async fn start(&self) -> Result<(), FatalStartupError> {
        let current = self.handle.phase();
        if current != StartupPhase::NotStarted {
            return Err(FatalStartupError::new(
                current,
                StartupError::system("startup was already attempted by this orchestrator"),
            ));
        }

        info!("Starting chat service boot sequence");
        let started = Instant::now();
        self.handle.set_ready(false);

        let resolution = self.manager.resolve_order();
        let order = resolution.order;

        for phase in StartupPhase::SEQUENCE {
            self.enter_phase(phase);
            let span = info_span!("phase", name = %phase);
            let outcome = self.run_phase(phase, &order).instrument(span).await;

            match outcome {
                StepOutcome::Ok => info!("Phase {} complete", phase),
                StepOutcome::Degraded(reason) => {
                    warn!("Phase {} complete with degraded functionality: {}", phase, reason)
                }
                StepOutcome::Fatal(cause) => return Err(self.fail(phase, cause, started)),
            }
        }

        self.complete(started);
        Ok(())
    }

    async fn run_phase(&self, phase: StartupPhase, order: &[String]) -> StepOutcome {
        match phase {
            StartupPhase::Foundation => {
                let config = &self.context.config.environment;
                if let Err(cause) = validate_environment(self.context.services.env.as_ref(), config) {
                    return StepOutcome::Fatal(cause);
                }
                self.run_components(phase, order).await
            }
            StartupPhase::CoreServices
            | StartupPhase::ChatPipeline
            | StartupPhase::OptionalServices => self.run_components(phase, order).await,
            StartupPhase::Validation => self.validate().await,
            StartupPhase::NotStarted | StartupPhase::Complete | StartupPhase::Failed => {
                StepOutcome::Fatal(StartupError::system(format!("{} is not a runnable phase", phase)))
            }
        }
    }

    /// Start the components of one phase in global resolution order
    async fn run_components(&self, phase: StartupPhase, order: &[String]) -> StepOutcome {
        let members = self.phase_components(phase);
        let names: Vec<String> = order
            .iter()
            .filter(|name| members.contains(*name))
            .cloned()
            .collect();
        if names.is_empty() {
            return StepOutcome::Ok;
        }

        let outcome = self.manager.run_sequence(&names).await;

        let mut degraded = Vec::new();
        for name in &outcome.started {
            if let Some(reason) = self.context.take_degraded(name) {
                self.manager.mark_degraded(name, &reason);
                degraded.push(name.clone());
            }
        }

        if let Some(name) = outcome.failed_critical {
            let message = self
                .manager
                .registry()
                .component(&name)
                .and_then(|c| c.last_error)
                .unwrap_or_else(|| "failed to start".to_string());
            return StepOutcome::Fatal(StartupError::component_failed(name, message));
        }

        degraded.extend(outcome.failed_optional);
        if degraded.is_empty() {
            StepOutcome::Ok
        } else {
            StepOutcome::Degraded(format!("degraded components: {}", degraded.join(", ")))
        }
    }

    fn enter_phase(&self, phase: StartupPhase) {
        info!("=== Entering phase: {} ===", phase);
        self.handle.set_phase(phase);
        self.event_bus.publish(StartupEvent::PhaseEntered {
            phase,
            timestamp: SystemTime::now(),
        });
    }

    fn fail(&self, phase: StartupPhase, cause: StartupError, started: Instant) -> FatalStartupError {
        error!("Startup failed during {}: {}", phase, cause);
        self.handle.set_ready(false);
        self.handle.set_phase(StartupPhase::Failed);
        self.handle.set_error(cause.to_string());
        self.manager.registry().set_initialized(false);
        self.manager.set_total_duration(started.elapsed());
        self.event_bus.publish(StartupEvent::StartupFailed {
            phase,
            error: cause.to_string(),
        });
        FatalStartupError::new(phase, cause)
    }

    fn complete(&self, started: Instant) {
        let elapsed = started.elapsed();
        self.manager.set_total_duration(elapsed);
        self.manager.registry().set_initialized(true);
        self.handle.set_phase(StartupPhase::Complete);
        self.handle.set_ready(true);
        self.event_bus.publish(StartupEvent::Ready {
            elapsed_ms: elapsed.as_millis() as u64,
        });

        info!("Chat service ready in {:?}", elapsed);
        for line in self.manager.metrics().generate_report().lines() {
            info!("{}", line);
        }
    }
}
