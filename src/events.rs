use crate::app::StartupPhase;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::debug;

/// Lifecycle events emitted while the service boots and shuts down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StartupEvent {
    /// The orchestrator entered a new phase
    PhaseEntered {
        phase: StartupPhase,
        timestamp: SystemTime,
    },
    /// A component reached RUNNING
    ComponentRunning { component: String, retry_count: u32 },
    /// A component exhausted its attempts or was rejected by its circuit breaker
    ComponentFailed { component: String, error: String },
    /// A component is up with reduced functionality
    ComponentDegraded { component: String, reason: String },
    /// Every phase passed and the service accepts traffic
    Ready { elapsed_ms: u64 },
    /// Startup aborted
    StartupFailed { phase: StartupPhase, error: String },
    /// Reverse-order cleanup finished
    ShutdownComplete { exit_code: i32 },
}

impl StartupEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            StartupEvent::PhaseEntered { phase, .. } => format!("Entered phase {}", phase),
            StartupEvent::ComponentRunning {
                component,
                retry_count,
            } => format!("{} running after {} retries", component, retry_count),
            StartupEvent::ComponentFailed { component, error } => {
                format!("{} failed: {}", component, error)
            }
            StartupEvent::ComponentDegraded { component, reason } => {
                format!("{} degraded: {}", component, reason)
            }
            StartupEvent::Ready { elapsed_ms } => format!("Ready after {}ms", elapsed_ms),
            StartupEvent::StartupFailed { phase, error } => {
                format!("Startup failed in {}: {}", phase, error)
            }
            StartupEvent::ShutdownComplete { exit_code } => {
                format!("Shutdown complete with exit code {}", exit_code)
            }
        }
    }
}

/// Broadcast bus for startup events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StartupEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StartupEvent> {
        self.sender.subscribe()
    }

    /// Publish to all subscribers, returning how many received it
    pub fn publish(&self, event: StartupEvent) -> usize {
        debug!("Publishing event: {}", event.description());
        // No subscribers is not an error during boot
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();

        let delivered = bus.publish(StartupEvent::ComponentRunning {
            component: "database".to_string(),
            retry_count: 0,
        });
        assert_eq!(delivered, 1);

        match receiver.recv().await.unwrap() {
            StartupEvent::ComponentRunning { component, .. } => assert_eq!(component, "database"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(StartupEvent::Ready { elapsed_ms: 5 }), 0);
    }
}
