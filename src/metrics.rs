use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Timing and retry record for one component
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentMetrics {
    pub duration: Duration,
    pub retry_count: u32,
    pub failed: bool,
    pub degraded: bool,
}

/// Aggregate metrics for one startup attempt
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupMetrics {
    pub total_duration: Option<Duration>,
    components: BTreeMap<String, ComponentMetrics>,
}

impl StartupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, component: &str, duration: Duration, retry_count: u32) {
        self.components.insert(
            component.to_string(),
            ComponentMetrics {
                duration,
                retry_count,
                failed: false,
                degraded: false,
            },
        );
    }

    pub fn record_failure(&mut self, component: &str, duration: Duration, retry_count: u32) {
        self.components.insert(
            component.to_string(),
            ComponentMetrics {
                duration,
                retry_count,
                failed: true,
                degraded: false,
            },
        );
    }

    pub fn record_degraded(&mut self, component: &str) {
        self.components
            .entry(component.to_string())
            .or_default()
            .degraded = true;
    }

    pub fn component(&self, component: &str) -> Option<&ComponentMetrics> {
        self.components.get(component)
    }

    pub fn successful(&self) -> usize {
        self.components
            .values()
            .filter(|m| !m.failed && !m.degraded)
            .count()
    }

    pub fn degraded(&self) -> usize {
        self.components
            .values()
            .filter(|m| !m.failed && m.degraded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.components.values().filter(|m| m.failed).count()
    }

    pub fn reset(&mut self) {
        self.components.clear();
        self.total_duration = None;
    }

    /// Generate a human readable summary
    pub fn generate_report(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Startup Metrics Report ===\n");
        report.push_str(&format!(
            "Successful: {}, degraded: {}, failed: {}\n",
            self.successful(),
            self.degraded(),
            self.failed()
        ));
        if let Some(total) = self.total_duration {
            report.push_str(&format!("Total duration: {:?}\n", total));
        }

        for (component, metrics) in &self.components {
            report.push_str(&format!(
                "  {}: {:?} (retries: {}{})\n",
                component,
                metrics.duration,
                metrics.retry_count,
                if metrics.failed { ", failed" } else { "" }
            ));
        }

        report.push_str("=== End Metrics Report ===");
        report
    }
}
