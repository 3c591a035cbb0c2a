//! Component health reporting.
//!
//! The store reports `Degraded` once consecutive persistence failures reach
//! the alert threshold; the reconciler reports `Degraded` after a pass that
//! had to skip records. Nothing in rollcall is ever `Unhealthy` on its own:
//! the in-memory copy keeps serving commands.

use serde::Serialize;
use std::fmt;

/// Health levels, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Serving, but durability or convergence is impaired
    Degraded,
    /// Not serving
    Unhealthy,
}

impl HealthStatus {
    /// `true` for [`HealthStatus::Healthy`]
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// `true` for [`HealthStatus::Degraded`]
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// `true` for [`HealthStatus::Unhealthy`]
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }

    /// The worse of two levels
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name (`store`, `reconciler`)
    pub component: String,
    /// Current level
    pub status: HealthStatus,
    /// Why it is not healthy
    pub message: Option<String>,
    /// Counters worth showing next to the status
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// A healthy component
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// A degraded component
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Attach a key/value pair
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.push((key.into(), value.to_string()));
        self
    }

    /// Look up a metadata value
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Health of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among the checks
    pub status: HealthStatus,
    /// Per-component checks
    pub checks: Vec<HealthCheck>,
    /// When the report was taken
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Aggregate component checks.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|check| check.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);
        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Find a component's check
    #[must_use]
    pub fn check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|check| check.component == component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_runs_best_to_worst() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unhealthy);
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn report_takes_the_worst_check() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("reconciler"),
            HealthCheck::degraded("store", "3 consecutive persistence failures")
                .with_metadata("dirty", 2),
        ]);
        assert!(report.status.is_degraded());
        assert_eq!(report.check("store").and_then(|c| c.metadata("dirty")), Some("2"));
        assert_eq!(report.status.to_string(), "degraded");
    }

    #[test]
    fn empty_report_is_healthy() {
        assert!(HealthReport::new(Vec::new()).status.is_healthy());
    }
}
