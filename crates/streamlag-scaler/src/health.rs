//! Per-trigger health tracking.
//!
//! Counts consecutive poll failures. Transient failures degrade the
//! trigger and flip it to unhealthy at the configured threshold; a
//! configuration failure is unhealthy immediately. One success recovers.

use serde::Serialize;
use tracing::{info, warn};

/// Health of a trigger, as seen through its polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Not polled yet.
    Unknown,
    Healthy,
    /// Failing, but below the threshold.
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// How a single poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Success,
    /// Retryable: resolution, connection, protocol, or timeout.
    TransientFailure,
    /// Needs an operator: bad metadata or a missing stream/group.
    ConfigurationFailure,
}

/// Tracks consecutive poll results for one trigger.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    /// Consecutive transient failures before unhealthy.
    unhealthy_threshold: u32,
}

impl HealthTracker {
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    /// Record a poll result and return the new status.
    pub fn record(&mut self, result: PollResult) -> HealthStatus {
        let previous = self.status;

        match result {
            PollResult::Success => {
                self.consecutive_failures = 0;
                self.status = HealthStatus::Healthy;
            }
            PollResult::TransientFailure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.status = if self.consecutive_failures >= self.unhealthy_threshold {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Degraded
                };
            }
            PollResult::ConfigurationFailure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.status = HealthStatus::Unhealthy;
            }
        }

        if self.status != previous {
            match self.status {
                HealthStatus::Healthy if previous != HealthStatus::Unknown => {
                    info!(from = %previous, "trigger recovered");
                }
                HealthStatus::Degraded | HealthStatus::Unhealthy => {
                    warn!(
                        from = %previous,
                        to = %self.status,
                        failures = self.consecutive_failures,
                        threshold = self.unhealthy_threshold,
                        "trigger health changed"
                    );
                }
                _ => {}
            }
        }

        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown() {
        let tracker = HealthTracker::new(3);
        assert_eq!(tracker.status(), HealthStatus::Unknown);
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn transient_failures_degrade_then_trip() {
        let mut tracker = HealthTracker::new(3);
        assert_eq!(tracker.record(PollResult::Success), HealthStatus::Healthy);
        assert_eq!(
            tracker.record(PollResult::TransientFailure),
            HealthStatus::Degraded
        );
        assert_eq!(
            tracker.record(PollResult::TransientFailure),
            HealthStatus::Degraded
        );
        assert_eq!(
            tracker.record(PollResult::TransientFailure),
            HealthStatus::Unhealthy
        );
        assert_eq!(tracker.consecutive_failures(), 3);
    }

    #[test]
    fn configuration_failure_is_immediately_unhealthy() {
        let mut tracker = HealthTracker::new(5);
        assert_eq!(
            tracker.record(PollResult::ConfigurationFailure),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn single_success_recovers() {
        let mut tracker = HealthTracker::new(1);
        tracker.record(PollResult::TransientFailure);
        assert_eq!(tracker.status(), HealthStatus::Unhealthy);

        assert_eq!(tracker.record(PollResult::Success), HealthStatus::Healthy);
        assert_eq!(tracker.consecutive_failures(), 0);
        assert!(tracker.is_healthy());
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let mut tracker = HealthTracker::new(0);
        assert_eq!(
            tracker.record(PollResult::TransientFailure),
            HealthStatus::Unhealthy
        );
    }
}
