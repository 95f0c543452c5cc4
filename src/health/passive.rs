//! Passive health tracking.
//!
//! Turns reported request outcomes into health signals.

use crate::backend::BackendId;
use crate::error::Result;
use crate::health::{HealthCheckResult, HealthTracker, SignalSource, Transition};
use std::sync::Arc;
use std::time::Duration;

/// Feeds request outcomes into the shared health tracker.
///
/// This is called by the dispatcher when the caller reports how a routed
/// request went. A failure counts exactly like a failed active probe unless
/// passive checks are disabled.
#[derive(Clone)]
pub struct PassiveHealthTracker {
    /// Shared health state.
    health: Arc<HealthTracker>,
}

impl PassiveHealthTracker {
    /// Create a new passive health tracker.
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self { health }
    }

    /// Are passive signals taken into account?
    pub fn enabled(&self) -> bool {
        self.health.config().passive_checks
    }

    /// Record the outcome of one request.
    pub fn record(
        &self,
        backend: &BackendId,
        success: bool,
        latency: Duration,
    ) -> Result<Option<Transition>> {
        let result = if success {
            HealthCheckResult::success(backend.clone(), latency)
        } else {
            HealthCheckResult::failure(backend.clone(), latency)
        };
        self.health.record(&result, SignalSource::Passive)
    }

    /// Record a successful request to a server.
    pub fn record_success(&self, backend: &BackendId, latency: Duration) -> Result<Option<Transition>> {
        self.record(backend, true, latency)
    }

    /// Record a failed request to a server.
    ///
    /// This is called when:
    /// - The caller reports a failed request
    /// - A routed request is abandoned and force-released
    pub fn record_failure(&self, backend: &BackendId, latency: Duration) -> Result<Option<Transition>> {
        self.record(backend, false, latency)
    }

    /// Check if a server is healthy.
    pub fn is_healthy(&self, backend: &BackendId) -> bool {
        self.health.is_healthy(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthConfig;
    use crate::metrics::NoopMetrics;

    fn setup(passive_checks: bool) -> (PassiveHealthTracker, BackendId) {
        let config = HealthConfig {
            fail_threshold: 3,
            success_threshold: 2,
            passive_checks,
        };
        let health = Arc::new(HealthTracker::new(config, Arc::new(NoopMetrics)));
        let server = BackendId::from("127.0.0.1:8001");
        health.register(&server);
        (PassiveHealthTracker::new(health), server)
    }

    #[test]
    fn test_passive_tracking() {
        let (tracker, server) = setup(true);

        // Server starts healthy
        assert!(tracker.is_healthy(&server));

        // After 3 failures, becomes unhealthy
        for _ in 0..3 {
            tracker.record_failure(&server, Duration::ZERO).unwrap();
        }
        assert!(!tracker.is_healthy(&server));

        tracker.record_success(&server, Duration::ZERO).unwrap();
        assert!(!tracker.is_healthy(&server));
        tracker.record_success(&server, Duration::ZERO).unwrap();
        assert!(tracker.is_healthy(&server));
    }

    #[test]
    fn test_disabled_passive_tracking() {
        let (tracker, server) = setup(false);
        assert!(!tracker.enabled());

        for _ in 0..5 {
            assert!(tracker.record_failure(&server, Duration::ZERO).unwrap().is_none());
        }
        assert!(tracker.is_healthy(&server));
    }
}
