//! Metrics collector using prometheus-client.
//!
//! Provides metrics for routing decisions, request outcomes, in-flight
//! connections, health checks and backend state transitions.

use crate::backend::{BackendId, BackendState};
use crate::metrics::MetricsSink;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Labels for request outcome and health check counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabels {
    pub backend: String,
    pub result: Outcome,
}

/// Labels for state transition counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub backend: String,
    pub from: String,
    pub to: String,
}

/// Success or failure of a request or probe.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Success,
    Failure,
}

impl From<bool> for Outcome {
    fn from(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Routing decisions per backend.
    requests_routed: Family<BackendLabels, Counter>,
    /// Reported outcomes per backend and result.
    request_outcomes: Family<ResultLabels, Counter>,
    /// Reported request latency (in seconds).
    request_duration_seconds: Family<BackendLabels, Histogram>,
    /// Force-released requests.
    requests_abandoned: Family<BackendLabels, Counter>,
    /// In-flight requests per backend.
    active_connections: Family<BackendLabels, Gauge>,
    /// Backend eligibility (1 = healthy, 0 = anything else).
    backend_healthy: Family<BackendLabels, Gauge>,
    /// State machine transitions.
    state_transitions: Family<TransitionLabels, Counter>,
    /// Active probe results.
    health_checks: Family<ResultLabels, Counter>,
    /// Active probe latency (in seconds).
    health_check_duration_seconds: Family<BackendLabels, Histogram>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Buckets: 1ms up to ~10s
        let latency_histogram = || Histogram::new(exponential_buckets(0.001, 2.5, 11));

        let requests_routed = Family::<BackendLabels, Counter>::default();
        let request_outcomes = Family::<ResultLabels, Counter>::default();
        let request_duration_seconds =
            Family::<BackendLabels, Histogram>::new_with_constructor(latency_histogram);
        let requests_abandoned = Family::<BackendLabels, Counter>::default();
        let active_connections = Family::<BackendLabels, Gauge>::default();
        let backend_healthy = Family::<BackendLabels, Gauge>::default();
        let state_transitions = Family::<TransitionLabels, Counter>::default();
        let health_checks = Family::<ResultLabels, Counter>::default();
        let health_check_duration_seconds =
            Family::<BackendLabels, Histogram>::new_with_constructor(latency_histogram);

        registry.register(
            "poolbalancer_requests_routed",
            "Total number of routing decisions",
            requests_routed.clone(),
        );
        registry.register(
            "poolbalancer_request_outcomes",
            "Reported request outcomes",
            request_outcomes.clone(),
        );
        registry.register(
            "poolbalancer_request_duration_seconds",
            "Reported request latency in seconds",
            request_duration_seconds.clone(),
        );
        registry.register(
            "poolbalancer_requests_abandoned",
            "Requests force-released after the abandonment timeout",
            requests_abandoned.clone(),
        );
        registry.register(
            "poolbalancer_active_connections",
            "Number of in-flight requests",
            active_connections.clone(),
        );
        registry.register(
            "poolbalancer_backend_healthy",
            "Backend eligibility (1=healthy, 0=suspected, unhealthy or draining)",
            backend_healthy.clone(),
        );
        registry.register(
            "poolbalancer_backend_state_transitions",
            "Backend health state transitions",
            state_transitions.clone(),
        );
        registry.register(
            "poolbalancer_health_checks",
            "Active health checks performed",
            health_checks.clone(),
        );
        registry.register(
            "poolbalancer_health_check_duration_seconds",
            "Active health check latency in seconds",
            health_check_duration_seconds.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                requests_routed,
                request_outcomes,
                request_duration_seconds,
                requests_abandoned,
                active_connections,
                backend_healthy,
                state_transitions,
                health_checks,
                health_check_duration_seconds,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn backend_labels(backend: &BackendId) -> BackendLabels {
    BackendLabels {
        backend: backend.to_string(),
    }
}

impl MetricsSink for MetricsCollector {
    fn request_routed(&self, backend: &BackendId) {
        self.inner
            .requests_routed
            .get_or_create(&backend_labels(backend))
            .inc();
    }

    fn outcome_reported(&self, backend: &BackendId, success: bool, latency: Duration) {
        let labels = ResultLabels {
            backend: backend.to_string(),
            result: success.into(),
        };
        self.inner.request_outcomes.get_or_create(&labels).inc();
        self.inner
            .request_duration_seconds
            .get_or_create(&backend_labels(backend))
            .observe(latency.as_secs_f64());
    }

    fn request_abandoned(&self, backend: &BackendId) {
        self.inner
            .requests_abandoned
            .get_or_create(&backend_labels(backend))
            .inc();
    }

    fn state_transition(&self, backend: &BackendId, from: BackendState, to: BackendState) {
        let labels = TransitionLabels {
            backend: backend.to_string(),
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        };
        self.inner.state_transitions.get_or_create(&labels).inc();
        self.inner
            .backend_healthy
            .get_or_create(&backend_labels(backend))
            .set(i64::from(to == BackendState::Healthy));
    }

    fn active_connections(&self, backend: &BackendId, count: u32) {
        self.inner
            .active_connections
            .get_or_create(&backend_labels(backend))
            .set(i64::from(count));
    }

    fn health_check(&self, backend: &BackendId, success: bool, latency: Duration) {
        let labels = ResultLabels {
            backend: backend.to_string(),
            result: success.into(),
        };
        self.inner.health_checks.get_or_create(&labels).inc();
        self.inner
            .health_check_duration_seconds
            .get_or_create(&backend_labels(backend))
            .observe(latency.as_secs_f64());
    }

    fn backend_removed(&self, backend: &BackendId) {
        let labels = backend_labels(backend);
        self.inner.active_connections.remove(&labels);
        self.inner.backend_healthy.remove(&labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn encoded(collector: &MetricsCollector) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, collector.registry()).unwrap();
        buffer
    }

    #[test]
    fn test_routing_metrics_encoded() {
        let collector = MetricsCollector::new();
        let backend = BackendId::from("10.0.0.1:80");

        collector.request_routed(&backend);
        collector.active_connections(&backend, 3);
        collector.outcome_reported(&backend, true, Duration::from_millis(12));

        let output = encoded(&collector);
        assert!(output.contains("poolbalancer_requests_routed_total{backend=\"10.0.0.1:80\"} 1"));
        assert!(output.contains("poolbalancer_active_connections{backend=\"10.0.0.1:80\"} 3"));
        assert!(output.contains("poolbalancer_request_outcomes_total"));
    }

    #[test]
    fn test_state_transition_metrics() {
        let collector = MetricsCollector::new();
        let backend = BackendId::from("10.0.0.1:80");

        collector.state_transition(&backend, BackendState::Healthy, BackendState::Suspected);

        let output = encoded(&collector);
        assert!(output.contains("poolbalancer_backend_state_transitions_total"));
        assert!(output.contains("from=\"healthy\""));
        assert!(output.contains("to=\"suspected\""));
        assert!(output.contains("poolbalancer_backend_healthy{backend=\"10.0.0.1:80\"} 0"));
    }

    #[test]
    fn test_backend_removed_drops_gauges() {
        let collector = MetricsCollector::new();
        let backend = BackendId::from("10.0.0.1:80");

        collector.active_connections(&backend, 1);
        collector.backend_removed(&backend);

        let output = encoded(&collector);
        assert!(!output.contains("poolbalancer_active_connections{backend=\"10.0.0.1:80\"}"));
    }

    #[test]
    fn test_health_check_recording() {
        let collector = MetricsCollector::new();
        let backend = BackendId::from("10.0.0.1:80");

        collector.health_check(&backend, true, Duration::from_millis(3));
        collector.health_check(&backend, false, Duration::from_secs(2));

        let output = encoded(&collector);
        assert!(output.contains("result=\"Success\""));
        assert!(output.contains("result=\"Failure\""));
    }
}
