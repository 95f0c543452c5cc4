//! Metrics sink interface.

use crate::backend::{BackendId, BackendState};
use std::time::Duration;

/// Receives counters and gauges from the dispatcher and health tracker.
///
/// Every method defaults to doing nothing, so sinks only implement what
/// they export.
pub trait MetricsSink: Send + Sync {
    /// A request was routed to `backend`.
    fn request_routed(&self, _backend: &BackendId) {}

    /// The caller reported the outcome of a routed request.
    fn outcome_reported(&self, _backend: &BackendId, _success: bool, _latency: Duration) {}

    /// A routed request was never reported and got force-released.
    fn request_abandoned(&self, _backend: &BackendId) {}

    /// A backend changed state.
    fn state_transition(&self, _backend: &BackendId, _from: BackendState, _to: BackendState) {}

    /// Current in-flight count for a backend.
    fn active_connections(&self, _backend: &BackendId, _count: u32) {}

    /// An active health probe finished.
    fn health_check(&self, _backend: &BackendId, _success: bool, _latency: Duration) {}

    /// A backend left the registry for good.
    fn backend_removed(&self, _backend: &BackendId) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}
