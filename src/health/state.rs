//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Suspected: at least one recent failure, excluded until it recovers
//! - Unhealthy: excluded until it proves sustained recovery
//!
//! # State Transitions
//! ```text
//! Healthy   → Suspected: first failure
//! Suspected → Unhealthy: consecutive failures >= fail_threshold
//! Suspected → Healthy:   any success
//! Unhealthy → Healthy:   consecutive successes >= success_threshold
//! ```
//!
//! Active probes and passive request outcomes feed the same machine. Each
//! backend has its own lock, so racing signals for one backend serialize
//! while different backends never contend.

use crate::backend::{BackendId, BackendState};
use crate::error::{LbError, Result};
use crate::metrics::MetricsSink;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Configuration for health tracking.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before a suspected backend becomes unhealthy.
    pub fail_threshold: u32,
    /// Consecutive successes before an unhealthy backend is re-admitted.
    pub success_threshold: u32,
    /// Whether request outcomes reported by the dispatcher count.
    pub passive_checks: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 3,
            success_threshold: 3,
            passive_checks: true,
        }
    }
}

/// Liveness as decided by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    Healthy,
    Suspected,
    Unhealthy,
}

impl From<HealthStatus> for BackendState {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => BackendState::Healthy,
            HealthStatus::Suspected => BackendState::Suspected,
            HealthStatus::Unhealthy => BackendState::Unhealthy,
        }
    }
}

/// Where a health signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Active,
    Passive,
}

/// Result of one probe or one reported request.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub backend_id: BackendId,
    pub success: bool,
    pub latency: Duration,
    pub timestamp: Instant,
}

impl HealthCheckResult {
    /// A successful observation taken now.
    pub fn success(backend_id: BackendId, latency: Duration) -> Self {
        Self {
            backend_id,
            success: true,
            latency,
            timestamp: Instant::now(),
        }
    }

    /// A failed observation taken now.
    pub fn failure(backend_id: BackendId, latency: Duration) -> Self {
        Self {
            backend_id,
            success: false,
            latency,
            timestamp: Instant::now(),
        }
    }
}

/// A state change produced by one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

/// Copy of one backend's health record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_latency: Option<Duration>,
    pub last_checked: Option<Instant>,
    /// When the current status was entered.
    pub since: Instant,
}

#[derive(Debug)]
struct HealthRecord {
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_latency: Option<Duration>,
    last_checked: Option<Instant>,
    since: Instant,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_latency: None,
            last_checked: None,
            since: Instant::now(),
        }
    }

    fn apply(&mut self, result: &HealthCheckResult, config: &HealthConfig) -> Option<Transition> {
        self.last_latency = Some(result.latency);
        self.last_checked = Some(result.timestamp);

        let from = self.status;
        let to = if result.success {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            match from {
                HealthStatus::Healthy => HealthStatus::Healthy,
                HealthStatus::Suspected => HealthStatus::Healthy,
                HealthStatus::Unhealthy
                    if self.consecutive_successes >= config.success_threshold.max(1) =>
                {
                    HealthStatus::Healthy
                }
                HealthStatus::Unhealthy => HealthStatus::Unhealthy,
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            let suspected = match from {
                HealthStatus::Healthy | HealthStatus::Suspected => HealthStatus::Suspected,
                HealthStatus::Unhealthy => HealthStatus::Unhealthy,
            };
            if suspected == HealthStatus::Suspected
                && self.consecutive_failures >= config.fail_threshold.max(1)
            {
                HealthStatus::Unhealthy
            } else {
                suspected
            }
        };

        if to == from {
            return None;
        }

        self.status = to;
        self.since = result.timestamp;
        if to == HealthStatus::Healthy {
            self.consecutive_successes = 0;
        }
        Some(Transition { from, to })
    }

    fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            last_latency: self.last_latency,
            last_checked: self.last_checked,
            since: self.since,
        }
    }
}

/// Health state for all registered backends.
pub struct HealthTracker {
    records: DashMap<BackendId, Arc<Mutex<HealthRecord>>>,
    config: HealthConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl HealthTracker {
    /// Create a tracker with the given thresholds.
    pub fn new(config: HealthConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            records: DashMap::new(),
            config,
            metrics,
        }
    }

    /// Thresholds in use.
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Start tracking a backend. New backends start healthy.
    pub fn register(&self, id: &BackendId) {
        self.records
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(HealthRecord::new())));
    }

    /// Stop tracking a backend. Later signals for it are rejected.
    pub fn remove(&self, id: &BackendId) {
        self.records.remove(id);
    }

    /// Feed one observation into the state machine.
    ///
    /// Passive signals are dropped when passive checks are disabled.
    /// Returns the transition, if any.
    pub fn record(
        &self,
        result: &HealthCheckResult,
        source: SignalSource,
    ) -> Result<Option<Transition>> {
        let record = self.record_for(&result.backend_id)?;
        if source == SignalSource::Passive && !self.config.passive_checks {
            return Ok(None);
        }

        let transition = record.lock().apply(result, &self.config);

        if let Some(t) = transition {
            let id = &result.backend_id;
            if t.to == HealthStatus::Healthy {
                info!(backend = %id, from = ?t.from, source = ?source, "backend marked healthy");
            } else {
                warn!(
                    backend = %id,
                    from = ?t.from,
                    to = ?t.to,
                    source = ?source,
                    "backend health degraded"
                );
            }
            self.metrics.state_transition(id, t.from.into(), t.to.into());
        }

        Ok(transition)
    }

    /// Current status, `None` if the backend is not tracked.
    pub fn status(&self, id: &BackendId) -> Option<HealthStatus> {
        self.record_for(id).ok().map(|r| r.lock().status)
    }

    /// Is the backend tracked and healthy?
    pub fn is_healthy(&self, id: &BackendId) -> bool {
        self.status(id) == Some(HealthStatus::Healthy)
    }

    /// Copy of a backend's record.
    pub fn snapshot(&self, id: &BackendId) -> Option<HealthSnapshot> {
        self.record_for(id).ok().map(|r| r.lock().snapshot())
    }

    /// Number of tracked backends.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Is nothing tracked?
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record_for(&self, id: &BackendId) -> Result<Arc<Mutex<HealthRecord>>> {
        // Clone the Arc so the map shard is released before locking the record
        self.records
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| LbError::UnknownBackend(id.clone()))
    }
}
