//! Request dispatcher.
//!
//! The public entry point of the balancer. [`Dispatcher::route`] picks a
//! backend for one request and takes a connection slot on it; the caller
//! hands the returned [`RoutingDecision`] back to
//! [`Dispatcher::report_outcome`] exactly once when the request is done.
//!
//! The dispatcher also owns the backend lifecycle: registration keeps the
//! registry, health state and connection counters in step, and a
//! maintenance loop reaps abandoned decisions and completes drains.

use crate::backend::algorithms::{Candidate, SelectionPolicy, SelectionRequest, build_policy};
use crate::backend::{
    Backend, BackendId, BackendRegistry, BackendSpec, BackendState, ConnectionTracker,
    Deregistration, MembershipFilter,
};
use crate::config::BalancerConfig;
use crate::error::{LbError, Result};
use crate::health::{HealthConfig, HealthTracker, PassiveHealthTracker};
use crate::metrics::MetricsSink;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Selections tried before giving up when chosen backends keep vanishing.
const ROUTE_ATTEMPTS: usize = 3;

/// Unique id of one routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecisionId(Uuid);

impl DecisionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Where one request was sent.
///
/// Must be passed to [`Dispatcher::report_outcome`] exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub id: DecisionId,
    pub backend_id: BackendId,
    pub decided_at: Instant,
}

#[derive(Debug)]
struct InFlight {
    backend_id: BackendId,
    decided_at: Instant,
}

/// What a backend reconcile changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<BackendId>,
    pub removed: Vec<BackendId>,
    pub reweighted: Vec<BackendId>,
}

impl ReconcileSummary {
    /// Did anything change?
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.reweighted.is_empty()
    }
}

/// Routes requests across the registered backends.
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    health: Arc<HealthTracker>,
    passive: PassiveHealthTracker,
    connections: ConnectionTracker,
    policy: Arc<dyn SelectionPolicy>,
    metrics: Arc<dyn MetricsSink>,
    inflight: DashMap<DecisionId, InFlight>,
    abandonment_timeout: Duration,
    maintenance_interval: Duration,
}

impl Dispatcher {
    /// Create a dispatcher using the configured algorithm.
    pub fn new(
        config: &BalancerConfig,
        health: HealthConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let policy = build_policy(&config.algorithm, config.random_seed);
        Self::with_policy(policy, config, health, metrics)
    }

    /// Create a dispatcher with an explicit selection policy.
    pub fn with_policy(
        policy: Arc<dyn SelectionPolicy>,
        config: &BalancerConfig,
        health: HealthConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let health = Arc::new(HealthTracker::new(health, Arc::clone(&metrics)));
        Self {
            registry: Arc::new(BackendRegistry::with_drain_grace(config.drain_grace_period)),
            passive: PassiveHealthTracker::new(Arc::clone(&health)),
            health,
            connections: ConnectionTracker::new(Arc::clone(&metrics)),
            policy,
            metrics,
            inflight: DashMap::new(),
            abandonment_timeout: config.abandonment_timeout,
            maintenance_interval: config.maintenance_interval,
        }
    }

    /// Shared membership, for the active health checker.
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Shared health state, for the active health checker.
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Name of the selection policy in use.
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Add a backend. It starts healthy and immediately eligible.
    pub fn register(&self, spec: BackendSpec) -> Result<()> {
        // Trackers exist before the member is visible to routing or health checks
        self.registry.register_with(spec, |id| {
            self.connections.register(id);
            self.health.register(id);
        })
    }

    /// Start draining a backend.
    ///
    /// It stops receiving new requests at once and is removed when its last
    /// in-flight request completes or the drain grace period elapses.
    pub fn deregister(&self, id: &BackendId) -> Result<Deregistration> {
        let outcome = self.registry.deregister(id)?;
        if outcome == Deregistration::Draining && self.connections.count(id) == 0 {
            self.sweep_drained();
        }
        Ok(outcome)
    }

    /// Change a backend's weight.
    pub fn set_weight(&self, id: &BackendId, weight: u32) -> Result<()> {
        self.registry.set_weight(id, weight)
    }

    /// Bring membership in line with `specs`: register new backends, drain
    /// the ones no longer listed and apply weight changes.
    pub fn reconcile(&self, specs: &[BackendSpec]) -> ReconcileSummary {
        let wanted: BTreeMap<&BackendId, u32> = specs.iter().map(|s| (&s.id, s.weight)).collect();
        let mut summary = ReconcileSummary::default();

        for member in self.registry.list(MembershipFilter::Serving) {
            match wanted.get(&member.id) {
                None => {
                    if self.deregister(&member.id).is_ok() {
                        summary.removed.push(member.id);
                    }
                }
                Some(&weight) if weight != member.weight => {
                    match self.set_weight(&member.id, weight) {
                        Ok(()) => summary.reweighted.push(member.id),
                        Err(e) => warn!(backend = %member.id, error = %e, "weight change rejected"),
                    }
                }
                Some(_) => {}
            }
        }

        for spec in specs {
            if self.registry.contains(&spec.id) {
                continue;
            }
            match self.register(spec.clone()) {
                Ok(()) => summary.added.push(spec.id.clone()),
                Err(e) => warn!(backend = %spec.id, error = %e, "backend registration rejected"),
            }
        }

        if !summary.is_empty() {
            info!(
                added = summary.added.len(),
                removed = summary.removed.len(),
                reweighted = summary.reweighted.len(),
                "backends reconciled"
            );
        }
        summary
    }

    /// Pick a backend for one request and take a connection slot on it.
    ///
    /// # Errors
    ///
    /// [`LbError::NoEligibleBackend`] when no backend is healthy and serving.
    /// No connection slot is taken in that case.
    pub fn route(&self, request: &SelectionRequest) -> Result<RoutingDecision> {
        for _ in 0..ROUTE_ATTEMPTS {
            let eligible = self.eligible();
            if eligible.is_empty() {
                debug!("no eligible backend");
                return Err(LbError::NoEligibleBackend);
            }

            let backend_id = self.policy.select(&eligible, request)?;
            match self.connections.acquire(&backend_id) {
                Ok(active) if self.is_serving(&backend_id) => {
                    return Ok(self.record_decision(backend_id, active));
                }
                // Deregistered after the eligible snapshot was taken
                Ok(_) => {
                    debug!(backend = %backend_id, "selected backend draining, reselecting");
                    if let Ok(0) = self.connections.release(&backend_id) {
                        self.sweep_drained();
                    }
                }
                Err(LbError::UnknownBackend(_)) => {
                    debug!(backend = %backend_id, "selected backend removed, reselecting");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(attempts = ROUTE_ATTEMPTS, "no eligible backend after reselection");
        Err(LbError::NoEligibleBackend)
    }

    fn record_decision(&self, backend_id: BackendId, active: u32) -> RoutingDecision {
        let decision = RoutingDecision {
            id: DecisionId::new(),
            backend_id,
            decided_at: Instant::now(),
        };
        self.inflight.insert(
            decision.id,
            InFlight {
                backend_id: decision.backend_id.clone(),
                decided_at: decision.decided_at,
            },
        );
        self.metrics.request_routed(&decision.backend_id);

        debug!(
            decision = %decision.id,
            backend = %decision.backend_id,
            active_connections = active,
            policy = self.policy.name(),
            "request routed"
        );
        decision
    }

    /// Report how a routed request went.
    ///
    /// Feeds a passive health signal and releases the connection slot. A
    /// repeated report, or one for a decision already reaped as abandoned, is
    /// logged and ignored.
    ///
    /// # Errors
    ///
    /// [`LbError::UnknownBackend`] if the backend was removed since routing.
    pub fn report_outcome(
        &self,
        decision: &RoutingDecision,
        success: bool,
        latency: Duration,
    ) -> Result<()> {
        let Some((_, entry)) = self.inflight.remove(&decision.id) else {
            warn!(
                decision = %decision.id,
                backend = %decision.backend_id,
                "outcome for unknown decision ignored (already reported or reaped)"
            );
            return Ok(());
        };

        let id = &entry.backend_id;
        if !self.registry.contains(id) {
            return Err(LbError::UnknownBackend(id.clone()));
        }

        self.passive.record(id, success, latency)?;
        let remaining = self.connections.release(id)?;
        self.metrics.outcome_reported(id, success, latency);

        debug!(
            decision = %decision.id,
            backend = %id,
            success,
            latency = ?latency,
            "outcome reported"
        );

        if remaining == 0 && self.is_draining(id) {
            self.sweep_drained();
        }
        Ok(())
    }

    /// Point-in-time view of every registered backend, optionally filtered
    /// by state. Ordered by id.
    pub fn backends(&self, state: Option<BackendState>) -> Vec<Backend> {
        self.registry
            .list(MembershipFilter::All)
            .into_iter()
            .filter_map(|member| {
                let health = self.health.snapshot(&member.id)?;
                let backend_state = if member.is_draining() {
                    BackendState::Draining
                } else {
                    health.status.into()
                };
                Some(Backend {
                    active_connections: self.connections.count(&member.id),
                    id: member.id,
                    weight: member.weight,
                    state: backend_state,
                    consecutive_failures: health.consecutive_failures,
                    consecutive_successes: health.consecutive_successes,
                })
            })
            .filter(|b| state.is_none_or(|s| b.state == s))
            .collect()
    }

    /// Number of routed requests not yet reported.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Force-release decisions older than the abandonment timeout.
    /// Returns how many were reaped.
    pub fn reap_abandoned(&self) -> usize {
        self.reap_abandoned_at(Instant::now())
    }

    /// [`reap_abandoned`](Self::reap_abandoned) as of `now`.
    pub fn reap_abandoned_at(&self, now: Instant) -> usize {
        let expired: Vec<DecisionId> = self
            .inflight
            .iter()
            .filter(|e| now.saturating_duration_since(e.decided_at) >= self.abandonment_timeout)
            .map(|e| *e.key())
            .collect();

        let mut reaped = 0;
        for decision in expired {
            // A concurrent report may have won the race
            let Some((_, entry)) = self.inflight.remove(&decision) else {
                continue;
            };
            reaped += 1;

            let id = &entry.backend_id;
            let age = now.saturating_duration_since(entry.decided_at);
            warn!(decision = %decision, backend = %id, age = ?age, "abandoned request reaped");
            self.metrics.request_abandoned(id);

            if !self.registry.contains(id) {
                continue;
            }
            if let Err(e) = self.passive.record_failure(id, age) {
                debug!(
                    backend = %id,
                    error = %e,
                    "abandonment signal for untracked backend dropped"
                );
            }
            if let Ok(0) = self.connections.release(id) {
                if self.is_draining(id) {
                    self.sweep_drained_at(now);
                }
            }
        }
        reaped
    }

    /// Remove draining backends that are idle or past their grace period.
    pub fn sweep_drained(&self) -> Vec<BackendId> {
        self.sweep_drained_at(Instant::now())
    }

    /// [`sweep_drained`](Self::sweep_drained) as of `now`.
    pub fn sweep_drained_at(&self, now: Instant) -> Vec<BackendId> {
        // Tracker state goes with the member, under the registry writer lock
        let removed = self.registry.sweep_drained_with(
            now,
            |id| self.connections.count(id) == 0,
            |id| {
                self.health.remove(id);
                self.connections.remove(id);
            },
        );
        for id in &removed {
            self.metrics.backend_removed(id);
        }
        removed
    }

    /// Run reaping and drain completion on an interval until shutdown.
    pub async fn run_maintenance(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.reap_abandoned_at(now);
                    self.sweep_drained_at(now);
                }

                _ = shutdown.recv() => {
                    debug!("dispatcher maintenance stopping");
                    break;
                }
            }
        }
    }

    fn is_serving(&self, id: &BackendId) -> bool {
        self.registry.get(id).is_some_and(|m| !m.is_draining())
    }

    fn is_draining(&self, id: &BackendId) -> bool {
        self.registry.get(id).is_some_and(|m| m.is_draining())
    }

    /// Serving, healthy backends with their current load, sorted by id.
    fn eligible(&self) -> Vec<Candidate> {
        self.registry
            .list(MembershipFilter::Serving)
            .into_iter()
            .filter(|m| self.health.is_healthy(&m.id))
            .map(|m| Candidate {
                active_connections: self.connections.count(&m.id),
                id: m.id,
                weight: m.weight,
            })
            .collect()
    }
}
