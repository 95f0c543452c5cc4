//! Active health checker.
//!
//! Periodically probes every serving backend. Each backend gets its own task
//! with its own interval and timeout, so a hung probe only delays itself.
//! The task set follows registry membership: new backends start being
//! probed, draining and removed ones stop.

use crate::backend::{BackendId, BackendRegistry, MembershipFilter};
use crate::health::{HealthCheckResult, HealthTracker, HealthTransport, ProbeError, SignalSource};
use crate::metrics::MetricsSink;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

/// Default time between probes of one backend.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Default bound on a single probe.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a per-backend probe task needs.
#[derive(Clone)]
struct ProbeContext {
    health: Arc<HealthTracker>,
    transport: Arc<dyn HealthTransport>,
    metrics: Arc<dyn MetricsSink>,
    interval: Duration,
    timeout: Duration,
}

/// Active health checker that probes backend servers.
pub struct HealthChecker {
    registry: Arc<BackendRegistry>,
    ctx: ProbeContext,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(
        registry: Arc<BackendRegistry>,
        health: Arc<HealthTracker>,
        transport: Arc<dyn HealthTransport>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            registry,
            ctx: ProbeContext {
                health,
                transport,
                metrics,
                interval: DEFAULT_CHECK_INTERVAL,
                timeout: DEFAULT_CHECK_TIMEOUT,
            },
        }
    }

    /// Override the probe interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.ctx.interval = interval;
        self
    }

    /// Override the per-probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.timeout = timeout;
        self
    }

    /// Probe one backend now and feed the result into health state.
    pub async fn check(&self, id: &BackendId) -> HealthCheckResult {
        check_backend(&self.ctx, id).await
    }

    /// Start the health checker background task.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = ?self.ctx.interval,
            timeout = ?self.ctx.timeout,
            "health checker starting"
        );

        let mut changes = self.registry.subscribe();
        let mut tasks: HashMap<BackendId, JoinHandle<()>> = HashMap::new();
        self.reconcile(&mut tasks);

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.reconcile(&mut tasks);
                }

                _ = shutdown.recv() => {
                    info!("health checker shutting down");
                    break;
                }
            }
        }

        let handles: Vec<JoinHandle<()>> = tasks.into_values().collect();
        for handle in &handles {
            handle.abort();
        }
        futures::future::join_all(handles).await;
    }

    /// Start probe tasks for new serving backends, stop the rest.
    fn reconcile(&self, tasks: &mut HashMap<BackendId, JoinHandle<()>>) {
        let targets: HashSet<BackendId> = self
            .registry
            .list(MembershipFilter::Serving)
            .into_iter()
            .map(|m| m.id)
            .collect();

        tasks.retain(|id, handle| {
            let keep = targets.contains(id) && !handle.is_finished();
            if !keep {
                debug!(backend = %id, "stopping health checks");
                handle.abort();
            }
            keep
        });

        for id in targets {
            if tasks.contains_key(&id) {
                continue;
            }
            debug!(backend = %id, "starting health checks");
            let ctx = self.ctx.clone();
            let task_id = id.clone();
            tasks.insert(id, tokio::spawn(probe_loop(ctx, task_id)));
        }
    }
}

async fn probe_loop(ctx: ProbeContext, id: BackendId) {
    let mut ticker = interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let result = probe_backend(ctx.transport.as_ref(), &id, ctx.timeout).await;
        ctx.metrics.health_check(&id, result.success, result.latency);

        if ctx.health.record(&result, SignalSource::Active).is_err() {
            debug!(backend = %id, "backend no longer tracked, stopping health checks");
            break;
        }
    }
}

async fn check_backend(ctx: &ProbeContext, id: &BackendId) -> HealthCheckResult {
    let result = probe_backend(ctx.transport.as_ref(), id, ctx.timeout).await;
    ctx.metrics.health_check(id, result.success, result.latency);
    if let Err(e) = ctx.health.record(&result, SignalSource::Active) {
        debug!(backend = %id, error = %e, "probe result for untracked backend dropped");
    }
    result
}

/// Run one probe with a bounded timeout.
///
/// Transport errors and timeouts both become a failed result; nothing here
/// is fatal.
pub async fn probe_backend(
    transport: &dyn HealthTransport,
    id: &BackendId,
    probe_timeout: Duration,
) -> HealthCheckResult {
    let start = Instant::now();
    let outcome = match timeout(probe_timeout, transport.probe(id, probe_timeout)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeError::Timeout(probe_timeout)),
    };
    let latency = start.elapsed();

    match outcome {
        Ok(()) => {
            debug!(backend = %id, latency = ?latency, "health check passed");
            HealthCheckResult::success(id.clone(), latency)
        }
        Err(e) => {
            warn!(backend = %id, error = %e, "health check failed");
            HealthCheckResult::failure(id.clone(), latency)
        }
    }
}
