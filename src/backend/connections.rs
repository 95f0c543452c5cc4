//! In-flight request tracking.

use crate::backend::BackendId;
use crate::error::{LbError, Result};
use crate::metrics::MetricsSink;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

/// Live in-flight counts per backend.
///
/// Each backend owns one atomic counter; there is no coordination across
/// backends.
pub struct ConnectionTracker {
    counters: DashMap<BackendId, Arc<AtomicU32>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ConnectionTracker {
    /// Create a tracker reporting gauges to `metrics`.
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            counters: DashMap::new(),
            metrics,
        }
    }

    /// Start tracking a backend with zero connections.
    pub fn register(&self, id: &BackendId) {
        self.counters
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)));
        self.metrics.active_connections(id, self.count(id));
    }

    /// Stop tracking a backend.
    pub fn remove(&self, id: &BackendId) {
        self.counters.remove(id);
    }

    /// Increment the in-flight count. Returns the new count.
    pub fn acquire(&self, id: &BackendId) -> Result<u32> {
        let counter = self.counter(id)?;
        let count = counter.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.active_connections(id, count);
        Ok(count)
    }

    /// Decrement the in-flight count, floored at zero. Returns the new count.
    pub fn release(&self, id: &BackendId) -> Result<u32> {
        let counter = self.counter(id)?;
        let previous = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            c.checked_sub(1)
        });

        let count = match previous {
            Ok(prev) => prev - 1,
            Err(_) => {
                warn!(backend = %id, "release without matching acquire, counter kept at 0");
                0
            }
        };
        self.metrics.active_connections(id, count);
        Ok(count)
    }

    /// Current count for one backend (0 if unknown).
    pub fn count(&self, id: &BackendId) -> u32 {
        self.counters
            .get(id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Is the backend tracked?
    pub fn contains(&self, id: &BackendId) -> bool {
        self.counters.contains_key(id)
    }

    /// Point-in-time mapping of backend id to in-flight count.
    pub fn snapshot(&self) -> HashMap<BackendId, u32> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Acquire)))
            .collect()
    }

    fn counter(&self, id: &BackendId) -> Result<Arc<AtomicU32>> {
        // Clone the Arc out so the shard lock is not held during the update
        self.counters
            .get(id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| LbError::UnknownBackend(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    fn tracker() -> ConnectionTracker {
        ConnectionTracker::new(Arc::new(NoopMetrics))
    }

    #[test]
    fn test_connection_tracking() {
        let tracker = tracker();
        let server = BackendId::from("127.0.0.1:8001");
        tracker.register(&server);

        assert_eq!(tracker.count(&server), 0);
        assert_eq!(tracker.acquire(&server).unwrap(), 1);
        assert_eq!(tracker.acquire(&server).unwrap(), 2);
        assert_eq!(tracker.release(&server).unwrap(), 1);
        assert_eq!(tracker.release(&server).unwrap(), 0);

        // Should not go negative
        assert_eq!(tracker.release(&server).unwrap(), 0);
        assert_eq!(tracker.count(&server), 0);
    }

    #[test]
    fn test_unknown_backend() {
        let tracker = tracker();
        let server = BackendId::from("127.0.0.1:8001");
        assert_eq!(
            tracker.acquire(&server).unwrap_err(),
            LbError::UnknownBackend(server.clone())
        );
        assert!(tracker.release(&server).is_err());
    }

    #[test]
    fn test_register_keeps_existing_count() {
        let tracker = tracker();
        let server = BackendId::from("a:1");
        tracker.register(&server);
        tracker.acquire(&server).unwrap();
        tracker.register(&server);
        assert_eq!(tracker.count(&server), 1);
    }

    #[test]
    fn test_snapshot() {
        let tracker = tracker();
        let a = BackendId::from("a:1");
        let b = BackendId::from("b:1");
        tracker.register(&a);
        tracker.register(&b);
        tracker.acquire(&a).unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&a], 1);
        assert_eq!(snapshot[&b], 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let tracker = Arc::new(tracker());
        let server = BackendId::from("a:1");
        tracker.register(&server);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let server = server.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.acquire(&server).unwrap();
                        tracker.release(&server).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.count(&server), 0);
    }
}
