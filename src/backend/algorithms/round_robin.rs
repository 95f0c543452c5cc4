//! Round-robin load balancing algorithm.

use super::{Candidate, SelectionPolicy, SelectionRequest};
use crate::backend::BackendId;
use crate::error::{LbError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin load balancer.
///
/// Distributes requests evenly across all eligible servers in order. The
/// cursor is shared across calls and the eligible set is recomputed for each
/// call, so membership changes simply shift where the cursor lands.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Create a new round-robin load balancer.
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Advance the cursor and map it onto `len` slots.
    pub(crate) fn next_index(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for RoundRobin {
    fn select(&self, eligible: &[Candidate], _request: &SelectionRequest) -> Result<BackendId> {
        if eligible.is_empty() {
            return Err(LbError::NoEligibleBackend);
        }

        let idx = self.next_index(eligible.len());
        Ok(eligible[idx].id.clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
