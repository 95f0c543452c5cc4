//! Weighted round-robin load balancing algorithm.

use super::{Candidate, SelectionPolicy, SelectionRequest};
use crate::backend::BackendId;
use crate::error::{LbError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Weighted load balancer.
///
/// Each server is expanded into `weight` consecutive virtual slots and the
/// cursor walks the slots in order: weights A=3, B=1 yield A, A, A, B.
pub struct WeightedRoundRobin {
    counter: AtomicU64,
}

impl WeightedRoundRobin {
    /// Create a new weighted load balancer.
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for WeightedRoundRobin {
    fn select(&self, eligible: &[Candidate], _request: &SelectionRequest) -> Result<BackendId> {
        let total: u64 = eligible.iter().map(|c| u64::from(c.weight)).sum();
        if total == 0 {
            return Err(LbError::NoEligibleBackend);
        }

        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for candidate in eligible {
            let weight = u64::from(candidate.weight);
            if slot < weight {
                return Ok(candidate.id.clone());
            }
            slot -= weight;
        }

        // slot < total, so the walk always lands
        Err(LbError::NoEligibleBackend)
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted(weights: &[u32]) -> Vec<Candidate> {
        weights
            .iter()
            .enumerate()
            .map(|(i, &w)| Candidate {
                id: BackendId::new(format!("127.0.0.1:900{}", i + 1)),
                weight: w,
                active_connections: 0,
            })
            .collect()
    }

    #[test]
    fn test_virtual_sequence_order() {
        let wrr = WeightedRoundRobin::new();
        let servers = weighted(&[3, 1]);
        let request = SelectionRequest::new();

        let picks: Vec<BackendId> = (0..8)
            .map(|_| wrr.select(&servers, &request).unwrap())
            .collect();

        let a = servers[0].id.clone();
        let b = servers[1].id.clone();
        assert_eq!(
            picks,
            vec![a.clone(), a.clone(), a.clone(), b.clone(), a.clone(), a.clone(), a, b]
        );
    }

    #[test]
    fn test_weighted_ratio() {
        let wrr = WeightedRoundRobin::new();
        let servers = weighted(&[3, 1]);
        let request = SelectionRequest::new();

        // Skew the starting point; any multiple of the weight sum still holds
        wrr.select(&servers, &request).unwrap();
        wrr.select(&servers, &request).unwrap();

        let mut s1_count = 0;
        let mut s2_count = 0;
        for _ in 0..40 {
            if wrr.select(&servers, &request).unwrap() == servers[0].id {
                s1_count += 1;
            } else {
                s2_count += 1;
            }
        }

        // With 3:1 weights, s1 should get 30, s2 should get 10
        assert_eq!(s1_count, 30);
        assert_eq!(s2_count, 10);
    }

    #[test]
    fn test_equal_weights_behave_like_round_robin() {
        let wrr = WeightedRoundRobin::new();
        let servers = weighted(&[1, 1, 1]);
        let request = SelectionRequest::new();

        for round in 0..2 {
            for server in &servers {
                assert_eq!(
                    &wrr.select(&servers, &request).unwrap(),
                    &server.id,
                    "round {}",
                    round
                );
            }
        }
    }

    #[test]
    fn test_weighted_empty() {
        let wrr = WeightedRoundRobin::new();
        assert!(wrr.select(&[], &SelectionRequest::new()).is_err());
    }
}
