//! Least-connections load balancing algorithms.

use super::{Candidate, SelectionPolicy, SelectionRequest};
use crate::backend::BackendId;
use crate::error::{LbError, Result};
use std::cmp::Ordering;

/// Least-connections load balancer.
///
/// Sends requests to the server with the fewest active connections.
/// Breaks ties by lowest backend id.
pub struct LeastConnections;

impl LeastConnections {
    /// Create a new least-connections load balancer.
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for LeastConnections {
    fn select(&self, eligible: &[Candidate], _request: &SelectionRequest) -> Result<BackendId> {
        eligible
            .iter()
            .min_by(|a, b| {
                a.active_connections
                    .cmp(&b.active_connections)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|c| c.id.clone())
            .ok_or(LbError::NoEligibleBackend)
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

/// Weighted least-connections load balancer.
///
/// Minimizes `active_connections / weight`. Ratios are compared by
/// cross-multiplication so no precision is lost.
pub struct WeightedLeastConnections;

impl WeightedLeastConnections {
    /// Create a new weighted least-connections load balancer.
    pub fn new() -> Self {
        Self
    }
}

impl Default for WeightedLeastConnections {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_load(a: &Candidate, b: &Candidate) -> Ordering {
    // a.conns / a.weight vs b.conns / b.weight; weights are >= 1
    let lhs = u64::from(a.active_connections) * u64::from(b.weight.max(1));
    let rhs = u64::from(b.active_connections) * u64::from(a.weight.max(1));
    lhs.cmp(&rhs)
}

impl SelectionPolicy for WeightedLeastConnections {
    fn select(&self, eligible: &[Candidate], _request: &SelectionRequest) -> Result<BackendId> {
        eligible
            .iter()
            .min_by(|a, b| compare_load(a, b).then_with(|| a.id.cmp(&b.id)))
            .map(|c| c.id.clone())
            .ok_or(LbError::NoEligibleBackend)
    }

    fn name(&self) -> &'static str {
        "weighted_least_connections"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::algorithms::test_candidates;

    #[test]
    fn test_least_conn_selects_lowest() {
        let lc = LeastConnections::new();
        let mut servers = test_candidates(3);

        servers[0].active_connections = 2;
        servers[1].active_connections = 1;

        // Server 3 has 0 connections, should be selected
        let selected = lc.select(&servers, &SelectionRequest::new()).unwrap();
        assert_eq!(selected, servers[2].id);
    }

    #[test]
    fn test_least_conn_equal_connections() {
        let lc = LeastConnections::new();
        let mut servers = test_candidates(3);
        for s in &mut servers {
            s.active_connections = 4;
        }

        // Tie: lowest id wins regardless of slice order
        servers.reverse();
        let selected = lc.select(&servers, &SelectionRequest::new()).unwrap();
        assert_eq!(selected, BackendId::from("127.0.0.1:8001"));
    }

    #[test]
    fn test_least_conn_empty() {
        let lc = LeastConnections::new();
        assert!(lc.select(&[], &SelectionRequest::new()).is_err());
    }

    #[test]
    fn test_weighted_least_conn_uses_ratio() {
        let wlc = WeightedLeastConnections::new();
        let servers = vec![
            Candidate {
                id: BackendId::from("a:1"),
                weight: 1,
                active_connections: 2,
            },
            Candidate {
                id: BackendId::from("b:1"),
                weight: 4,
                active_connections: 6,
            },
        ];

        // a: 2/1 = 2.0, b: 6/4 = 1.5
        let selected = wlc.select(&servers, &SelectionRequest::new()).unwrap();
        assert_eq!(selected, BackendId::from("b:1"));
    }

    #[test]
    fn test_weighted_least_conn_tie_break() {
        let wlc = WeightedLeastConnections::new();
        let servers = vec![
            Candidate {
                id: BackendId::from("b:1"),
                weight: 2,
                active_connections: 2,
            },
            Candidate {
                id: BackendId::from("a:1"),
                weight: 1,
                active_connections: 1,
            },
        ];

        // Both at ratio 1.0
        let selected = wlc.select(&servers, &SelectionRequest::new()).unwrap();
        assert_eq!(selected, BackendId::from("a:1"));
    }
}
