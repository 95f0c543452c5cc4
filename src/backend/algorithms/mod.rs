//! Load balancing algorithms.

mod ip_hash;
mod least_conn;
mod random;
mod round_robin;
mod weighted;

pub use ip_hash::IpHash;
pub use least_conn::{LeastConnections, WeightedLeastConnections};
pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

use crate::backend::BackendId;
use crate::config::Algorithm;
use crate::error::Result;
use std::sync::Arc;
use std::time::Instant;

/// A backend eligible for the current request, with the load figures
/// policies rank on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: BackendId,
    pub weight: u32,
    pub active_connections: u32,
}

impl Candidate {
    /// Candidate with weight 1 and no connections.
    pub fn new(id: impl Into<BackendId>) -> Self {
        Self {
            id: id.into(),
            weight: 1,
            active_connections: 0,
        }
    }
}

/// Per-request selection input.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    /// Affinity key for hash-based policies (usually the client IP).
    pub client_key: Option<String>,
    pub timestamp: Instant,
}

impl SelectionRequest {
    /// A request without an affinity key.
    pub fn new() -> Self {
        Self {
            client_key: None,
            timestamp: Instant::now(),
        }
    }

    /// A request carrying an affinity key.
    pub fn with_client_key(key: impl Into<String>) -> Self {
        Self {
            client_key: Some(key.into()),
            timestamp: Instant::now(),
        }
    }
}

impl Default for SelectionRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for load balancing algorithms.
///
/// Implementations must be deterministic for identical inputs and internal
/// state. Candidates are passed sorted by id.
pub trait SelectionPolicy: Send + Sync {
    /// Pick one backend from `eligible`.
    ///
    /// # Errors
    ///
    /// [`LbError::NoEligibleBackend`](crate::LbError::NoEligibleBackend) when
    /// `eligible` is empty.
    fn select(&self, eligible: &[Candidate], request: &SelectionRequest) -> Result<BackendId>;

    /// Short algorithm name for logs.
    fn name(&self) -> &'static str;
}

/// Build the policy for a configured algorithm.
///
/// `random_seed` only matters for [`Algorithm::Random`]; without it the
/// generator is seeded from the OS.
pub fn build_policy(algorithm: &Algorithm, random_seed: Option<u64>) -> Arc<dyn SelectionPolicy> {
    match algorithm {
        Algorithm::RoundRobin => Arc::new(RoundRobin::new()),
        Algorithm::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new()),
        Algorithm::LeastConnections => Arc::new(LeastConnections::new()),
        Algorithm::WeightedLeastConnections => Arc::new(WeightedLeastConnections::new()),
        Algorithm::IpHash => Arc::new(IpHash::new()),
        Algorithm::Random => match random_seed {
            Some(seed) => Arc::new(Random::with_seed(seed)),
            None => Arc::new(Random::new()),
        },
    }
}

#[cfg(test)]
pub(crate) fn test_candidates(n: usize) -> Vec<Candidate> {
    (1..=n)
        .map(|i| Candidate::new(format!("127.0.0.1:800{}", i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LbError;

    #[test]
    fn test_every_policy_rejects_empty_set() {
        let algorithms = [
            Algorithm::RoundRobin,
            Algorithm::WeightedRoundRobin,
            Algorithm::LeastConnections,
            Algorithm::WeightedLeastConnections,
            Algorithm::IpHash,
            Algorithm::Random,
        ];
        let request = SelectionRequest::with_client_key("10.1.1.1");

        for algorithm in &algorithms {
            let policy = build_policy(algorithm, Some(1));
            assert_eq!(
                policy.select(&[], &request).unwrap_err(),
                LbError::NoEligibleBackend,
                "{} accepted an empty set",
                policy.name()
            );
        }
    }

    #[test]
    fn test_build_policy_names() {
        assert_eq!(build_policy(&Algorithm::RoundRobin, None).name(), "round_robin");
        assert_eq!(
            build_policy(&Algorithm::WeightedLeastConnections, None).name(),
            "weighted_least_connections"
        );
        assert_eq!(build_policy(&Algorithm::Random, Some(9)).name(), "random");
    }
}
