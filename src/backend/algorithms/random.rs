//! Uniform random selection.

use super::{Candidate, SelectionPolicy, SelectionRequest};
use crate::backend::BackendId;
use crate::error::{LbError, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random load balancer.
///
/// The random source is injected so a seeded generator gives reproducible
/// picks in tests.
pub struct Random<R = StdRng> {
    rng: Mutex<R>,
}

impl Random<StdRng> {
    /// Create a random load balancer seeded from the OS.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a random load balancer with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R> Random<R> {
    /// Create a random load balancer around any generator.
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl Default for Random<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng + Send> SelectionPolicy for Random<R> {
    fn select(&self, eligible: &[Candidate], _request: &SelectionRequest) -> Result<BackendId> {
        if eligible.is_empty() {
            return Err(LbError::NoEligibleBackend);
        }

        let idx = self.rng.lock().gen_range(0..eligible.len());
        Ok(eligible[idx].id.clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::algorithms::test_candidates;

    #[test]
    fn test_seeded_random_is_reproducible() {
        let servers = test_candidates(5);
        let request = SelectionRequest::new();
        let a = Random::with_seed(42);
        let b = Random::with_seed(42);

        for _ in 0..20 {
            assert_eq!(
                a.select(&servers, &request).unwrap(),
                b.select(&servers, &request).unwrap()
            );
        }
    }

    #[test]
    fn test_random_only_picks_eligible() {
        let servers = test_candidates(3);
        let request = SelectionRequest::new();
        let random = Random::with_seed(7);

        for _ in 0..50 {
            let picked = random.select(&servers, &request).unwrap();
            assert!(servers.iter().any(|s| s.id == picked));
        }
    }

    #[test]
    fn test_random_single_backend() {
        let servers = test_candidates(1);
        let random = Random::new();
        assert_eq!(
            random.select(&servers, &SelectionRequest::new()).unwrap(),
            servers[0].id
        );
    }
}
