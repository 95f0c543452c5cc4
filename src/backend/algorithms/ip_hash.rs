//! IP hash load balancing algorithm.

use super::{Candidate, RoundRobin, SelectionPolicy, SelectionRequest};
use crate::backend::BackendId;
use crate::error::{LbError, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// IP hash load balancer.
///
/// Routes requests carrying the same client key to the same server for as
/// long as the eligible set does not change. When servers join or leave the
/// modulus changes and affinity is lost; that trade-off is accepted.
/// Requests without a key are spread round-robin.
pub struct IpHash {
    fallback: RoundRobin,
}

impl IpHash {
    /// Create a new IP hash load balancer.
    pub fn new() -> Self {
        Self {
            fallback: RoundRobin::new(),
        }
    }
}

impl Default for IpHash {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl SelectionPolicy for IpHash {
    fn select(&self, eligible: &[Candidate], request: &SelectionRequest) -> Result<BackendId> {
        if eligible.is_empty() {
            return Err(LbError::NoEligibleBackend);
        }

        let idx = match request.client_key.as_deref() {
            Some(key) => (hash_key(key) % eligible.len() as u64) as usize,
            None => self.fallback.next_index(eligible.len()),
        };
        Ok(eligible[idx].id.clone())
    }

    fn name(&self) -> &'static str {
        "ip_hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::algorithms::test_candidates;
    use std::collections::HashSet;

    #[test]
    fn test_ip_hash_consistency() {
        let ip_hash = IpHash::new();
        let servers = test_candidates(3);
        let request = SelectionRequest::with_client_key("192.168.1.100");

        // Same client should always get same server
        let s1 = ip_hash.select(&servers, &request).unwrap();
        let s2 = ip_hash.select(&servers, &request).unwrap();
        let s3 = ip_hash.select(&servers, &request).unwrap();

        assert_eq!(s1, s2);
        assert_eq!(s2, s3);
    }

    #[test]
    fn test_ip_hash_independent_instances_agree() {
        let servers = test_candidates(4);
        let request = SelectionRequest::with_client_key("10.0.0.7");
        assert_eq!(
            IpHash::new().select(&servers, &request).unwrap(),
            IpHash::new().select(&servers, &request).unwrap()
        );
    }

    #[test]
    fn test_ip_hash_spreads_clients() {
        let ip_hash = IpHash::new();
        let servers = test_candidates(3);

        let picked: HashSet<BackendId> = (0..64)
            .map(|i| {
                let request = SelectionRequest::with_client_key(format!("10.0.0.{}", i));
                ip_hash.select(&servers, &request).unwrap()
            })
            .collect();
        assert!(picked.len() > 1);
    }

    #[test]
    fn test_ip_hash_without_key_round_robins() {
        let ip_hash = IpHash::new();
        let servers = test_candidates(2);
        let request = SelectionRequest::new();

        let s1 = ip_hash.select(&servers, &request).unwrap();
        let s2 = ip_hash.select(&servers, &request).unwrap();
        assert_ne!(s1, s2);
    }
}
