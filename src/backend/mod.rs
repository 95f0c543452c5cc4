//! Backend identity, registry, connection tracking and selection algorithms.

pub mod algorithms;
mod connections;
mod registry;

pub use connections::ConnectionTracker;
pub use registry::{BackendRegistry, Deregistration, Member, MembershipFilter};

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Stable backend identifier, `address:port`.
///
/// Cheap to clone; ordering is lexicographic and is what selection
/// algorithms use to break ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(Arc<str>);

impl BackendId {
    /// Create an id from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BackendId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BackendId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<SocketAddr> for BackendId {
    fn from(addr: SocketAddr) -> Self {
        Self::from(addr.to_string())
    }
}

/// Observable state of a backend.
///
/// `Draining` is overlaid by the registry; the other three come from the
/// health state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendState {
    Healthy,
    Suspected,
    Unhealthy,
    Draining,
}

impl BackendState {
    /// Lowercase name, used for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::Healthy => "healthy",
            BackendState::Suspected => "suspected",
            BackendState::Unhealthy => "unhealthy",
            BackendState::Draining => "draining",
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub id: BackendId,
    pub weight: u32,
}

impl BackendSpec {
    /// A backend with the default weight of 1.
    pub fn new(id: impl Into<BackendId>) -> Self {
        Self {
            id: id.into(),
            weight: 1,
        }
    }

    /// Override the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// Point-in-time view of one backend, assembled from all trackers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub id: BackendId,
    pub weight: u32,
    pub state: BackendState,
    pub active_connections: u32,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_id_ordering() {
        let a = BackendId::from("10.0.0.1:80");
        let b = BackendId::from("10.0.0.2:80");
        assert!(a < b);
        assert_eq!(a.to_string(), "10.0.0.1:80");
    }

    #[test]
    fn test_backend_id_from_socket_addr() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(BackendId::from(addr).as_str(), "127.0.0.1:9000");
    }

    #[test]
    fn test_spec_default_weight() {
        let spec = BackendSpec::new("a:1");
        assert_eq!(spec.weight, 1);
        assert_eq!(spec.with_weight(5).weight, 5);
    }
}
