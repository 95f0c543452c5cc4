//! Error taxonomy for the balancer core.
//!
//! Only caller contract violations and "nothing to route to" surface here.
//! Transient backend trouble is absorbed into health state and never
//! reaches routing callers (see [`crate::health::ProbeError`]).

use crate::backend::BackendId;
use thiserror::Error;

/// Errors returned by registry, connection tracking, selection and dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LbError {
    /// Every backend is unhealthy, suspected or draining.
    #[error("no eligible backend available")]
    NoEligibleBackend,

    /// The id is not (or no longer) registered.
    #[error("unknown backend: {0}")]
    UnknownBackend(BackendId),

    /// Registration conflict.
    #[error("backend already registered: {0}")]
    DuplicateBackend(BackendId),

    /// Weights must be at least 1.
    #[error("invalid weight {weight} for backend {id} (must be >= 1)")]
    InvalidWeight { id: BackendId, weight: u32 },
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, LbError>;
