//! poolbalancer - a health-aware load balancer core
//!
//! The crate decides which backend a request goes to. It does not proxy
//! traffic itself; callers route, forward the request however they like and
//! report the outcome back. It provides:
//! - A backend registry with graceful draining
//! - Active (TCP/HTTP) and passive health checking with flap damping
//! - Per-backend in-flight connection tracking
//! - Round robin, weighted, least connections, IP hash and random selection
//! - Hot configuration reload
//! - Prometheus metrics

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod util;

pub use backend::algorithms::{SelectionPolicy, SelectionRequest};
pub use backend::{Backend, BackendId, BackendSpec, BackendState};
pub use config::Config;
pub use dispatcher::{DecisionId, Dispatcher, ReconcileSummary, RoutingDecision};
pub use error::{LbError, Result};
