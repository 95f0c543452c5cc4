//! Health checking for backend servers.

mod checker;
mod passive;
mod state;
mod transport;

pub use checker::{DEFAULT_CHECK_INTERVAL, DEFAULT_CHECK_TIMEOUT, HealthChecker, probe_backend};
pub use passive::PassiveHealthTracker;
pub use state::{
    HealthCheckResult, HealthConfig, HealthSnapshot, HealthStatus, HealthTracker, SignalSource,
    Transition,
};
pub use transport::{HealthTransport, HttpTransport, ProbeError, TcpTransport};
