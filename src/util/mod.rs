//! Logging and shutdown helpers for the daemon.

mod logging;
mod shutdown;

pub use logging::{env_filter, init_logging};
pub use shutdown::ShutdownSignal;
