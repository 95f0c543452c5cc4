//! Metrics collection and exposition.

mod collector;
mod server;
mod sink;

pub use collector::MetricsCollector;
pub use server::MetricsServer;
pub use sink::{MetricsSink, NoopMetrics};
