//! Configuration data types.

use crate::backend::BackendSpec;
use crate::health::HealthConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Routing and lifecycle settings
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Active and passive health check settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Upstream servers
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl Config {
    /// Thresholds for the health state machine.
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            fail_threshold: self.health_check.fail_threshold,
            success_threshold: self.health_check.success_threshold,
            passive_checks: self.balancer.passive_checks,
        }
    }

    /// Registration inputs for every configured backend.
    pub fn backend_specs(&self) -> Vec<BackendSpec> {
        self.backends.iter().map(BackendConfig::spec).collect()
    }
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Routing and backend lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Load balancing algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Seed for the random algorithm; entropy-seeded when absent
    #[serde(default)]
    pub random_seed: Option<u64>,

    /// Count reported request outcomes as health signals
    #[serde(default = "default_true")]
    pub passive_checks: bool,

    /// Routed requests never reported within this window are force-released
    #[serde(default = "default_abandonment_timeout", with = "humantime_serde")]
    pub abandonment_timeout: Duration,

    /// Longest a deregistered backend may keep in-flight requests
    #[serde(default = "default_drain_grace_period", with = "humantime_serde")]
    pub drain_grace_period: Duration,

    /// How often abandoned requests and finished drains are swept
    #[serde(default = "default_maintenance_interval", with = "humantime_serde")]
    pub maintenance_interval: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            random_seed: None,
            passive_checks: true,
            abandonment_timeout: default_abandonment_timeout(),
            drain_grace_period: default_drain_grace_period(),
            maintenance_interval: default_maintenance_interval(),
        }
    }
}

/// Load balancing algorithm.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    WeightedLeastConnections,
    IpHash,
    Random,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Type of health check: tcp or http
    #[serde(default, rename = "type")]
    pub check_type: HealthCheckType,

    /// HTTP path to check (for HTTP health checks)
    #[serde(default)]
    pub path: Option<String>,

    /// Expected HTTP status code (for HTTP health checks)
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    /// How often to probe each backend
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Timeout for a single probe
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive failures before marking unhealthy
    #[serde(default = "default_threshold")]
    pub fail_threshold: u32,

    /// Consecutive successes before marking healthy again
    #[serde(default = "default_threshold")]
    pub success_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_type: HealthCheckType::Tcp,
            path: None,
            expected_status: default_expected_status(),
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            fail_threshold: default_threshold(),
            success_threshold: default_threshold(),
        }
    }
}

/// Type of health check.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    #[default]
    Tcp,
    Http,
}

/// Individual backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend address as `host:port`
    pub address: String,

    /// Weight for weighted load balancing (default: 1)
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl BackendConfig {
    /// Registration input for this backend.
    pub fn spec(&self) -> BackendSpec {
        BackendSpec::new(self.address.as_str()).with_weight(self.weight)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_abandonment_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_drain_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_maintenance_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_threshold() -> u32 {
    3
}

fn default_weight() -> u32 {
    1
}

fn default_expected_status() -> u16 {
    200
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
