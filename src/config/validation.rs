//! Configuration validation.

use crate::config::{Config, HealthCheckType};
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend, with unique `host:port` addresses
/// - Backend weights of at least 1
/// - Non-zero health thresholds and a probe timeout shorter than the interval
/// - HTTP health checks have paths
/// - A known log level
///
/// Every problem is collected, not just the first.
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problems.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut addresses = HashSet::new();
    for backend in &config.backends {
        if !is_host_port(&backend.address) {
            errors.push(format!(
                "backend address '{}' must be host:port",
                backend.address
            ));
        }

        if !addresses.insert(backend.address.as_str()) {
            errors.push(format!("duplicate backend address: {}", backend.address));
        }

        if backend.weight == 0 {
            errors.push(format!(
                "backend {} has weight 0 (must be >= 1)",
                backend.address
            ));
        }
    }

    let hc = &config.health_check;
    if hc.fail_threshold == 0 {
        errors.push("health_check.fail_threshold must be >= 1".to_string());
    }
    if hc.success_threshold == 0 {
        errors.push("health_check.success_threshold must be >= 1".to_string());
    }
    if hc.timeout.is_zero() || hc.timeout >= hc.interval {
        errors.push(format!(
            "health_check.timeout ({:?}) must be non-zero and shorter than the interval ({:?})",
            hc.timeout, hc.interval
        ));
    }
    if hc.check_type == HealthCheckType::Http && hc.path.is_none() {
        errors.push("HTTP health check but no path specified".to_string());
    }

    let balancer = &config.balancer;
    if balancer.maintenance_interval.is_zero() {
        errors.push("balancer.maintenance_interval must be non-zero".to_string());
    }
    if balancer.abandonment_timeout.is_zero() {
        errors.push("balancer.abandonment_timeout must be non-zero".to_string());
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// `host:port` with a non-empty host and a non-zero port.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0),
        None => false,
    }
}
