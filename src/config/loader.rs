//! Configuration file loading.

use crate::config::{Config, validate_config};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Parse and validate configuration from a YAML string.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(contents)?;
    validate_config(&config).map_err(ConfigError::ValidationError)?;
    Ok(config)
}

/// Load configuration from a YAML file.
///
/// Reads the file, parses the YAML and validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, HealthCheckType};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
backends:
  - address: "127.0.0.1:9000"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].weight, 1);
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
global:
  log_level: debug
  log_format: pretty
  metrics:
    enabled: false
    address: "0.0.0.0:9100"
    path: /stats

balancer:
  algorithm: weighted_round_robin
  passive_checks: true
  abandonment_timeout: 45s
  drain_grace_period: 10s
  maintenance_interval: 500ms

health_check:
  type: http
  path: /healthz
  expected_status: 204
  interval: 5s
  timeout: 1s
  fail_threshold: 2
  success_threshold: 4

backends:
  - address: "10.0.0.1:8080"
    weight: 3
  - address: "10.0.0.2:8080"
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(!config.global.metrics.enabled);
        assert_eq!(config.global.metrics.path, "/stats");
        assert_eq!(config.balancer.algorithm, Algorithm::WeightedRoundRobin);
        assert_eq!(config.balancer.drain_grace_period, Duration::from_secs(10));
        assert_eq!(config.health_check.check_type, HealthCheckType::Http);
        assert_eq!(config.health_check.path.as_deref(), Some("/healthz"));
        assert_eq!(config.health_check.expected_status, 204);
        assert_eq!(config.health_check.success_threshold, 4);
        assert_eq!(config.backends[0].weight, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.yaml");
        assert!(matches!(result.unwrap_err(), ConfigError::ReadError(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not: valid: yaml: {{{}}}").unwrap();

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_invalid_config() {
        let result = parse_config("backends: []\n");
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }
}
