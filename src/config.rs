//! Operator Configuration
//!
//! Loaded from an optional YAML file and then overridden by command line
//! flags and environment variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Configuration for the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Namespace holding pools, devices and claims
    pub namespace: String,
    /// Identity written into operation leases
    pub lease_holder: String,
    /// Age after which a lease is treated as abandoned
    pub lease_ttl_secs: u64,
    /// Requeue interval after a clean pass
    pub resync_interval_secs: u64,
    /// First requeue delay after a failed pass
    pub backoff_initial_secs: u64,
    /// Upper bound of the requeue delay after failed passes
    pub backoff_max_secs: u64,
    /// REST API bind address
    pub api_addr: String,
    /// Health server bind address
    pub health_addr: String,
    /// Metrics server bind address
    pub metrics_addr: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "storage-system".to_string(),
            lease_holder: "pool-topology-operator".to_string(),
            lease_ttl_secs: 300,
            resync_interval_secs: 300,
            backoff_initial_secs: 5,
            backoff_max_secs: 300,
            api_addr: "0.0.0.0:8090".to_string(),
            health_addr: "0.0.0.0:8081".to_string(),
            metrics_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load a config file; keys missing from the file keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Configuration("namespace must not be empty".into()));
        }
        if self.lease_holder.is_empty() {
            return Err(Error::Configuration("lease holder must not be empty".into()));
        }
        if self.lease_ttl_secs == 0 || self.resync_interval_secs == 0 {
            return Err(Error::Configuration(
                "lease TTL and resync interval must be positive".into(),
            ));
        }
        if self.backoff_initial_secs == 0 {
            return Err(Error::Configuration("initial backoff must be positive".into()));
        }
        if self.backoff_initial_secs > self.backoff_max_secs {
            return Err(Error::Configuration(format!(
                "initial backoff {}s exceeds max backoff {}s",
                self.backoff_initial_secs, self.backoff_max_secs
            )));
        }
        for (name, addr) in [
            ("API", &self.api_addr),
            ("health", &self.health_addr),
            ("metrics", &self.metrics_addr),
        ] {
            addr.parse::<SocketAddr>().map_err(|e| {
                Error::Configuration(format!("Invalid {} address {}: {}", name, addr, e))
            })?;
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resync_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "namespace: pools\nbackoffInitialSecs: 10").unwrap();

        let config = OperatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "pools");
        assert_eq!(config.backoff_initial_secs, 10);
        assert_eq!(config.lease_ttl_secs, 300);
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            OperatorConfig::from_file("/nonexistent/operator.yaml"),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = OperatorConfig {
            backoff_initial_secs: 600,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let config = OperatorConfig {
            resync_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = OperatorConfig {
            metrics_addr: "not-an-addr".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
