use gork_persistence::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub persistence: PersistenceConfig,
    pub server: ServerConfig,
    pub lifecycle: LifecycleConfig,
    pub gateways: GatewaysConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long gateways get to fail before startup counts as successful
    pub startup_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub max_attempts: u32,
    pub expiry_sweep_interval_ms: u64,
    /// Fail publishes that match no binding instead of dropping them
    pub reject_unroutable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaysConfig {
    pub metrics: MetricsGatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsGatewayConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            startup_grace_ms: 1000,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            max_attempts: 3,
            expiry_sweep_interval_ms: 1000,
            reject_unroutable: false,
        }
    }
}

impl Default for MetricsGatewayConfig {
    fn default() -> Self {
        MetricsGatewayConfig {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 9091,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Check every field, reporting all problems at once
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut problems = Vec::new();
        if self.persistence.data_dir.as_os_str().is_empty() {
            problems.push("persistence.data_dir must not be empty");
        }
        if self.server.startup_grace_ms == 0 {
            problems.push("server.startup_grace_ms must be greater than zero");
        }
        if self.lifecycle.max_attempts == 0 {
            problems.push("lifecycle.max_attempts must be greater than zero");
        }
        if self.lifecycle.expiry_sweep_interval_ms == 0 {
            problems.push("lifecycle.expiry_sweep_interval_ms must be greater than zero");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration: {}", problems.join("; "))
        }
    }

    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.persistence.data_dir.clone(),
        }
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.server.startup_grace_ms)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle.expiry_sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.persistence.data_dir, PathBuf::from("./data"));
        assert_eq!(config.startup_grace(), Duration::from_secs(1));
        assert_eq!(config.lifecycle.max_attempts, 3);
        assert!(!config.lifecycle.reject_unroutable);
        assert_eq!(config.gateways.metrics.port, 9091);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "lifecycle:\n  max_attempts: 5\nlogging:\n  format: text\n";
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.lifecycle.max_attempts, 5);
        assert_eq!(config.lifecycle.expiry_sweep_interval_ms, 1000);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = BrokerConfig::default();
        config.server.startup_grace_ms = 0;
        config.lifecycle.max_attempts = 0;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("startup_grace_ms"));
        assert!(message.contains("max_attempts"));
    }
}
