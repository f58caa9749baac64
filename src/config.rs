use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::driver::DriverConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransferConfig {
    /// Lease-holder identity of this worker instance
    pub worker_id: String,
    /// Our protocol endpoint, sent as the callback address in requests
    pub callback_address: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub iteration_wait_min_ms: u64,
    pub iteration_wait_max_ms: u64,
    pub lease_duration_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            worker_id: "transfer-worker-1".to_string(),
            callback_address: "http://localhost:8282/protocol".to_string(),
            batch_size: 20,
            max_retries: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            iteration_wait_min_ms: 50,
            iteration_wait_max_ms: 5_000,
            lease_duration_ms: 60_000,
        }
    }
}

impl TransferConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            batch_size: self.batch_size,
            wait_min: Duration::from_millis(self.iteration_wait_min_ms),
            wait_max: Duration::from_millis(self.iteration_wait_max_ms),
        }
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        Self::load_from(format!("config/{}.yaml", env))
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config yaml: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_with_defaulted_transfer_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_level: "info"
log_dir: "./logs"
log_file: "transfer.log"
use_json: false
rotation: "daily"
enable_tracing: true
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.transfer.batch_size, 20);
        assert_eq!(config.transfer.max_retries, 5);
    }

    #[test]
    fn test_load_transfer_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_level: "debug"
log_dir: "./logs"
log_file: "transfer.log"
use_json: true
rotation: "hourly"
enable_tracing: false
transfer:
  worker_id: "worker-7"
  callback_address: "https://connector.example.com/protocol"
  batch_size: 5
  max_retries: 3
  retry_base_delay_ms: 250
  retry_max_delay_ms: 4000
  iteration_wait_min_ms: 10
  iteration_wait_max_ms: 1000
  lease_duration_ms: 30000
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.transfer.worker_id, "worker-7");

        let retry = config.transfer.retry_policy();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(250));

        let driver = config.transfer.driver_config();
        assert_eq!(driver.batch_size, 5);
        assert_eq!(driver.wait_max, Duration::from_secs(1));

        assert_eq!(config.transfer.lease_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load_from("/no/such/config.yaml").is_err());
    }
}
