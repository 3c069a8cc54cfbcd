use std::{net::SocketAddr, path::PathBuf, time::Duration};

use config::{ConfigBuilder, ConfigError, Environment, File, builder::AsyncState};
use factory::factories::{kubernetes::KubernetesConfig, observability::ObservabilityConfig};
use serde::Deserialize;
use utility::retry::RetryConfig;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server_address: SocketAddr,
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ControllerConfig {
    /// Restrict every watch to one namespace; all namespaces when unset.
    pub namespace: Option<String>,
    pub build_workers: usize,
    pub trigger_workers: usize,
    pub resync_interval_secs: u64,
    pub builder_image: String,
    /// Delay before a failed reconcile is retried.
    pub error_requeue_ms: u64,
    pub retry: RetrySettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            build_workers: 4,
            trigger_workers: 2,
            resync_interval_secs: 300,
            builder_image: "openshift/origin-docker-builder:latest".to_string(),
            error_requeue_ms: 5000,
            retry: RetrySettings::default(),
        }
    }
}

impl ControllerConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_millis(self.error_requeue_ms)
    }

    /// Reconciles running at once in one controller.
    pub fn concurrency(workers: usize) -> u16 {
        u16::try_from(workers.max(1)).unwrap_or(u16::MAX)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 50,
            max_delay_ms: 5000,
        }
    }
}

impl Config {
    pub async fn init(path: PathBuf) -> Result<Self, ConfigError> {
        let cfg = ConfigBuilder::<AsyncState>::default()
            .add_source(File::from(path))
            .add_source(Environment::default().separator("__"))
            .build()
            .await?;

        cfg.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bundled_config_parses() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.json");
        let cfg = Config::init(path).await.unwrap();

        assert_eq!(cfg.server_address.port(), 8080);
        assert!(!cfg.kubernetes.in_cluster);
        assert_eq!(cfg.controller.namespace, None);
        assert_eq!(cfg.controller.error_requeue(), Duration::from_secs(5));
        assert_eq!(
            cfg.controller.retry_config().initial_delay,
            Duration::from_millis(50)
        );
    }
}
