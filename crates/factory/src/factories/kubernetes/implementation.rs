use kube::{
    Client, Config,
    config::{KubeConfigOptions, Kubeconfig},
};
use tracing::info;

use crate::factories::kubernetes::{Kubernetes, KubernetesConfig, error::KubernetesError};

impl Kubernetes {
    /// In-cluster config wins, then an explicit kubeconfig path, then
    /// whatever `KUBECONFIG` or the default location provides.
    pub async fn new(config: &KubernetesConfig) -> Result<Self, KubernetesError> {
        let kube_config = if config.in_cluster {
            info!("✅ Connecting from incluster environment");
            Config::incluster()?
        } else if let Some(path) = &config.config_path {
            info!("✅ Connecting with kubeconfig at {}", path);
            let kubeconfig_error = |source| KubernetesError::Kubeconfig {
                path: path.clone(),
                source,
            };
            let kubeconfig = Kubeconfig::read_from(path).map_err(kubeconfig_error)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(kubeconfig_error)?
        } else {
            info!("✅ Connecting from local environment");
            Config::infer().await?
        };

        let client = Client::try_from(kube_config)?;

        Ok(Self { client })
    }
}
