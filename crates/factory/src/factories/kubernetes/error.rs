use thiserror::Error;

/// Failures while building the API client the stores talk through.
#[derive(Error, Debug)]
pub enum KubernetesError {
    #[error("Kubernetes client could not be created, {0}")]
    Client(#[from] kube::Error),
    #[error("In-cluster service account config unavailable, {0}")]
    InCluster(#[from] kube_client::config::InClusterError),
    #[error("Kubeconfig {path} unusable, {source}")]
    Kubeconfig {
        path: String,
        #[source]
        source: kube_client::config::KubeconfigError,
    },
    #[error("No kubeconfig or in-cluster config found, {0}")]
    Infer(#[from] kube_client::config::InferConfigError),
}
