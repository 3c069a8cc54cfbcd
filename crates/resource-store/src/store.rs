use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Anything a store can hold: a serializable kube resource with static type
/// information.
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K: StoreObject> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => o,
        }
    }
}

/// Ordered change feed. Dropping the stream closes the watch.
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, StoreError>>;

/// Filters shared by `list` and `watch`.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub namespace: Option<String>,
    /// Field selector on `metadata.name`.
    pub name: Option<String>,
    /// Equality label selector.
    pub labels: BTreeMap<String, String>,
    /// Watch only: deliver events committed after this version.
    pub resource_version: Option<String>,
}

impl ListParams {
    pub fn namespaced(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    pub fn named(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn at(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }

    pub fn matches<K: Resource>(&self, obj: &K) -> bool {
        if let Some(ns) = &self.namespace
            && obj.meta().namespace.as_deref() != Some(ns.as_str())
        {
            return false;
        }
        if let Some(name) = &self.name
            && obj.meta().name.as_deref() != Some(name.as_str())
        {
            return false;
        }

        let labels = obj.labels();
        self.labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|l| l == v))
    }

    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn field_selector(&self) -> Option<String> {
        self.name.as_ref().map(|n| format!("metadata.name={}", n))
    }
}

/// CRUD + watch over one kind of object.
///
/// Writes are optimistic: when the object carries a resource version that no
/// longer matches the stored one the call fails with `StoreError::Conflict`.
///
/// The status is a subresource. `create` and `update` leave the stored status
/// alone and `update_status` changes nothing but the status.
#[async_trait]
pub trait ObjectStore<K: StoreObject>: Send + Sync {
    async fn create(&self, obj: K) -> Result<K, StoreError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    async fn list(&self, params: &ListParams) -> Result<Vec<K>, StoreError>;

    async fn update(&self, obj: K) -> Result<K, StoreError>;

    async fn update_status(&self, obj: K) -> Result<K, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn watch(&self, params: &ListParams) -> Result<WatchStream<K>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;

    fn pod(ns: &str, name: &str, labels: &[(&str, &str)]) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.namespace = Some(ns.to_string());
        pod.metadata.name = Some(name.to_string());
        pod.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        pod
    }

    #[test]
    fn params_match_namespace_name_and_labels() {
        let p = pod("ns", "a-build", &[("openshift.io/build.name", "a")]);

        assert!(ListParams::default().matches(&p));
        assert!(ListParams::namespaced("ns").matches(&p));
        assert!(!ListParams::namespaced("other").matches(&p));
        assert!(ListParams::named("ns", "a-build").matches(&p));
        assert!(!ListParams::named("ns", "b-build").matches(&p));
        assert!(
            ListParams::namespaced("ns")
                .label("openshift.io/build.name", "a")
                .matches(&p)
        );
        assert!(
            !ListParams::namespaced("ns")
                .label("openshift.io/build.name", "b")
                .matches(&p)
        );
    }

    #[test]
    fn selectors_render_like_the_api_server_expects() {
        let params = ListParams::named("ns", "x").label("a", "1").label("b", "2");
        assert_eq!(params.label_selector().as_deref(), Some("a=1,b=2"));
        assert_eq!(params.field_selector().as_deref(), Some("metadata.name=x"));
        assert_eq!(ListParams::default().label_selector(), None);
    }
}
