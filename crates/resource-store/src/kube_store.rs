use std::marker::PhantomData;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, future};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, PostParams, WatchParams};
use kube::{Client, ResourceExt};
use tracing::warn;

use crate::error::{StoreError, object_key};
use crate::store::{ListParams, ObjectStore, StoreObject, WatchEvent, WatchStream};

/// `ObjectStore` backed by the Kubernetes api server.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: StoreObject + kube::Resource<Scope = NamespaceResourceScope>,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn error(err: kube::Error, namespace: &str, name: &str) -> StoreError {
        let kind = K::kind(&()).to_string();
        let key = object_key(namespace, name);

        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound { kind, key },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                StoreError::AlreadyExists { kind, key }
            }
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
                kind,
                key,
                message: ae.message,
            },
            kube::Error::Api(ae) if ae.code == 410 => StoreError::Expired(ae.message),
            kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => {
                StoreError::Invalid(ae.message)
            }
            e => StoreError::Backend(e.to_string()),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: StoreObject + kube::Resource<Scope = NamespaceResourceScope>,
{
    async fn create(&self, obj: K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();

        self.api(Some(&namespace))
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Self::error(e, &namespace, &name))
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api(Some(namespace))
            .get(name)
            .await
            .map_err(|e| Self::error(e, namespace, name))
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<K>, StoreError> {
        let mut lp = kube::api::ListParams::default();
        if let Some(labels) = params.label_selector() {
            lp = lp.labels(&labels);
        }
        if let Some(fields) = params.field_selector() {
            lp = lp.fields(&fields);
        }

        let namespace = params.namespace.as_deref();
        let list = self
            .api(namespace)
            .list(&lp)
            .await
            .map_err(|e| Self::error(e, namespace.unwrap_or_default(), ""))?;

        Ok(list.items)
    }

    async fn update(&self, obj: K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        self.api(Some(&namespace))
            .replace(&name, &PostParams::default(), &obj)
            .await
            .map_err(|e| Self::error(e, &namespace, &name))
    }

    async fn update_status(&self, obj: K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();

        self.api(Some(&namespace))
            .replace_status(&name, &PostParams::default(), &obj)
            .await
            .map_err(|e| Self::error(e, &namespace, &name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(Some(namespace))
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| Self::error(e, namespace, name))
    }

    async fn watch(&self, params: &ListParams) -> Result<WatchStream<K>, StoreError> {
        let mut wp = WatchParams::default();
        if let Some(labels) = params.label_selector() {
            wp = wp.labels(&labels);
        }
        if let Some(fields) = params.field_selector() {
            wp = wp.fields(&fields);
        }

        let namespace = params.namespace.clone().unwrap_or_default();
        let version = params.resource_version.clone().unwrap_or_else(|| "0".to_string());

        let stream = self
            .api(params.namespace.as_deref())
            .watch(&wp, &version)
            .await
            .map_err(|e| Self::error(e, &namespace, ""))?;

        let events = stream
            .map_err(move |e| Self::error(e, &namespace, ""))
            .filter_map(|item| {
                let out = match item {
                    Ok(kube::api::WatchEvent::Added(o)) => Some(Ok(WatchEvent::Added(o))),
                    Ok(kube::api::WatchEvent::Modified(o)) => Some(Ok(WatchEvent::Modified(o))),
                    Ok(kube::api::WatchEvent::Deleted(o)) => Some(Ok(WatchEvent::Deleted(o))),
                    Ok(kube::api::WatchEvent::Bookmark(_)) => None,
                    Ok(kube::api::WatchEvent::Error(e)) if e.code == 410 => {
                        Some(Err(StoreError::Expired(e.message)))
                    }
                    Ok(kube::api::WatchEvent::Error(e)) => {
                        warn!("Watch returned an error: {}", e.message);
                        Some(Err(StoreError::Backend(e.message)))
                    }
                    Err(e) => Some(Err(e)),
                };
                future::ready(out)
            });

        Ok(events.boxed())
    }
}
