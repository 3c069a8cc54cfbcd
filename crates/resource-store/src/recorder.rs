use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::runtime::events::{self, EventType, Recorder, Reporter};
use tracing::{debug, warn};

use crate::store::ObjectStore;

/// Publishes `core/v1` events against the objects a controller manages.
///
/// Publishing is fire-and-forget: a failed write is logged and never reaches
/// the reconcile that emitted it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Events through `kube::runtime::events::Recorder`, which folds repeats
/// into event series.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, reference).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish event"
            );
        }
    }
}

/// Writes every event as a new `core/v1 Event` through an `ObjectStore`.
pub struct StoreEventPublisher {
    store: Arc<dyn ObjectStore<Event>>,
    component: String,
}

impl StoreEventPublisher {
    pub fn new(store: Arc<dyn ObjectStore<Event>>, component: impl Into<String>) -> Self {
        Self {
            store,
            component: component.into(),
        }
    }
}

fn type_name(type_: EventType) -> &'static str {
    match type_ {
        EventType::Normal => "Normal",
        EventType::Warning => "Warning",
    }
}

#[async_trait]
impl EventPublisher for StoreEventPublisher {
    async fn publish(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let name = reference.name.clone().unwrap_or_default();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}.", name)),
                namespace: reference.namespace.clone(),
                ..Default::default()
            },
            involved_object: reference.clone(),
            reason: Some(reason.to_string()),
            message: note,
            type_: Some(type_name(type_).to_string()),
            action: Some(action.to_string()),
            count: Some(1),
            source: Some(EventSource {
                component: Some(self.component.clone()),
                ..Default::default()
            }),
            reporting_component: Some(self.component.clone()),
            ..Default::default()
        };

        match self.store.create(event).await {
            Ok(_) => debug!("Recorded {:?} event {} for {}", type_, reason, name),
            Err(e) => warn!("Failed to record event {} for {}: {}", reason, name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::ListParams;
    use k8s_openapi::api::core::v1::Pod;
    use kube::{Resource, ResourceExt};

    #[tokio::test]
    async fn store_publisher_writes_events_against_the_object() {
        let store = Arc::new(MemoryStore::<Event>::new());
        let publisher = StoreEventPublisher::new(store.clone(), "build-controller");

        let mut pod = Pod::default();
        pod.metadata.namespace = Some("ns".to_string());
        pod.metadata.name = Some("a-build".to_string());
        pod.metadata.uid = Some("uid-1".to_string());
        let reference = pod.object_ref(&());

        publisher
            .publish(&reference, EventType::Warning, "BuildFailed", "Transition", Some("it broke".to_string()))
            .await;
        publisher
            .publish(&reference, EventType::Normal, "BuildStarted", "Transition", None)
            .await;

        let events = store.list(&ListParams::namespaced("ns")).await.unwrap();
        assert_eq!(events.len(), 2);

        let failed = events
            .iter()
            .find(|e| e.reason.as_deref() == Some("BuildFailed"))
            .unwrap();
        assert_eq!(failed.message.as_deref(), Some("it broke"));
        assert_eq!(failed.type_.as_deref(), Some("Warning"));
        assert_eq!(failed.action.as_deref(), Some("Transition"));
        assert_eq!(failed.involved_object.uid.as_deref(), Some("uid-1"));
        assert_eq!(failed.reporting_component.as_deref(), Some("build-controller"));
        assert!(failed.name_any().starts_with("a-build."));
    }
}
