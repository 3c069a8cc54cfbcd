#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use build_controller::config::{ControllerConfig, RetrySettings};
use build_controller::error::AppError;
use build_controller::services::{COMPONENT_NAME, Context};
use build_controller::services::build_controller::BuildController;
use build_controller::services::config_change_trigger::ConfigChangeTriggerController;
use build_controller::services::image_change_trigger::ImageChangeTriggerController;
use build_core::crds::{
    Build, BuildConfig, BuildConfigSpec, BuildOutput, BuildSpec, BuildStrategy, BuildTriggerPolicy,
    CommonSpec, DockerBuildStrategy, ImageStream,
};
use build_core::models::{BuildPhase, ImageReference, RunPolicy};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Event, Pod, PodStatus,
};
use kube::{Resource, ResourceExt};
use resource_store::{
    ListParams, MemoryStore, ObjectStore, StoreError, StoreEventPublisher, StoreObject, WatchStream,
};
use tokio::sync::watch;
use tokio::task::JoinSet;

pub const NAMESPACE: &str = "build-test";

/// In-memory stores plus whichever controllers a test starts.
pub struct Harness {
    pub builds: Arc<MemoryStore<Build>>,
    pub pods: Arc<MemoryStore<Pod>>,
    pub configs: Arc<MemoryStore<BuildConfig>>,
    pub streams: Arc<MemoryStore<ImageStream>>,
    pub events: Arc<MemoryStore<Event>>,
    pub ctx: Context,
    contended: Option<Arc<ContendedStore<Build>>>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<Result<(), AppError>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::assemble(None)
    }

    /// Loses the first `conflicts` build status writes to a concurrent writer.
    pub fn with_build_status_conflicts(conflicts: u32) -> Self {
        Self::assemble(Some(conflicts))
    }

    fn assemble(conflicts: Option<u32>) -> Self {
        let builds = Arc::new(MemoryStore::<Build>::new());
        let pods = Arc::new(MemoryStore::<Pod>::new());
        let configs = Arc::new(MemoryStore::<BuildConfig>::new());
        let streams = Arc::new(MemoryStore::<ImageStream>::new());
        let events = Arc::new(MemoryStore::<Event>::new());

        let config = ControllerConfig {
            resync_interval_secs: 1,
            error_requeue_ms: 20,
            retry: RetrySettings {
                max_attempts: 10,
                initial_delay_ms: 5,
                max_delay_ms: 50,
            },
            ..Default::default()
        };

        let contended = conflicts.map(|n| Arc::new(ContendedStore::new(builds.clone(), n)));
        let build_store: Arc<dyn ObjectStore<Build>> = match &contended {
            Some(store) => store.clone(),
            None => builds.clone(),
        };

        let ctx = Context::new(
            build_store,
            pods.clone(),
            configs.clone(),
            streams.clone(),
            Arc::new(StoreEventPublisher::new(events.clone(), COMPONENT_NAME)),
            config,
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            builds,
            pods,
            configs,
            streams,
            events,
            ctx,
            contended,
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    pub fn start_build_controller(&mut self) {
        let controller = Arc::new(BuildController::new(self.ctx.clone()));
        self.tasks.spawn(controller.run(
            self.shutdown.subscribe(),
            Arc::new(AtomicBool::new(false)),
        ));
    }

    pub fn start_triggers(&mut self) {
        let image = Arc::new(ImageChangeTriggerController::new(self.ctx.clone()));
        self.tasks.spawn(image.run(self.shutdown.subscribe()));
        let config = Arc::new(ConfigChangeTriggerController::new(self.ctx.clone()));
        self.tasks.spawn(config.run(self.shutdown.subscribe()));
    }

    pub async fn stop(mut self) {
        self.shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(result) = self.tasks.join_next().await {
                result.unwrap().unwrap();
            }
        })
        .await
        .unwrap();
    }

    pub async fn build(&self, name: &str) -> Option<Build> {
        self.builds.get(NAMESPACE, name).await.ok()
    }

    pub async fn build_pods(&self) -> Vec<Pod> {
        self.pods
            .list(&ListParams::namespaced(NAMESPACE))
            .await
            .unwrap()
    }

    /// Waits until build `name` reaches `phase`.
    pub async fn wait_for_phase(&self, name: &str, phase: BuildPhase) -> Build {
        eventually(&format!("build {} in phase {}", name, phase), move || async move {
            self.build(name).await.filter(|b| b.phase() == phase)
        })
        .await
    }

    /// Overwrites the status of a build pod as the kubelet would.
    pub async fn set_pod_status(&self, name: &str, status: PodStatus) {
        let mut pod = self.pods.get(NAMESPACE, name).await.unwrap();
        pod.status = Some(status);
        self.pods.update_status(pod).await.unwrap();
    }

    /// Events recorded against `obj` with `reason`.
    pub async fn events_with_reason<K>(&self, obj: &K, reason: &str) -> Vec<Event>
    where
        K: Resource<DynamicType = ()>,
    {
        let kind = K::kind(&()).to_string();
        self.events
            .list(&ListParams::namespaced(NAMESPACE))
            .await
            .unwrap()
            .into_iter()
            .filter(|e| {
                e.involved_object.kind.as_deref() == Some(kind.as_str())
                    && e.involved_object.name.as_deref() == Some(obj.meta().name.as_deref().unwrap_or_default())
                    && e.involved_object.uid == obj.meta().uid
                    && e.reason.as_deref() == Some(reason)
            })
            .collect()
    }

    /// Status writes the contended build store still has to lose.
    pub fn conflicts_left(&self) -> u32 {
        self.contended.as_ref().map_or(0, |store| store.remaining())
    }
}

/// Lets another writer touch the object right before each of the first
/// `remaining` status writes, so those writes carry a stale resource version.
pub struct ContendedStore<K: StoreObject> {
    inner: Arc<MemoryStore<K>>,
    remaining: AtomicU32,
}

impl<K: StoreObject> ContendedStore<K> {
    pub fn new(inner: Arc<MemoryStore<K>>, conflicts: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(conflicts),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K: StoreObject> ObjectStore<K> for ContendedStore<K> {
    async fn create(&self, obj: K) -> Result<K, StoreError> {
        self.inner.create(obj).await
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.inner.get(namespace, name).await
    }

    async fn list(&self, params: &ListParams) -> Result<Vec<K>, StoreError> {
        self.inner.list(params).await
    }

    async fn update(&self, obj: K) -> Result<K, StoreError> {
        self.inner.update(obj).await
    }

    async fn update_status(&self, obj: K) -> Result<K, StoreError> {
        let contended = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contended {
            let current = self
                .inner
                .get(&obj.namespace().unwrap_or_default(), &obj.name_any())
                .await?;
            self.inner.update(current).await?;
        }
        self.inner.update_status(obj).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.inner.delete(namespace, name).await
    }

    async fn watch(&self, params: &ListParams) -> Result<WatchStream<K>, StoreError> {
        self.inner.watch(params).await
    }
}

/// Polls `check` until it yields a value, panicking after five seconds.
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    match result {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {}", what),
    }
}

/// Lets the controllers process anything still in flight.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

pub fn pod_status(phase: &str, exit_code: Option<i32>) -> PodStatus {
    PodStatus {
        phase: Some(phase.to_string()),
        container_statuses: exit_code.map(|code| {
            vec![ContainerStatus {
                name: "docker-build".to_string(),
                state: Some(ContainerState {
                    terminated: Some(ContainerStateTerminated {
                        exit_code: code,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]
        }),
        ..Default::default()
    }
}

/// A standalone docker build pushing to a plain pull spec.
pub fn docker_build(name: &str) -> Build {
    let mut build = Build::new(
        name,
        BuildSpec {
            common: CommonSpec {
                output: BuildOutput {
                    to: Some(ImageReference::docker_image("registry:5000/build-test/app:latest")),
                },
                ..Default::default()
            },
            triggered_by: Vec::new(),
        },
    );
    build.metadata.namespace = Some(NAMESPACE.to_string());
    build
}

pub fn build_config(
    name: &str,
    run_policy: RunPolicy,
    strategy: BuildStrategy,
    triggers: Vec<BuildTriggerPolicy>,
) -> BuildConfig {
    let mut config = BuildConfig::new(
        name,
        BuildConfigSpec {
            common: CommonSpec {
                strategy,
                output: BuildOutput {
                    to: Some(ImageReference::docker_image(format!(
                        "registry:5000/build-test/{}:latest",
                        name
                    ))),
                },
                ..Default::default()
            },
            run_policy,
            triggers,
        },
    );
    config.metadata.namespace = Some(NAMESPACE.to_string());
    config
}

pub fn docker_strategy() -> BuildStrategy {
    BuildStrategy::Docker(DockerBuildStrategy::default())
}
