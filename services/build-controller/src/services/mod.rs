pub mod build_controller;
pub mod config_change_trigger;
pub mod image_change_trigger;
pub mod image_stream_mapping;

use std::sync::Arc;

use build_core::crds::{Build, BuildConfig, BuildTriggerCause, ImageStream};
use build_core::generator::{generate_build, is_equivalent_build};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use resource_store::{EventPublisher, ListParams, ObjectStore};
use tracing::info;
use utility::retry::RetryConfig;

use crate::config::ControllerConfig;
use crate::error::AppError;

pub const COMPONENT_NAME: &str = "build-controller";

/// Stores and settings shared by every controller.
#[derive(Clone)]
pub struct Context {
    pub builds: Arc<dyn ObjectStore<Build>>,
    pub pods: Arc<dyn ObjectStore<Pod>>,
    pub configs: Arc<dyn ObjectStore<BuildConfig>>,
    pub streams: Arc<dyn ObjectStore<ImageStream>>,
    pub recorder: Arc<dyn EventPublisher>,
    pub config: ControllerConfig,
}

impl Context {
    pub fn new(
        builds: Arc<dyn ObjectStore<Build>>,
        pods: Arc<dyn ObjectStore<Pod>>,
        configs: Arc<dyn ObjectStore<BuildConfig>>,
        streams: Arc<dyn ObjectStore<ImageStream>>,
        recorder: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            builds,
            pods,
            configs,
            streams,
            recorder,
            config,
        }
    }

    pub fn retry(&self) -> RetryConfig {
        self.config.retry_config()
    }

    pub async fn publish_event<K: Resource<DynamicType = ()>>(
        &self,
        obj: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.recorder
            .publish(&obj.object_ref(&()), type_, reason, action, Some(note))
            .await;
    }

    /// Scope of every watch and list.
    pub fn list_params(&self) -> ListParams {
        match &self.config.namespace {
            Some(ns) => ListParams::namespaced(ns),
            None => ListParams::default(),
        }
    }
}

/// Creates build number `version` of `config`.
///
/// The name is deterministic, so a lost race shows up as `AlreadyExists`. An
/// existing build for the same cause counts as success; anything else is a
/// `BuildConflict`.
pub(crate) async fn instantiate_build(
    ctx: &Context,
    config: &BuildConfig,
    version: i64,
    cause: BuildTriggerCause,
    resolved_from: Option<&str>,
) -> Result<Build, AppError> {
    let config_name = config.name_any();
    let build = generate_build(config, version, cause.clone(), resolved_from);
    let namespace = build.namespace().unwrap_or_default();
    let name = build.name_any();

    match ctx.builds.create(build).await {
        Ok(created) => {
            info!(
                namespace = %namespace,
                name = %name,
                "🏗️ Created build {} for config {} ({})",
                name, config_name, cause.message
            );
            Ok(created)
        }
        Err(e) if e.is_already_exists() => {
            let existing = ctx.builds.get(&namespace, &name).await?;
            if is_equivalent_build(&existing, &config_name, &cause) {
                info!(
                    namespace = %namespace,
                    name = %name,
                    "♻️ Build {} already exists for the same cause",
                    name
                );
                Ok(existing)
            } else {
                Err(AppError::BuildConflict(format!(
                    "build {}/{} already exists for a different cause",
                    namespace, name
                )))
            }
        }
        Err(e) => Err(e.into()),
    }
}
