use std::sync::Arc;

use build_core::crds::{BuildConfig, BuildTriggerCause, ImageChangeTrigger, ImageStream};
use build_core::formatters::build_name_for_config;
use build_core::generator::{image_change_cause, is_equivalent_build};
use build_core::models::{
    EVALUATE_TRIGGER_EVENT_ACTION, INVALID_TRIGGER_EVENT_REASON, ImageReference,
    ImageReferenceKind,
};
use futures::{StreamExt, stream};
use kube::ResourceExt;
use kube::runtime::controller::{Action, Config, applier, trigger_self, trigger_with};
use kube::runtime::events::EventType;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::WatchStreamExt;
use resource_store::StoreError;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use utility::retry::retry_with_backoff_when;

use crate::config::ControllerConfig;
use crate::error::AppError;
use crate::services::{Context, instantiate_build};
use crate::utilities::informer::watch_events;
use crate::utilities::runtime::{report, shutdown_requested};

/// A trigger resolved to the stream tag it watches.
#[derive(Debug, Clone, PartialEq)]
struct WatchedTag {
    index: usize,
    stream: ObjectRef<ImageStream>,
    tag: String,
    from: ImageReference,
    last_triggered_image_id: Option<String>,
}

/// Checks that an image change trigger points at a `stream:tag`.
fn watched_tag(
    config: &BuildConfig,
    index: usize,
    trigger: &ImageChangeTrigger,
) -> Result<WatchedTag, String> {
    let from = config.trigger_source(trigger).ok_or_else(|| {
        "trigger has no from reference and the strategy has no base image".to_string()
    })?;

    if from.kind != ImageReferenceKind::ImageStreamTag {
        return Err(format!(
            "trigger must reference an ImageStreamTag, got {:?} {}",
            from.kind, from.name
        ));
    }

    let (stream, tag) = from
        .stream_and_tag()
        .ok_or_else(|| format!("{} is not of the form stream:tag", from.name))?;

    let namespace = from
        .namespace
        .clone()
        .or_else(|| config.namespace())
        .unwrap_or_default();

    Ok(WatchedTag {
        index,
        stream: ObjectRef::new(stream).within(&namespace),
        tag: tag.to_string(),
        from: from.clone(),
        last_triggered_image_id: trigger.last_triggered_image_id.clone(),
    })
}

/// Configs with a well-formed trigger on `stream`.
fn configs_watching(stream: &ImageStream, configs: &[Arc<BuildConfig>]) -> Vec<ObjectRef<BuildConfig>> {
    let stream_ref = ObjectRef::from_obj(stream);
    configs
        .iter()
        .filter(|config| {
            config.image_change_triggers().any(|(index, trigger)| {
                watched_tag(config, index, trigger).is_ok_and(|w| w.stream == stream_ref)
            })
        })
        .map(|config| ObjectRef::from_obj(config.as_ref()))
        .collect()
}

/// The image to pin as the build's base image. Only a trigger on the
/// strategy's own base image replaces it; any other trigger just starts a
/// build.
fn pinned_base_image<'a>(config: &BuildConfig, watched: &WatchedTag, reference: &'a str) -> Option<&'a str> {
    (config.spec.common.strategy.from_ref() == Some(&watched.from)).then_some(reference)
}

/// Starts builds when an ImageStream tag a BuildConfig watches points at a
/// new image.
pub struct ImageChangeTriggerController {
    ctx: Context,
}

impl ImageChangeTriggerController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Reconciles every config when it changes and when a stream it watches
    /// changes, until `shutdown` flips.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let params = self.ctx.list_params();
        let (configs, configs_writer) = reflector::store::<BuildConfig>();

        let config_changes = trigger_self(
            watch_events("buildconfig", self.ctx.configs.clone(), params.clone())
                .default_backoff()
                .reflect(configs_writer)
                .applied_objects(),
            (),
        );
        let cached = configs.clone();
        let stream_changes = trigger_with::<ImageStream, BuildConfig, _, _>(
            watch_events("imagestream", self.ctx.streams.clone(), params)
                .default_backoff()
                .applied_objects(),
            move |stream| configs_watching(&stream, &cached.state()),
        );

        info!("✅ Image change trigger controller started");

        applier(
            |config, this: Arc<Self>| Box::pin(async move { this.reconcile(&config).await }),
            |config, error, this: Arc<Self>| {
                warn!(name = %config.name_any(), error = %error, "⚠️ Image change trigger failed, requeueing");
                Action::requeue(this.ctx.config.error_requeue())
            },
            self.clone(),
            configs,
            stream::select(config_changes, stream_changes).take_until(shutdown_requested(shutdown)),
            Config::default().concurrency(ControllerConfig::concurrency(self.ctx.config.trigger_workers)),
        )
        .for_each(|result| async move { report("image trigger", result) })
        .await;

        info!("👋 Image change trigger controller stopped");
        Ok(())
    }

    /// Evaluates every image change trigger of `config` against the current
    /// state of its stream.
    #[tracing::instrument("reconcile_image_trigger", skip_all, fields(name = %config.name_any()), err)]
    pub async fn reconcile(&self, config: &BuildConfig) -> Result<Action, AppError> {
        let namespace = config.namespace().unwrap_or_default();
        let config = match self.ctx.configs.get(&namespace, &config.name_any()).await {
            Ok(config) => config,
            Err(e) if e.is_not_found() => return Ok(Action::await_change()),
            Err(e) => return Err(e.into()),
        };

        let mut watched = Vec::new();
        for (index, trigger) in config.image_change_triggers() {
            match watched_tag(&config, index, trigger) {
                Ok(w) => watched.push(w),
                Err(message) => {
                    let err = AppError::InvalidTrigger(message);
                    warn!(
                        namespace = %namespace,
                        name = %config.name_any(),
                        "⚠️ Skipping image change trigger {}: {}",
                        index,
                        err
                    );
                    self.ctx
                        .publish_event(
                            &config,
                            EventType::Warning,
                            INVALID_TRIGGER_EVENT_REASON,
                            EVALUATE_TRIGGER_EVENT_ACTION,
                            err.to_string(),
                        )
                        .await;
                }
            }
        }

        for w in watched {
            let stream_namespace = w.stream.namespace.clone().unwrap_or_default();
            let stream = match self.ctx.streams.get(&stream_namespace, &w.stream.name).await {
                Ok(stream) => stream,
                Err(e) if e.is_not_found() => {
                    debug!("Image stream {} does not exist yet", w.stream);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.evaluate(&config, &w, &stream).await?;
        }

        Ok(Action::requeue(self.ctx.config.resync_interval()))
    }

    async fn evaluate(
        &self,
        config: &BuildConfig,
        watched: &WatchedTag,
        stream: &ImageStream,
    ) -> Result<(), AppError> {
        let Some(event) = stream.latest_tag_event(&watched.tag) else {
            debug!("Tag {}:{} has no image yet", watched.stream.name, watched.tag);
            return Ok(());
        };
        let reference = event.docker_image_reference.as_str();

        if watched.last_triggered_image_id.as_deref() == Some(reference) {
            return Ok(());
        }

        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();
        let cause = image_change_cause(reference, &watched.from);

        let version = match self.started_build(config, &cause).await? {
            Some(version) => version,
            None => {
                let version = config.last_version() + 1;
                info!(
                    namespace = %namespace,
                    name = %name,
                    "🖼️ {}:{} now points at {}, starting build {}",
                    watched.stream.name,
                    watched.tag,
                    reference,
                    version
                );
                instantiate_build(
                    &self.ctx,
                    config,
                    version,
                    cause,
                    pinned_base_image(config, watched, reference),
                )
                .await?;
                version
            }
        };

        self.record_last_version(&namespace, &name, version).await?;
        self.record_triggered_image(&namespace, &name, watched.index, reference)
            .await
    }

    /// Number of the newest build when it was already started for `cause`.
    /// That happens when a previous pass created the build but failed to
    /// record the trigger.
    async fn started_build(
        &self,
        config: &BuildConfig,
        cause: &BuildTriggerCause,
    ) -> Result<Option<i64>, AppError> {
        let last_version = config.last_version();
        if last_version == 0 {
            return Ok(None);
        }

        let namespace = config.namespace().unwrap_or_default();
        let name = build_name_for_config(&config.name_any(), last_version);
        match self.ctx.builds.get(&namespace, &name).await {
            Ok(build) if is_equivalent_build(&build, &config.name_any(), cause) => {
                Ok(Some(last_version))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Raises `status.lastVersion` to at least `version`.
    async fn record_last_version(
        &self,
        namespace: &str,
        name: &str,
        version: i64,
    ) -> Result<(), AppError> {
        let configs = &self.ctx.configs;

        retry_with_backoff_when(
            &self.ctx.retry(),
            "update_build_config_status",
            move || async move {
                let mut config = configs.get(namespace, name).await?;
                if config.last_version() >= version {
                    return Ok::<_, StoreError>(());
                }
                config.status.get_or_insert_with(Default::default).last_version = version;
                configs.update_status(config).await.map(|_| ())
            },
            |e: &StoreError| e.is_conflict(),
        )
        .await?;

        Ok(())
    }

    /// Stores the image that fired trigger `index` in the config spec.
    async fn record_triggered_image(
        &self,
        namespace: &str,
        name: &str,
        index: usize,
        reference: &str,
    ) -> Result<(), AppError> {
        let configs = &self.ctx.configs;

        retry_with_backoff_when(
            &self.ctx.retry(),
            "update_build_config",
            move || async move {
                let mut config = configs.get(namespace, name).await?;
                let Some(trigger) = config.image_change_trigger_mut(index) else {
                    return Ok::<_, StoreError>(());
                };
                if trigger.last_triggered_image_id.as_deref() == Some(reference) {
                    return Ok(());
                }
                trigger.last_triggered_image_id = Some(reference.to_string());
                configs.update(config).await.map(|_| ())
            },
            |e: &StoreError| e.is_conflict(),
        )
        .await?;

        Ok(())
    }
}
