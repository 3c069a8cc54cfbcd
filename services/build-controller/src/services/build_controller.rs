use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use build_core::crds::Build;
use build_core::determiners::{determine_build_phase, determine_next_phase};
use build_core::formatters::{
    build_pod_name, format_build_cancelled_message, format_build_completed_message,
    format_build_failed_message, format_build_started_message, format_pod_deleted_message,
    format_push_spec,
};
use build_core::manifests::{build_pod, is_pod_owned_by};
use build_core::models::{
    BUILD_CANCELLED_EVENT_REASON, BUILD_COMPLETED_EVENT_REASON, BUILD_CONFIG_LABEL,
    BUILD_FAILED_EVENT_REASON, BUILD_LABEL, BUILD_STARTED_EVENT_REASON, BuildPhase,
    ImageReferenceKind, RunPolicy, StatusReason, TRANSITION_EVENT_ACTION,
};
use chrono::Utc;
use futures::{StreamExt, stream};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::runtime::controller::{Action, Config, applier, trigger_with};
use kube::runtime::events::EventType;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::{WatchStreamExt, watcher};
use resource_store::{ListParams, StoreError};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use utility::retry::retry_with_backoff_when;

use crate::config::ControllerConfig;
use crate::error::AppError;
use crate::services::Context;
use crate::utilities::informer::watch_events;
use crate::utilities::runtime::{report, shutdown_requested};

/// Drives builds through `New → Pending → Running → terminal` by creating
/// their pods and mirroring pod state back into build status.
pub struct BuildController {
    ctx: Context,
}

/// The build a pod was created for, from its build annotation.
pub fn build_ref_for_pod(pod: &Pod) -> Option<ObjectRef<Build>> {
    let build_name = pod.annotations().get(BUILD_LABEL)?;
    Some(ObjectRef::new(build_name).within(&pod.namespace().unwrap_or_default()))
}

/// What to reconcile when `build` changes: the build itself and, once it has
/// finished under a serial policy, the `New` builds of its config that may
/// have been waiting for it.
pub fn builds_to_reconcile(build: &Build, cached: &[Arc<Build>]) -> Vec<ObjectRef<Build>> {
    let mut refs = vec![ObjectRef::from_obj(build)];
    if build.is_terminal()
        && build.run_policy() != RunPolicy::Parallel
        && let Some(config_name) = build.config_name()
    {
        refs.extend(
            cached
                .iter()
                .filter(|b| {
                    b.namespace() == build.namespace()
                        && b.config_name() == Some(config_name)
                        && b.phase() == BuildPhase::New
                })
                .map(|b| ObjectRef::from_obj(b.as_ref())),
        );
    }
    refs
}

/// Event recorded when a build enters `phase`: (type, reason, message).
fn transition_event(
    namespace: &str,
    name: &str,
    phase: BuildPhase,
    reason: Option<StatusReason>,
) -> Option<(EventType, &'static str, String)> {
    match phase {
        BuildPhase::New | BuildPhase::Pending => None,
        BuildPhase::Running => Some((
            EventType::Normal,
            BUILD_STARTED_EVENT_REASON,
            format_build_started_message(namespace, name),
        )),
        BuildPhase::Complete => Some((
            EventType::Normal,
            BUILD_COMPLETED_EVENT_REASON,
            format_build_completed_message(namespace, name),
        )),
        BuildPhase::Error if reason == Some(StatusReason::BuildPodDeleted) => Some((
            EventType::Warning,
            BUILD_FAILED_EVENT_REASON,
            format_pod_deleted_message(namespace, name),
        )),
        BuildPhase::Failed | BuildPhase::Error => Some((
            EventType::Warning,
            BUILD_FAILED_EVENT_REASON,
            format_build_failed_message(namespace, name),
        )),
        BuildPhase::Cancelled => Some((
            EventType::Normal,
            BUILD_CANCELLED_EVENT_REASON,
            format_build_cancelled_message(namespace, name),
        )),
    }
}

impl BuildController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Reconciles builds, and removes the pods of deleted builds, until
    /// `shutdown` flips. `ready` is set once the build cache is populated.
    pub async fn run(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
        ready: Arc<AtomicBool>,
    ) -> Result<(), AppError> {
        let params = self.ctx.list_params();
        let concurrency = ControllerConfig::concurrency(self.ctx.config.build_workers);

        let (builds, builds_writer) = reflector::store::<Build>();
        let (pods, pods_writer) = reflector::store::<Pod>();

        let cached = builds.clone();
        let build_changes = trigger_with::<Build, Build, _, _>(
            watch_events("build", self.ctx.builds.clone(), params.clone())
                .default_backoff()
                .reflect(builds_writer)
                .applied_objects(),
            move |build| builds_to_reconcile(&build, &cached.state()),
        );
        let pod_changes = trigger_with::<Pod, Build, _, _>(
            watch_events("pod", self.ctx.pods.clone(), params.clone())
                .default_backoff()
                .touched_objects(),
            |pod| build_ref_for_pod(&pod),
        );

        let build_results = applier(
            |build, this: Arc<Self>| Box::pin(async move { this.reconcile(&build).await }),
            |build, error, this: Arc<Self>| this.error_policy(&build.name_any(), error),
            self.clone(),
            builds.clone(),
            stream::select(build_changes, pod_changes).take_until(shutdown_requested(shutdown.clone())),
            Config::default().concurrency(concurrency),
        )
        .for_each(|result| async move { report("build", result) });

        let owned_pods = trigger_with::<Pod, Pod, _, _>(
            watch_events("build pod", self.ctx.pods.clone(), params.clone())
                .default_backoff()
                .reflect(pods_writer)
                .applied_objects(),
            |pod| build_ref_for_pod(&pod).map(|_| ObjectRef::from_obj(&pod)),
        );
        let deleted_builds = trigger_with::<watcher::Event<Build>, Pod, _, _>(
            watch_events("deleted build", self.ctx.builds.clone(), params).default_backoff(),
            |event| match event {
                watcher::Event::Delete(build) => Some(
                    ObjectRef::new(&build_pod_name(&build.name_any()))
                        .within(&build.namespace().unwrap_or_default()),
                ),
                _ => None,
            },
        );

        let pod_results = applier(
            |pod, this: Arc<Self>| Box::pin(async move { this.reconcile_pod(&pod).await }),
            |pod, error, this: Arc<Self>| this.error_policy(&pod.name_any(), error),
            self.clone(),
            pods,
            stream::select(owned_pods, deleted_builds).take_until(shutdown_requested(shutdown)),
            Config::default().concurrency(concurrency),
        )
        .for_each(|result| async move { report("build pod", result) });

        let mark_ready = async move {
            if builds.wait_until_ready().await.is_ok() {
                ready.store(true, Ordering::SeqCst);
                info!("✅ Build controller synced with {} workers", concurrency);
            }
        };

        tokio::join!(build_results, pod_results, mark_ready);

        info!("👋 Build controller stopped");
        Ok(())
    }

    fn error_policy(&self, name: &str, error: &AppError) -> Action {
        warn!(name = %name, error = %error, "⚠️ Reconcile failed, requeueing");
        Action::requeue(self.ctx.config.error_requeue())
    }

    /// One pass over `build`. Active builds are revisited after the resync
    /// interval to catch missed pod events.
    #[tracing::instrument("reconcile_build", skip_all, fields(name = %build.name_any()), err)]
    pub async fn reconcile(&self, build: &Build) -> Result<Action, AppError> {
        let namespace = build.namespace().unwrap_or_default();
        let build = match self.ctx.builds.get(&namespace, &build.name_any()).await {
            Ok(build) => build,
            Err(e) if e.is_not_found() => return Ok(Action::await_change()),
            Err(e) => return Err(e.into()),
        };

        if build.is_terminal() {
            return Ok(Action::await_change());
        }

        if build.is_cancel_requested() {
            self.cancel_build(&build).await?;
            return Ok(Action::await_change());
        }

        match build.phase() {
            BuildPhase::New => self.handle_new_build(&build).await?,
            BuildPhase::Pending | BuildPhase::Running => self.handle_active_build(&build).await?,
            _ => {}
        }

        Ok(Action::requeue(self.ctx.config.resync_interval()))
    }

    /// Deletes `pod` once the build it was created for is gone.
    #[tracing::instrument("reconcile_build_pod", skip_all, fields(name = %pod.name_any()), err)]
    pub async fn reconcile_pod(&self, pod: &Pod) -> Result<Action, AppError> {
        let Some(build_ref) = build_ref_for_pod(pod) else {
            return Ok(Action::await_change());
        };
        let namespace = build_ref.namespace.clone().unwrap_or_default();

        match self.ctx.builds.get(&namespace, &build_ref.name).await {
            Ok(_) => return Ok(Action::requeue(self.ctx.config.resync_interval())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let pod_name = pod.name_any();
        match self.ctx.pods.delete(&namespace, &pod_name).await {
            Ok(()) => info!(
                namespace = %namespace,
                name = %build_ref.name,
                "🗑️ Deleted pod {} of deleted build",
                pod_name
            ),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Action::await_change())
    }

    async fn handle_new_build(&self, build: &Build) -> Result<(), AppError> {
        let namespace = build.namespace().unwrap_or_default();
        let name = build.name_any();

        if !self.may_start(build).await? {
            debug!(namespace = %namespace, name = %name, "⏳ Build waits for earlier builds");
            return Ok(());
        }

        let output_image = match self.resolve_output(build).await {
            Ok(image) => image,
            Err(AppError::InvalidOutputReference(message)) => {
                warn!(namespace = %namespace, name = %name, "⚠️ {}", message);
                self.update_status(&namespace, &name, |b| {
                    if b.phase() != BuildPhase::New {
                        return false;
                    }
                    let status = b.status_mut();
                    if status.reason == Some(StatusReason::InvalidOutputReference)
                        && status.message.as_deref() == Some(message.as_str())
                    {
                        return false;
                    }
                    status.reason = Some(StatusReason::InvalidOutputReference);
                    status.message = Some(message.clone());
                    true
                })
                .await?;
                return Err(AppError::InvalidOutputReference(message));
            }
            Err(e) => return Err(e),
        };

        let pod = build_pod(build, &self.ctx.config.builder_image, output_image.as_deref())?;
        let pod_name = pod.name_any();

        match self.ctx.pods.create(pod).await {
            Ok(_) => info!(
                namespace = %namespace,
                name = %name,
                "🚀 Created build pod {}",
                pod_name
            ),
            Err(e) if e.is_already_exists() => {
                let existing = self.ctx.pods.get(&namespace, &pod_name).await?;
                if !is_pod_owned_by(&existing, build) {
                    warn!(
                        namespace = %namespace,
                        name = %name,
                        "⚠️ Pod {} exists but belongs to another build",
                        pod_name
                    );
                    return self
                        .transition(build, BuildPhase::Error, Some(StatusReason::BuildPodExists), None)
                        .await;
                }
                debug!(namespace = %namespace, name = %name, "Build pod {} already exists", pod_name);
            }
            Err(e) => return Err(e.into()),
        }

        let updated = self
            .update_status(&namespace, &name, |b| {
                if !b.phase().can_transition_to(BuildPhase::Pending) {
                    return false;
                }
                let status = b.status_mut();
                status.phase = BuildPhase::Pending;
                status.reason = None;
                status.message = None;
                status.pod_name = Some(pod_name.clone());
                status.output_docker_image_reference = output_image.clone();
                true
            })
            .await?;

        if updated.is_some() {
            info!(
                namespace = %namespace,
                name = %name,
                "🔄 Build moved to Pending with pod {}",
                pod_name
            );
        }

        Ok(())
    }

    async fn handle_active_build(&self, build: &Build) -> Result<(), AppError> {
        let namespace = build.namespace().unwrap_or_default();
        let name = build.name_any();
        let pod_name = build
            .status
            .as_ref()
            .and_then(|s| s.pod_name.clone())
            .unwrap_or_else(|| build_pod_name(&name));

        match self.ctx.pods.get(&namespace, &pod_name).await {
            Ok(pod) => {
                let decision = determine_build_phase(&pod);
                match determine_next_phase(build.phase(), decision.phase) {
                    Some(next) => {
                        self.transition(build, next, decision.reason, decision.exit_code)
                            .await
                    }
                    None => Ok(()),
                }
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    namespace = %namespace,
                    name = %name,
                    "⚠️ Pod {} of active build is gone",
                    pod_name
                );
                self.transition(build, BuildPhase::Error, Some(StatusReason::BuildPodDeleted), None)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_build(&self, build: &Build) -> Result<(), AppError> {
        let namespace = build.namespace().unwrap_or_default();
        let pod_name = build
            .status
            .as_ref()
            .and_then(|s| s.pod_name.clone())
            .unwrap_or_else(|| build_pod_name(&build.name_any()));

        match self.ctx.pods.get(&namespace, &pod_name).await {
            Ok(pod) if is_pod_owned_by(&pod, build) => {
                match self.ctx.pods.delete(&namespace, &pod_name).await {
                    Ok(()) => info!(namespace = %namespace, "🗑️ Deleted pod {} of cancelled build", pod_name),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.transition(build, BuildPhase::Cancelled, Some(StatusReason::CancelledBuild), None)
            .await
    }

    /// Applies the run policy. Cancels superseded builds under
    /// `SerialLatestOnly`.
    async fn may_start(&self, build: &Build) -> Result<bool, AppError> {
        let policy = build.run_policy();
        if policy == RunPolicy::Parallel {
            return Ok(true);
        }
        let Some(config_name) = build.config_name() else {
            return Ok(true);
        };

        let namespace = build.namespace().unwrap_or_default();
        let name = build.name_any();
        let number = build.build_number().unwrap_or(0);

        let siblings: Vec<Build> = self
            .ctx
            .builds
            .list(&ListParams::namespaced(&namespace).label(BUILD_CONFIG_LABEL, config_name))
            .await?
            .into_iter()
            .filter(|b| b.name_any() != name)
            .collect();
        let number_of = |b: &Build| b.build_number().unwrap_or(0);

        if policy == RunPolicy::SerialLatestOnly {
            if siblings.iter().any(|b| number_of(b) > number) {
                info!(namespace = %namespace, name = %name, "✂️ Build superseded by a newer build");
                self.transition(build, BuildPhase::Cancelled, Some(StatusReason::CancelledBuild), None)
                    .await?;
                return Ok(false);
            }

            for older in siblings
                .iter()
                .filter(|b| b.phase() == BuildPhase::New && number_of(b) < number)
            {
                info!(
                    namespace = %namespace,
                    name = %older.name_any(),
                    "✂️ Cancelling build superseded by {}",
                    name
                );
                self.transition(older, BuildPhase::Cancelled, Some(StatusReason::CancelledBuild), None)
                    .await?;
            }
        }

        let blocked = siblings.iter().any(|b| {
            number_of(b) < number
                && !b.is_terminal()
                && !(policy == RunPolicy::SerialLatestOnly && b.phase() == BuildPhase::New)
        });

        Ok(!blocked)
    }

    /// Push spec for the build output. An `ImageStreamTag` is resolved
    /// through its stream's repository.
    async fn resolve_output(&self, build: &Build) -> Result<Option<String>, AppError> {
        let Some(to) = &build.spec.common.output.to else {
            return Ok(None);
        };

        match to.kind {
            ImageReferenceKind::DockerImage => Ok(Some(to.name.clone())),
            ImageReferenceKind::ImageStreamTag => {
                let (stream, tag) = to.stream_and_tag().ok_or_else(|| {
                    AppError::InvalidOutputReference(format!(
                        "output {} is not of the form stream:tag",
                        to.name
                    ))
                })?;
                let namespace = to
                    .namespace
                    .clone()
                    .or_else(|| build.namespace())
                    .unwrap_or_default();

                let image_stream = match self.ctx.streams.get(&namespace, stream).await {
                    Ok(s) => s,
                    Err(e) if e.is_not_found() => {
                        return Err(AppError::InvalidOutputReference(format!(
                            "output image stream {}/{} does not exist",
                            namespace, stream
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };

                let repository = image_stream.docker_image_repository().ok_or_else(|| {
                    AppError::InvalidOutputReference(format!(
                        "output image stream {}/{} has no docker image repository",
                        namespace, stream
                    ))
                })?;

                Ok(Some(format_push_spec(repository, tag)))
            }
        }
    }

    /// Moves the build to `next` and records the matching event. Does nothing
    /// when the stored build can no longer make that move.
    async fn transition(
        &self,
        build: &Build,
        next: BuildPhase,
        reason: Option<StatusReason>,
        exit_code: Option<i32>,
    ) -> Result<(), AppError> {
        let namespace = build.namespace().unwrap_or_default();
        let name = build.name_any();
        let now = Utc::now();

        let updated = self
            .update_status(&namespace, &name, |b| {
                if !b.phase().can_transition_to(next) {
                    return false;
                }
                let status = b.status_mut();
                status.phase = next;
                status.reason = reason;
                status.message = reason.map(|r| r.message().to_string());
                if exit_code.is_some() {
                    status.exit_code = exit_code;
                }
                if next == BuildPhase::Running && status.start_timestamp.is_none() {
                    status.start_timestamp = Some(now);
                }
                if next.is_terminal() {
                    status.completion_timestamp = Some(now);
                    status.duration = status.start_timestamp.map(|s| (now - s).num_seconds());
                }
                true
            })
            .await?;

        let Some(updated) = updated else {
            return Ok(());
        };

        info!(
            namespace = %namespace,
            name = %name,
            phase = %next,
            "🔄 Build moved to {}",
            next
        );

        if let Some((event_type, event_reason, message)) =
            transition_event(&namespace, &name, next, reason)
        {
            self.ctx
                .publish_event(&updated, event_type, event_reason, TRANSITION_EVENT_ACTION, message)
                .await;
        }

        Ok(())
    }

    /// Re-reads the build and applies `mutate` to its status until the write
    /// wins. `mutate` returns false when nothing needs to change.
    async fn update_status<F>(
        &self,
        namespace: &str,
        name: &str,
        mutate: F,
    ) -> Result<Option<Build>, AppError>
    where
        F: Fn(&mut Build) -> bool + Send + Sync,
    {
        let builds = &self.ctx.builds;
        let mutate = &mutate;

        let updated = retry_with_backoff_when(
            &self.ctx.retry(),
            "update_build_status",
            move || async move {
                let mut build = builds.get(namespace, name).await?;
                if !mutate(&mut build) {
                    return Ok::<_, StoreError>(None);
                }
                builds.update_status(build).await.map(Some)
            },
            |e: &StoreError| e.is_conflict(),
        )
        .await?;

        Ok(updated)
    }
}
