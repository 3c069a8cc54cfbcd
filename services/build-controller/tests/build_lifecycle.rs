mod common;

use build_core::formatters::build_pod_name;
use build_core::models::{
    BUILD_COMPLETED_EVENT_REASON, BUILD_FAILED_EVENT_REASON, BUILD_STARTED_EVENT_REASON,
    BuildPhase, StatusReason,
};
use build_controller::services::build_controller::BuildController;
use common::{Harness, NAMESPACE, docker_build, eventually, pod_status, settle};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use resource_store::ObjectStore;

#[tokio::test]
async fn new_build_gets_exactly_one_pod() {
    let mut harness = Harness::new();
    harness.start_build_controller();

    harness.builds.create(docker_build("single-pod")).await.unwrap();
    let build = harness.wait_for_phase("single-pod", BuildPhase::Pending).await;

    settle().await;
    let pods = harness.build_pods().await;
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].name_any(), build_pod_name("single-pod"));

    let status = build.status.unwrap();
    assert_eq!(status.pod_name.as_deref(), Some("single-pod-build"));
    assert_eq!(
        status.output_docker_image_reference.as_deref(),
        Some("registry:5000/build-test/app:latest")
    );

    harness.stop().await;
}

#[tokio::test]
async fn build_follows_its_pod_to_completion() {
    let mut harness = Harness::new();
    harness.start_build_controller();

    harness.builds.create(docker_build("happy")).await.unwrap();
    harness.wait_for_phase("happy", BuildPhase::Pending).await;

    harness
        .set_pod_status("happy-build", pod_status("Running", None))
        .await;
    let running = harness.wait_for_phase("happy", BuildPhase::Running).await;
    assert!(running.status.as_ref().unwrap().start_timestamp.is_some());

    harness
        .set_pod_status("happy-build", pod_status("Succeeded", Some(0)))
        .await;
    let complete = harness.wait_for_phase("happy", BuildPhase::Complete).await;
    let status = complete.status.as_ref().unwrap();
    assert!(status.completion_timestamp.is_some());
    assert!(status.duration.is_some());
    assert_eq!(status.exit_code, Some(0));

    // a terminal build ignores what happens to its pod afterwards
    harness.pods.delete(NAMESPACE, "happy-build").await.unwrap();
    settle().await;
    let after = harness.build("happy").await.unwrap();
    assert_eq!(after.phase(), BuildPhase::Complete);
    assert_eq!(after.status.as_ref().unwrap().reason, None);

    assert_eq!(
        harness
            .events_with_reason(&after, BUILD_STARTED_EVENT_REASON)
            .await
            .len(),
        1
    );
    assert_eq!(
        harness
            .events_with_reason(&after, BUILD_COMPLETED_EVENT_REASON)
            .await
            .len(),
        1
    );

    harness.stop().await;
}

#[tokio::test]
async fn non_zero_exit_code_is_an_error() {
    let mut harness = Harness::new();
    harness.start_build_controller();

    harness.builds.create(docker_build("broken")).await.unwrap();
    harness.wait_for_phase("broken", BuildPhase::Pending).await;

    harness
        .set_pod_status("broken-build", pod_status("Succeeded", Some(2)))
        .await;
    let build = harness.wait_for_phase("broken", BuildPhase::Error).await;
    let status = build.status.unwrap();
    assert_eq!(status.reason, Some(StatusReason::ExitCodeNonZero));
    assert_eq!(status.exit_code, Some(2));

    harness.stop().await;
}

#[tokio::test]
async fn failed_pod_fails_the_build() {
    let mut harness = Harness::new();
    harness.start_build_controller();

    harness.builds.create(docker_build("failing")).await.unwrap();
    harness.wait_for_phase("failing", BuildPhase::Pending).await;

    harness
        .set_pod_status("failing-build", pod_status("Failed", Some(1)))
        .await;
    let build = harness.wait_for_phase("failing", BuildPhase::Failed).await;
    assert_eq!(
        build.status.unwrap().reason,
        Some(StatusReason::GenericBuildFailed)
    );

    harness.stop().await;
}

#[tokio::test]
async fn deleting_a_running_pod_errors_the_build_once() {
    let mut harness = Harness::new();
    harness.start_build_controller();

    harness.builds.create(docker_build("orphan")).await.unwrap();
    harness.wait_for_phase("orphan", BuildPhase::Pending).await;
    harness
        .set_pod_status("orphan-build", pod_status("Running", None))
        .await;
    harness.wait_for_phase("orphan", BuildPhase::Running).await;

    harness.pods.delete(NAMESPACE, "orphan-build").await.unwrap();
    let build = harness.wait_for_phase("orphan", BuildPhase::Error).await;
    assert_eq!(
        build.status.as_ref().unwrap().reason,
        Some(StatusReason::BuildPodDeleted)
    );

    // the resync pass must not record the failure a second time
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let failed = harness
        .events_with_reason(&build, BUILD_FAILED_EVENT_REASON)
        .await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].type_.as_deref(), Some("Warning"));
    assert_eq!(
        failed[0].message.as_deref(),
        Some("Build build-test/orphan failed: the build pod was deleted before build completion")
    );

    harness.stop().await;
}

#[tokio::test]
async fn deleting_a_build_removes_its_pod() {
    let mut harness = Harness::new();
    harness.start_build_controller();

    harness.builds.create(docker_build("doomed")).await.unwrap();
    harness.wait_for_phase("doomed", BuildPhase::Pending).await;
    assert_eq!(harness.build_pods().await.len(), 1);

    harness.builds.delete(NAMESPACE, "doomed").await.unwrap();
    let h = &harness;
    eventually("pod of deleted build to go away", move || async move {
        h.build_pods().await.is_empty().then_some(())
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn cancelling_a_build_deletes_its_pod() {
    let mut harness = Harness::new();
    harness.start_build_controller();

    harness.builds.create(docker_build("cancel-me")).await.unwrap();
    harness.wait_for_phase("cancel-me", BuildPhase::Pending).await;

    let mut build = harness.build("cancel-me").await.unwrap();
    build.status_mut().cancelled = true;
    harness.builds.update_status(build).await.unwrap();

    let cancelled = harness.wait_for_phase("cancel-me", BuildPhase::Cancelled).await;
    assert_eq!(
        cancelled.status.unwrap().reason,
        Some(StatusReason::CancelledBuild)
    );
    assert!(harness.build_pods().await.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn foreign_pod_with_the_same_name_errors_the_build() {
    let mut harness = Harness::new();

    let mut squatter = k8s_openapi::api::core::v1::Pod::default();
    squatter.metadata.namespace = Some(NAMESPACE.to_string());
    squatter.metadata.name = Some("taken-build".to_string());
    harness.pods.create(squatter).await.unwrap();

    harness.start_build_controller();
    harness.builds.create(docker_build("taken")).await.unwrap();

    let build = harness.wait_for_phase("taken", BuildPhase::Error).await;
    assert_eq!(
        build.status.unwrap().reason,
        Some(StatusReason::BuildPodExists)
    );

    harness.stop().await;
}

#[tokio::test]
async fn status_conflicts_do_not_repeat_side_effects() {
    let mut harness = Harness::with_build_status_conflicts(6);
    harness.start_build_controller();

    harness.builds.create(docker_build("contended")).await.unwrap();
    harness.wait_for_phase("contended", BuildPhase::Pending).await;

    harness
        .set_pod_status("contended-build", pod_status("Running", None))
        .await;
    harness.wait_for_phase("contended", BuildPhase::Running).await;

    harness
        .set_pod_status("contended-build", pod_status("Succeeded", Some(0)))
        .await;
    let complete = harness.wait_for_phase("contended", BuildPhase::Complete).await;

    settle().await;
    assert_eq!(harness.conflicts_left(), 0);
    assert_eq!(harness.build_pods().await.len(), 1);
    assert_eq!(
        harness
            .events_with_reason(&complete, BUILD_STARTED_EVENT_REASON)
            .await
            .len(),
        1
    );
    assert_eq!(
        harness
            .events_with_reason(&complete, BUILD_COMPLETED_EVENT_REASON)
            .await
            .len(),
        1
    );

    harness.stop().await;
}

#[tokio::test]
async fn reconcile_runs_without_the_controller_loop() {
    let harness = Harness::new();
    let controller = BuildController::new(harness.ctx.clone());
    let build = harness.builds.create(docker_build("direct")).await.unwrap();

    let action = controller.reconcile(&build).await.unwrap();
    assert_eq!(action, Action::requeue(harness.ctx.config.resync_interval()));
    controller.reconcile(&build).await.unwrap();

    assert_eq!(harness.build_pods().await.len(), 1);
    assert_eq!(
        harness.build("direct").await.unwrap().phase(),
        BuildPhase::Pending
    );

    let pod = harness.build_pods().await.remove(0);
    assert_eq!(
        controller.reconcile_pod(&pod).await.unwrap(),
        Action::requeue(harness.ctx.config.resync_interval())
    );

    harness.builds.delete(NAMESPACE, "direct").await.unwrap();
    assert_eq!(controller.reconcile(&build).await.unwrap(), Action::await_change());
    assert_eq!(controller.reconcile_pod(&pod).await.unwrap(), Action::await_change());
    assert!(harness.build_pods().await.is_empty());
}
