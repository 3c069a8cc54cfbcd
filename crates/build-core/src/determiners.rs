use k8s_openapi::api::core::v1::Pod;

use crate::models::{BuildPhase, StatusReason};

/// What a build pod says its build should look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDecision {
    pub phase: BuildPhase,
    pub reason: Option<StatusReason>,
    pub exit_code: Option<i32>,
}

impl PhaseDecision {
    fn new(phase: BuildPhase) -> Self {
        Self {
            phase,
            reason: None,
            exit_code: None,
        }
    }

    fn with_reason(mut self, reason: StatusReason) -> Self {
        self.reason = Some(reason);
        self
    }

    fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }
}

/// Exit code of the primary (first declared) container, if it terminated.
pub fn primary_exit_code(pod: &Pod) -> Option<i32> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
    let primary_name = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .map(|c| c.name.as_str());

    let status = primary_name
        .and_then(|name| statuses.iter().find(|s| s.name == name))
        .or_else(|| statuses.first())?;

    status
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|t| t.exit_code)
}

/// Maps a pod's phase and exit code to the build phase it implies.
///
/// Combinations that do not prove success map to `Error`: Succeeded without a
/// zero exit code, an `Unknown` phase, or any unrecognized phase. A pod with
/// no phase yet has not been scheduled and counts as `Pending`.
pub fn determine_build_phase(pod: &Pod) -> PhaseDecision {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());

    match phase {
        None | Some("Pending") => PhaseDecision::new(BuildPhase::Pending),
        Some("Running") => PhaseDecision::new(BuildPhase::Running),
        Some("Succeeded") => match primary_exit_code(pod) {
            Some(0) => PhaseDecision::new(BuildPhase::Complete).with_exit_code(Some(0)),
            Some(code) => PhaseDecision::new(BuildPhase::Error)
                .with_reason(StatusReason::ExitCodeNonZero)
                .with_exit_code(Some(code)),
            None => PhaseDecision::new(BuildPhase::Error)
                .with_reason(StatusReason::BuildPodExitCodeUnknown),
        },
        Some("Failed") => PhaseDecision::new(BuildPhase::Failed)
            .with_reason(StatusReason::GenericBuildFailed)
            .with_exit_code(primary_exit_code(pod)),
        Some(_) => {
            PhaseDecision::new(BuildPhase::Error).with_reason(StatusReason::BuildPodUnknownPhase)
        }
    }
}

/// The phase to move to, or `None` when the observation is stale or the build
/// is already terminal.
pub fn determine_next_phase(current: BuildPhase, observed: BuildPhase) -> Option<BuildPhase> {
    current.can_transition_to(observed).then_some(observed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateTerminated, ContainerStatus, PodSpec, PodStatus,
    };

    fn pod(phase: Option<&str>, exit_code: Option<i32>) -> Pod {
        let container_statuses = exit_code.map(|code| {
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
        });

        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "docker-build".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                container_statuses,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn unscheduled_pod_is_pending() {
        assert_eq!(determine_build_phase(&pod(None, None)).phase, BuildPhase::Pending);
        assert_eq!(
            determine_build_phase(&pod(Some("Pending"), None)).phase,
            BuildPhase::Pending
        );
    }

    #[test]
    fn running_pod_is_running() {
        assert_eq!(
            determine_build_phase(&pod(Some("Running"), None)).phase,
            BuildPhase::Running
        );
    }

    #[test]
    fn succeeded_with_zero_exit_completes() {
        let decision = determine_build_phase(&pod(Some("Succeeded"), Some(0)));
        assert_eq!(decision.phase, BuildPhase::Complete);
        assert_eq!(decision.exit_code, Some(0));
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn succeeded_with_nonzero_exit_is_an_error() {
        let decision = determine_build_phase(&pod(Some("Succeeded"), Some(2)));
        assert_eq!(decision.phase, BuildPhase::Error);
        assert_eq!(decision.reason, Some(StatusReason::ExitCodeNonZero));
        assert_eq!(decision.exit_code, Some(2));
    }

    #[test]
    fn succeeded_without_exit_code_is_an_error() {
        let decision = determine_build_phase(&pod(Some("Succeeded"), None));
        assert_eq!(decision.phase, BuildPhase::Error);
        assert_eq!(decision.reason, Some(StatusReason::BuildPodExitCodeUnknown));
    }

    #[test]
    fn failed_pod_fails_the_build() {
        let decision = determine_build_phase(&pod(Some("Failed"), Some(1)));
        assert_eq!(decision.phase, BuildPhase::Failed);
        assert_eq!(decision.reason, Some(StatusReason::GenericBuildFailed));
        assert_eq!(decision.exit_code, Some(1));
    }

    #[test]
    fn unknown_phase_is_an_error() {
        let decision = determine_build_phase(&pod(Some("Unknown"), None));
        assert_eq!(decision.phase, BuildPhase::Error);
        assert_eq!(decision.reason, Some(StatusReason::BuildPodUnknownPhase));
    }

    #[test]
    fn stale_observations_are_ignored() {
        assert_eq!(
            determine_next_phase(BuildPhase::Running, BuildPhase::Pending),
            None
        );
        assert_eq!(
            determine_next_phase(BuildPhase::Complete, BuildPhase::Error),
            None
        );
        assert_eq!(
            determine_next_phase(BuildPhase::Pending, BuildPhase::Complete),
            Some(BuildPhase::Complete)
        );
    }
}
