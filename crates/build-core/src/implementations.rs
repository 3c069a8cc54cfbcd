use kube::ResourceExt;

use crate::crds::{
    Build, BuildConfig, BuildStatus, BuildStrategy, BuildTriggerPolicy, ImageChangeTrigger,
    ImageStream, TagEvent,
};
use crate::models::{
    BUILD_CONFIG_LABEL, BUILD_NUMBER_ANNOTATION, BUILD_RUN_POLICY_LABEL, BuildPhase,
    ImageReference, ImageReferenceKind, RunPolicy, StatusReason,
};

impl BuildPhase {
    /// Complete, Failed, Error and Cancelled are sinks.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Failed | Self::Error | Self::Cancelled
        )
    }

    /// Phases only move forward; a terminal phase never moves again.
    pub fn can_transition_to(self, next: BuildPhase) -> bool {
        if self == next || self.is_terminal() {
            return false;
        }

        match next {
            Self::New => false,
            Self::Pending => self == Self::New,
            Self::Running => matches!(self, Self::New | Self::Pending),
            Self::Complete | Self::Failed | Self::Error | Self::Cancelled => true,
        }
    }
}

impl StatusReason {
    /// Human readable status message stored next to the reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::BuildPodDeleted => "The pod for this build was deleted before the build completed.",
            Self::BuildPodExists => "The pod for this build already exists and belongs to another build.",
            Self::GenericBuildFailed => "Generic build failure, check logs for details.",
            Self::ExitCodeNonZero => "The build pod succeeded but its build container exited with a non-zero code.",
            Self::BuildPodExitCodeUnknown => "The build pod succeeded but the exit code of its build container is unknown.",
            Self::BuildPodUnknownPhase => "The build pod reported a phase the controller does not recognize.",
            Self::CancelledBuild => "The build was cancelled by the user.",
            Self::InvalidOutputReference => "The output image reference could not be resolved.",
        }
    }
}

impl ImageReference {
    pub fn docker_image(name: impl Into<String>) -> Self {
        Self {
            kind: ImageReferenceKind::DockerImage,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn image_stream_tag(name: impl Into<String>) -> Self {
        Self {
            kind: ImageReferenceKind::ImageStreamTag,
            name: name.into(),
            namespace: None,
        }
    }

    /// Splits an `ImageStreamTag` name into `(stream, tag)`.
    pub fn stream_and_tag(&self) -> Option<(&str, &str)> {
        if self.kind != ImageReferenceKind::ImageStreamTag {
            return None;
        }

        match self.name.split_once(':') {
            Some((stream, tag)) if !stream.is_empty() && !tag.is_empty() && !tag.contains(':') => {
                Some((stream, tag))
            }
            _ => None,
        }
    }
}

impl BuildStrategy {
    pub fn from_ref(&self) -> Option<&ImageReference> {
        match self {
            Self::Source(s) => Some(&s.from),
            Self::Docker(s) => s.from.as_ref(),
            Self::Custom(s) => Some(&s.from),
        }
    }

    pub fn set_from(&mut self, from: ImageReference) {
        match self {
            Self::Source(s) => s.from = from,
            Self::Docker(s) => s.from = Some(from),
            Self::Custom(s) => s.from = from,
        }
    }

    /// Name of the container running this strategy inside the build pod.
    pub fn container_name(&self) -> &'static str {
        match self {
            Self::Source(_) => "sti-build",
            Self::Docker(_) => "docker-build",
            Self::Custom(_) => "custom-build",
        }
    }
}

impl Build {
    pub fn phase(&self) -> BuildPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.cancelled)
    }

    pub fn status_mut(&mut self) -> &mut BuildStatus {
        self.status.get_or_insert_with(BuildStatus::default)
    }

    pub fn config_name(&self) -> Option<&str> {
        self.labels().get(BUILD_CONFIG_LABEL).map(String::as_str)
    }

    pub fn run_policy(&self) -> RunPolicy {
        self.labels()
            .get(BUILD_RUN_POLICY_LABEL)
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    }

    pub fn build_number(&self) -> Option<i64> {
        self.annotations()
            .get(BUILD_NUMBER_ANNOTATION)
            .and_then(|n| n.parse().ok())
    }
}

impl BuildConfig {
    pub fn last_version(&self) -> i64 {
        self.status.as_ref().map(|s| s.last_version).unwrap_or(0)
    }

    pub fn has_config_change_trigger(&self) -> bool {
        self.spec
            .triggers
            .iter()
            .any(|t| matches!(t, BuildTriggerPolicy::ConfigChange))
    }

    /// Image change triggers with their index in `spec.triggers`.
    pub fn image_change_triggers(&self) -> impl Iterator<Item = (usize, &ImageChangeTrigger)> {
        self.spec
            .triggers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match t {
                BuildTriggerPolicy::ImageChange { image_change } => Some((i, image_change)),
                BuildTriggerPolicy::ConfigChange => None,
            })
    }

    pub fn image_change_trigger_mut(&mut self, index: usize) -> Option<&mut ImageChangeTrigger> {
        match self.spec.triggers.get_mut(index) {
            Some(BuildTriggerPolicy::ImageChange { image_change }) => Some(image_change),
            _ => None,
        }
    }

    /// The image a trigger watches: its own `from`, else the strategy's.
    pub fn trigger_source<'a>(&'a self, trigger: &'a ImageChangeTrigger) -> Option<&'a ImageReference> {
        trigger
            .from
            .as_ref()
            .or_else(|| self.spec.common.strategy.from_ref())
    }
}

impl ImageStream {
    pub fn latest_tag_event(&self, tag: &str) -> Option<&TagEvent> {
        self.status
            .as_ref()?
            .tags
            .iter()
            .find(|t| t.tag == tag)
            .and_then(|t| t.items.first())
    }

    pub fn docker_image_repository(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.docker_image_repository.as_deref())
            .or(self.spec.docker_image_repository.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_never_transition() {
        for terminal in [
            BuildPhase::Complete,
            BuildPhase::Failed,
            BuildPhase::Error,
            BuildPhase::Cancelled,
        ] {
            for next in [
                BuildPhase::New,
                BuildPhase::Pending,
                BuildPhase::Running,
                BuildPhase::Complete,
                BuildPhase::Error,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn phases_only_move_forward() {
        assert!(BuildPhase::New.can_transition_to(BuildPhase::Pending));
        assert!(BuildPhase::Pending.can_transition_to(BuildPhase::Running));
        assert!(BuildPhase::Running.can_transition_to(BuildPhase::Complete));
        assert!(BuildPhase::Pending.can_transition_to(BuildPhase::Error));
        assert!(!BuildPhase::Running.can_transition_to(BuildPhase::Pending));
        assert!(!BuildPhase::Pending.can_transition_to(BuildPhase::New));
        assert!(!BuildPhase::Running.can_transition_to(BuildPhase::Running));
    }

    #[test]
    fn stream_and_tag_parsing() {
        let r = ImageReference::image_stream_tag("repo:latest");
        assert_eq!(r.stream_and_tag(), Some(("repo", "latest")));

        assert_eq!(ImageReference::image_stream_tag("repo").stream_and_tag(), None);
        assert_eq!(ImageReference::image_stream_tag(":latest").stream_and_tag(), None);
        assert_eq!(ImageReference::docker_image("repo:latest").stream_and_tag(), None);
    }
}
