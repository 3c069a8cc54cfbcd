use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------
// LABELS & ANNOTATIONS
// ---------------------------------------------

/// Set on build pods, points back at the owning build.
pub const BUILD_LABEL: &str = "openshift.io/build.name";
/// Set on builds instantiated from a config (label and annotation).
pub const BUILD_CONFIG_LABEL: &str = "openshift.io/build-config.name";
pub const BUILD_RUN_POLICY_LABEL: &str = "openshift.io/build.start-policy";
pub const BUILD_NUMBER_ANNOTATION: &str = "openshift.io/build.number";

// ---------------------------------------------
// EVENT REASONS
// ---------------------------------------------

pub const BUILD_STARTED_EVENT_REASON: &str = "BuildStarted";
pub const BUILD_COMPLETED_EVENT_REASON: &str = "BuildCompleted";
pub const BUILD_FAILED_EVENT_REASON: &str = "BuildFailed";
pub const BUILD_CANCELLED_EVENT_REASON: &str = "BuildCancelled";
pub const INVALID_TRIGGER_EVENT_REASON: &str = "InvalidImageChangeTrigger";

pub const TRANSITION_EVENT_ACTION: &str = "Transition";
pub const EVALUATE_TRIGGER_EVENT_ACTION: &str = "EvaluateTrigger";

// ---------------------------------------------
// TRIGGER CAUSE MESSAGES
// ---------------------------------------------

pub const IMAGE_CHANGE_CAUSE_MESSAGE: &str = "Image change";
pub const CONFIG_CHANGE_CAUSE_MESSAGE: &str = "Build configuration change";

// ---------------------------------------------
// ENUMS
// ---------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildPhase {
    #[default]
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed => write!(f, "Failed"),
            Self::Error => write!(f, "Error"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Machine readable explanation attached to a build status.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReason {
    BuildPodDeleted,
    BuildPodExists,
    GenericBuildFailed,
    ExitCodeNonZero,
    BuildPodExitCodeUnknown,
    BuildPodUnknownPhase,
    CancelledBuild,
    InvalidOutputReference,
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BuildPodDeleted => "BuildPodDeleted",
            Self::BuildPodExists => "BuildPodExists",
            Self::GenericBuildFailed => "GenericBuildFailed",
            Self::ExitCodeNonZero => "ExitCodeNonZero",
            Self::BuildPodExitCodeUnknown => "BuildPodExitCodeUnknown",
            Self::BuildPodUnknownPhase => "BuildPodUnknownPhase",
            Self::CancelledBuild => "CancelledBuild",
            Self::InvalidOutputReference => "InvalidOutputReference",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPolicy {
    #[default]
    Parallel,
    Serial,
    SerialLatestOnly,
}

impl fmt::Display for RunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parallel => write!(f, "Parallel"),
            Self::Serial => write!(f, "Serial"),
            Self::SerialLatestOnly => write!(f, "SerialLatestOnly"),
        }
    }
}

impl std::str::FromStr for RunPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Parallel" => Ok(Self::Parallel),
            "Serial" => Ok(Self::Serial),
            "SerialLatestOnly" => Ok(Self::SerialLatestOnly),
            other => Err(format!("unknown run policy {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageReferenceKind {
    #[default]
    DockerImage,
    ImageStreamTag,
}

/// Reference to an image, either a concrete pull spec or a symbolic `stream:tag`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub kind: ImageReferenceKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
