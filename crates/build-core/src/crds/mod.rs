use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::models::{BuildPhase, ImageReference, RunPolicy, StatusReason};

// -----------------------------------------------------------------------------
// Build Resource (one execution attempt of a build strategy)
// -----------------------------------------------------------------------------
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[kube(
    group = "build.openshift.io",
    version = "v1",
    kind = "Build",
    plural = "builds",
    namespaced,
    schema = "disabled",
    status = "BuildStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggered_by: Vec<BuildTriggerCause>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default)]
    pub phase: BuildPhase,
    /// Set by an external caller to request cancellation.
    #[serde(default)]
    pub cancelled: bool,
    pub reason: Option<StatusReason>,
    pub message: Option<String>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub completion_timestamp: Option<DateTime<Utc>>,
    /// Seconds between start (or creation) and completion.
    pub duration: Option<i64>,
    pub output_docker_image_reference: Option<String>,
    pub pod_name: Option<String>,
    pub exit_code: Option<i32>,
}

// -----------------------------------------------------------------------------
// BuildConfig Resource (template + trigger policies)
// -----------------------------------------------------------------------------
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[kube(
    group = "build.openshift.io",
    version = "v1",
    kind = "BuildConfig",
    plural = "buildconfigs",
    namespaced,
    schema = "disabled",
    status = "BuildConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigSpec {
    #[serde(flatten)]
    pub common: CommonSpec,
    #[serde(default)]
    pub run_policy: RunPolicy,
    #[serde(default)]
    pub triggers: Vec<BuildTriggerPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigStatus {
    #[serde(default)]
    pub last_version: i64,
}

// -----------------------------------------------------------------------------
// ImageStream Resource (named, mutable pointers to pushable images)
// -----------------------------------------------------------------------------
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[kube(
    group = "image.openshift.io",
    version = "v1",
    kind = "ImageStream",
    plural = "imagestreams",
    namespaced,
    schema = "disabled",
    status = "ImageStreamStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamSpec {
    pub docker_image_repository: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagReference>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamStatus {
    pub docker_image_repository: Option<String>,
    #[serde(default)]
    pub tags: Vec<NamedTagEventList>,
}

// -----------------------------------------------------------------------------
// Shared Sub-Types
// -----------------------------------------------------------------------------
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonSpec {
    pub source: BuildSource,
    pub strategy: BuildStrategy,
    #[serde(default)]
    pub output: BuildOutput,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSource {
    pub git: Option<GitBuildSource>,
    pub context_dir: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitBuildSource {
    pub uri: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum BuildStrategy {
    Source(SourceBuildStrategy),
    Docker(DockerBuildStrategy),
    Custom(CustomBuildStrategy),
}

impl Default for BuildStrategy {
    fn default() -> Self {
        Self::Docker(DockerBuildStrategy::default())
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceBuildStrategy {
    pub from: ImageReference,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerBuildStrategy {
    pub from: Option<ImageReference>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomBuildStrategy {
    pub from: ImageReference,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub to: Option<ImageReference>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum BuildTriggerPolicy {
    ConfigChange,
    ImageChange {
        #[serde(rename = "imageChange", default)]
        image_change: ImageChangeTrigger,
    },
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageChangeTrigger {
    /// Falls back to the strategy's `from` when unset.
    pub from: Option<ImageReference>,
    #[serde(rename = "lastTriggeredImageID")]
    pub last_triggered_image_id: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildTriggerCause {
    pub message: String,
    pub image_change_build: Option<ImageChangeCause>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageChangeCause {
    #[serde(rename = "imageID")]
    pub image_id: String,
    pub from_ref: ImageReference,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagReference {
    pub name: String,
    pub from: Option<ImageReference>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamedTagEventList {
    pub tag: String,
    /// Newest first.
    #[serde(default)]
    pub items: Vec<TagEvent>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    pub created: DateTime<Utc>,
    pub docker_image_reference: String,
    pub image: String,
}
