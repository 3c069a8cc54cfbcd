use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crds::{Build, BuildStrategy};
use crate::formatters::{build_pod_name, format_label_value};
use crate::models::BUILD_LABEL;

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Builds the execution pod for `build`.
///
/// `output_image` is the resolved push spec; it only lives on the pod, the
/// build's own output reference stays symbolic.
pub fn build_pod(
    build: &Build,
    builder_image: &str,
    output_image: Option<&str>,
) -> Result<Pod, serde_json::Error> {
    let name = build.name_any();
    let common = &build.spec.common;

    let mut env_vars = vec![env("BUILD", serde_json::to_string(build)?)];
    if let Some(git) = &common.source.git {
        env_vars.push(env("SOURCE_REPOSITORY", git.uri.clone()));
        if let Some(git_ref) = &git.git_ref {
            env_vars.push(env("SOURCE_REF", git_ref.clone()));
        }
    }
    if let Some(context_dir) = &common.source.context_dir {
        env_vars.push(env("SOURCE_CONTEXT_DIR", context_dir.clone()));
    }
    if let Some(output_image) = output_image {
        env_vars.push(env("OUTPUT_IMAGE", output_image));
    }

    // custom builds run their own image, everything else runs the builder
    let image = match &common.strategy {
        BuildStrategy::Custom(custom) => custom.from.name.clone(),
        _ => builder_image.to_string(),
    };

    let labels = BTreeMap::from([(BUILD_LABEL.to_string(), format_label_value(&name))]);
    let annotations = BTreeMap::from([(BUILD_LABEL.to_string(), name.clone())]);

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(build_pod_name(&name)),
            namespace: build.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: build.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            service_account_name: Some("builder".to_string()),
            containers: vec![Container {
                name: common.strategy.container_name().to_string(),
                image: Some(image),
                env: Some(env_vars),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    })
}

/// Whether `pod` was created for `build` (matching build annotation and owner uid).
pub fn is_pod_owned_by(pod: &Pod, build: &Build) -> bool {
    let name = build.name_any();
    let annotated = pod.annotations().get(BUILD_LABEL) == Some(&name);

    let owner_matches = match (build.uid(), pod.owner_references().first()) {
        (Some(uid), Some(owner)) => owner.uid == uid,
        // without uids on either side fall back to the annotation alone
        _ => true,
    };

    annotated && owner_matches
}
