use kube::{Resource, ResourceExt};

use crate::crds::{Build, BuildConfig, BuildSpec, BuildStatus, BuildTriggerCause, ImageChangeCause};
use crate::formatters::{build_name_for_config, format_label_value};
use crate::models::{
    BUILD_CONFIG_LABEL, BUILD_NUMBER_ANNOTATION, BUILD_RUN_POLICY_LABEL,
    CONFIG_CHANGE_CAUSE_MESSAGE, IMAGE_CHANGE_CAUSE_MESSAGE, ImageReference,
};

pub fn image_change_cause(image_id: &str, from_ref: &ImageReference) -> BuildTriggerCause {
    BuildTriggerCause {
        message: IMAGE_CHANGE_CAUSE_MESSAGE.to_string(),
        image_change_build: Some(ImageChangeCause {
            image_id: image_id.to_string(),
            from_ref: from_ref.clone(),
        }),
    }
}

pub fn config_change_cause() -> BuildTriggerCause {
    BuildTriggerCause {
        message: CONFIG_CHANGE_CAUSE_MESSAGE.to_string(),
        image_change_build: None,
    }
}

/// Instantiates build number `version` of `config`.
///
/// When `resolved_from` is set the strategy's base image is pinned to that
/// concrete pull spec. The output reference is copied untouched.
pub fn generate_build(
    config: &BuildConfig,
    version: i64,
    cause: BuildTriggerCause,
    resolved_from: Option<&str>,
) -> Build {
    let config_name = config.name_any();

    let mut common = config.spec.common.clone();
    if let Some(resolved) = resolved_from {
        common.strategy.set_from(ImageReference::docker_image(resolved));
    }

    let mut build = Build::new(
        &build_name_for_config(&config_name, version),
        BuildSpec {
            common,
            triggered_by: vec![cause],
        },
    );

    build.metadata.namespace = config.namespace();

    let mut labels = config.labels().clone();
    labels.insert(BUILD_CONFIG_LABEL.to_string(), format_label_value(&config_name));
    labels.insert(
        BUILD_RUN_POLICY_LABEL.to_string(),
        config.spec.run_policy.to_string(),
    );
    build.metadata.labels = Some(labels);

    let annotations = build.annotations_mut();
    annotations.insert(BUILD_CONFIG_LABEL.to_string(), config_name);
    annotations.insert(BUILD_NUMBER_ANNOTATION.to_string(), version.to_string());

    build.metadata.owner_references = config.controller_owner_ref(&()).map(|r| vec![r]);
    build.status = Some(BuildStatus::default());

    build
}

/// Whether `existing` is the build another evaluator already created for the
/// same config and cause.
pub fn is_equivalent_build(existing: &Build, config_name: &str, cause: &BuildTriggerCause) -> bool {
    let same_config = existing
        .annotations()
        .get(BUILD_CONFIG_LABEL)
        .is_some_and(|c| c == config_name);

    let same_cause = existing.spec.triggered_by.iter().any(|c| {
        match (&c.image_change_build, &cause.image_change_build) {
            (Some(a), Some(b)) => a.image_id == b.image_id,
            (None, None) => c.message == cause.message,
            _ => false,
        }
    });

    same_config && same_cause
}
