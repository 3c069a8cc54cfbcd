/// Kubernetes caps label values at 63 characters.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// generate the execution pod name like `{build}-build`
pub fn build_pod_name(build_name: &str) -> String {
    format!("{}-build", build_name)
}

/// generate the build name for a config instantiation like `{config}-{version}`
pub fn build_name_for_config(config_name: &str, version: i64) -> String {
    format!("{}-{}", config_name, version)
}

pub fn format_label_value(value: &str) -> String {
    let truncated: String = value.chars().take(MAX_LABEL_VALUE_LEN).collect();
    truncated
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Push spec for a tag inside a repository, e.g. `registry:5000/ns/repo:tag`.
pub fn format_push_spec(repository: &str, tag: &str) -> String {
    format!("{}:{}", repository, tag)
}

pub fn format_pod_deleted_message(namespace: &str, name: &str) -> String {
    format!(
        "Build {}/{} failed: the build pod was deleted before build completion",
        namespace, name
    )
}

pub fn format_build_failed_message(namespace: &str, name: &str) -> String {
    format!("Build {}/{} failed", namespace, name)
}

pub fn format_build_started_message(namespace: &str, name: &str) -> String {
    format!("Build {}/{} is now running", namespace, name)
}

pub fn format_build_completed_message(namespace: &str, name: &str) -> String {
    format!("Build {}/{} completed successfully", namespace, name)
}

pub fn format_build_cancelled_message(namespace: &str, name: &str) -> String {
    format!("Build {}/{} has been cancelled", namespace, name)
}
