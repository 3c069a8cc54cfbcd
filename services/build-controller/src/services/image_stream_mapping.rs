use build_core::crds::{ImageStream, NamedTagEventList, TagEvent};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use resource_store::{ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::info;
use utility::retry::{RetryConfig, retry_with_backoff_when};

use crate::error::AppError;

/// Points `stream:tag` at a freshly pushed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamMapping {
    pub namespace: String,
    pub stream: String,
    pub tag: String,
    /// Image id, usually the digest.
    pub image_name: String,
    pub docker_image_reference: String,
}

/// Puts a tag event for `mapping` at the head of its tag history.
///
/// Returns false when the tag already points at that image. The stream's
/// status repository is copied from `spec.docker_image_repository` the first time.
pub fn push_tag_event(stream: &mut ImageStream, mapping: &ImageStreamMapping, now: DateTime<Utc>) -> bool {
    let spec_repository = stream.spec.docker_image_repository.clone();
    let status = stream.status.get_or_insert_with(Default::default);
    if status.docker_image_repository.is_none() {
        status.docker_image_repository = spec_repository;
    }

    let index = match status.tags.iter().position(|t| t.tag == mapping.tag) {
        Some(index) => index,
        None => {
            status.tags.push(NamedTagEventList {
                tag: mapping.tag.clone(),
                items: Vec::new(),
            });
            status.tags.len() - 1
        }
    };
    let history = &mut status.tags[index].items;

    if history.first().is_some_and(|head| {
        head.docker_image_reference == mapping.docker_image_reference && head.image == mapping.image_name
    }) {
        return false;
    }

    history.insert(
        0,
        TagEvent {
            created: now,
            docker_image_reference: mapping.docker_image_reference.clone(),
            image: mapping.image_name.clone(),
        },
    );
    true
}

/// Records `mapping` on its stream, re-reading the stream on conflict.
#[tracing::instrument("apply_image_stream_mapping", skip_all, fields(stream = %mapping.stream, tag = %mapping.tag), err)]
pub async fn apply_image_stream_mapping(
    streams: &dyn ObjectStore<ImageStream>,
    retry: &RetryConfig,
    mapping: &ImageStreamMapping,
) -> Result<ImageStream, AppError> {
    let stream = retry_with_backoff_when(
        retry,
        "apply_image_stream_mapping",
        move || async move {
            let mut stream = streams.get(&mapping.namespace, &mapping.stream).await?;
            if !push_tag_event(&mut stream, mapping, Utc::now()) {
                return Ok::<_, StoreError>(stream);
            }
            streams.update_status(stream).await
        },
        |e: &StoreError| e.is_conflict(),
    )
    .await?;

    info!(
        namespace = %mapping.namespace,
        name = %stream.name_any(),
        "🏷️ {}:{} now points at {}",
        mapping.stream,
        mapping.tag,
        mapping.docker_image_reference
    );

    Ok(stream)
}
