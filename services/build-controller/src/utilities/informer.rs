use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use kube::core::Status;
use kube::runtime::watcher;
use resource_store::{ListParams, ObjectStore, StoreError, StoreObject, WatchEvent};
use tracing::{debug, info, warn};

fn watch_error(err: StoreError) -> watcher::Error {
    let (reason, code) = match &err {
        StoreError::Expired(_) => ("Expired", 410),
        StoreError::NotFound { .. } => ("NotFound", 404),
        StoreError::Invalid(_) => ("Invalid", 422),
        _ => ("InternalError", 500),
    };
    watcher::Error::WatchError(Status::failure(&err.to_string(), reason).with_code(code).boxed())
}

/// Every change of `K` matching `params`, in the shape `kube::runtime`
/// expects from a `watcher`, so reflectors and appliers run on any store.
///
/// The watch is opened before the list so nothing committed in between is
/// lost. Each (re)start yields `Init`, the listed objects as `InitApply`, then
/// `InitDone` and the live changes. A failed list or watch yields the error
/// and starts over on the next poll; pace it with `default_backoff`.
pub fn watch_events<K: StoreObject>(
    name: &'static str,
    store: Arc<dyn ObjectStore<K>>,
    params: ListParams,
) -> BoxStream<'static, watcher::Result<watcher::Event<K>>> {
    stream! {
        loop {
            let mut changes = match store.watch(&params).await {
                Ok(changes) => changes,
                Err(e) => {
                    warn!("⚠️ {} watch could not be opened: {}", name, e);
                    yield Err(watch_error(e));
                    continue;
                }
            };

            let objects = match store.list(&params).await {
                Ok(objects) => objects,
                Err(e) => {
                    warn!("⚠️ {} initial list failed: {}", name, e);
                    yield Err(watch_error(e));
                    continue;
                }
            };

            info!("🔍 {} informer listed {} objects", name, objects.len());
            yield Ok(watcher::Event::Init);
            for obj in objects {
                yield Ok(watcher::Event::InitApply(obj));
            }
            yield Ok(watcher::Event::InitDone);

            while let Some(change) = changes.next().await {
                match change {
                    Ok(WatchEvent::Added(obj) | WatchEvent::Modified(obj)) => {
                        yield Ok(watcher::Event::Apply(obj));
                    }
                    Ok(WatchEvent::Deleted(obj)) => yield Ok(watcher::Event::Delete(obj)),
                    Err(e) => {
                        warn!("⚠️ {} watch failed, relisting: {}", name, e);
                        yield Err(watch_error(e));
                        break;
                    }
                }
            }
            debug!("{} watch ended, relisting", name);
        }
    }
    .boxed()
}
