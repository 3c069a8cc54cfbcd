use kube::runtime::controller::{self, Action};
use kube::runtime::reflector::{Lookup, ObjectRef};
use kube::runtime::watcher;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::AppError;

pub type ReconcileResult<K> =
    Result<(ObjectRef<K>, Action), controller::Error<AppError, watcher::Error>>;

/// Resolves once `shutdown` flips or its sender is gone.
pub async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Logs one item of an applier stream. Reconcile failures are already
/// reported by the error policy.
pub fn report<K: Lookup>(controller: &str, result: ReconcileResult<K>) {
    match result {
        Ok((obj, action)) => debug!("{} reconciled {}: {:?}", controller, obj, action),
        Err(controller::Error::ReconcilerFailed(_, obj)) => {
            debug!("{} reconcile of {} failed", controller, obj)
        }
        Err(controller::Error::ObjectNotFound(obj)) => {
            debug!("{} skipped {}, no longer cached", controller, obj)
        }
        Err(e) => warn!("⚠️ {} controller error: {}", controller, e),
    }
}
