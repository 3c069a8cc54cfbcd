use std::sync::Arc;

use build_core::crds::BuildConfig;
use build_core::generator::config_change_cause;
use futures::StreamExt;
use kube::ResourceExt;
use kube::runtime::WatchStreamExt;
use kube::runtime::controller::{Action, Config, applier, trigger_self};
use kube::runtime::reflector;
use resource_store::StoreError;
use tokio::sync::watch;
use tracing::{info, warn};
use utility::retry::retry_with_backoff_when;

use crate::config::ControllerConfig;
use crate::error::AppError;
use crate::services::{Context, instantiate_build};
use crate::utilities::informer::watch_events;
use crate::utilities::runtime::{report, shutdown_requested};

/// Starts the first build of every BuildConfig carrying a config change
/// trigger.
pub struct ConfigChangeTriggerController {
    ctx: Context,
}

impl ConfigChangeTriggerController {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let (configs, writer) = reflector::store::<BuildConfig>();
        let config_changes = trigger_self(
            watch_events("buildconfig", self.ctx.configs.clone(), self.ctx.list_params())
                .default_backoff()
                .reflect(writer)
                .applied_objects(),
            (),
        );

        info!("✅ Config change trigger controller started");

        applier(
            |config, this: Arc<Self>| Box::pin(async move { this.reconcile(&config).await }),
            |config, error, this: Arc<Self>| {
                warn!(name = %config.name_any(), error = %error, "⚠️ Config change trigger failed, requeueing");
                Action::requeue(this.ctx.config.error_requeue())
            },
            self.clone(),
            configs,
            config_changes.take_until(shutdown_requested(shutdown)),
            Config::default().concurrency(ControllerConfig::concurrency(self.ctx.config.trigger_workers)),
        )
        .for_each(|result| async move { report("config trigger", result) })
        .await;

        info!("👋 Config change trigger controller stopped");
        Ok(())
    }

    #[tracing::instrument("reconcile_config_trigger", skip_all, fields(name = %config.name_any()), err)]
    pub async fn reconcile(&self, config: &BuildConfig) -> Result<Action, AppError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();
        let config = match self.ctx.configs.get(&namespace, &name).await {
            Ok(config) => config,
            Err(e) if e.is_not_found() => return Ok(Action::await_change()),
            Err(e) => return Err(e.into()),
        };

        // only the very first version is started by a config change
        if !config.has_config_change_trigger() || config.last_version() > 0 {
            return Ok(Action::await_change());
        }

        info!(
            namespace = %namespace,
            name = %name,
            "⚙️ New build config, starting its first build"
        );
        instantiate_build(&self.ctx, &config, 1, config_change_cause(), None).await?;

        let configs = &self.ctx.configs;
        let (namespace, name) = (namespace.as_str(), name.as_str());
        retry_with_backoff_when(
            &self.ctx.retry(),
            "update_build_config_status",
            move || async move {
                let mut config = configs.get(namespace, name).await?;
                if config.last_version() >= 1 {
                    return Ok::<_, StoreError>(());
                }
                config.status.get_or_insert_with(Default::default).last_version = 1;
                configs.update_status(config).await.map(|_| ())
            },
            |e: &StoreError| e.is_conflict(),
        )
        .await?;

        Ok(Action::await_change())
    }
}
