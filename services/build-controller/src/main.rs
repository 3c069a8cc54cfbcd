use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use build_core::crds::{Build, BuildConfig, ImageStream};
use build_controller::{
    app::{AppState, app},
    config::Config,
    error::AppError,
    services::{
        COMPONENT_NAME, Context, build_controller::BuildController,
        config_change_trigger::ConfigChangeTriggerController,
        image_change_trigger::ImageChangeTriggerController,
    },
};
use factory::factories::{kubernetes::Kubernetes, observability::Observability};
use k8s_openapi::api::core::v1::Pod;
use resource_store::{KubeEventPublisher, KubeStore};
use tokio::{sync::watch, task::JoinSet};
use tracing::{error, info, warn};
use utility::shutdown_signal::shutdown_signal;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    match dotenvy::dotenv() {
        Ok(path) => println!("Loaded .env file from {}", path.display()),
        Err(dotenvy::Error::Io(ref err)) if err.kind() == std::io::ErrorKind::NotFound => {
            println!(".env file not found, continuing without it");
        }
        Err(e) => println!("Couldn't load .env file: {}", e),
    }

    let config_path = std::env::var("CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = Config::init(PathBuf::from(config_path)).await?;

    let _observability = Observability::init(
        env!("CARGO_CRATE_NAME").to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
        &config.observability,
    )
    .await?;

    info!("🚀 Starting {}", env!("CARGO_PKG_NAME"));

    let kubernetes = Kubernetes::new(&config.kubernetes).await?;
    let client = kubernetes.client;

    let ctx = Context::new(
        Arc::new(KubeStore::<Build>::new(client.clone())),
        Arc::new(KubeStore::<Pod>::new(client.clone())),
        Arc::new(KubeStore::<BuildConfig>::new(client.clone())),
        Arc::new(KubeStore::<ImageStream>::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client, COMPONENT_NAME)),
        config.controller.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::default();
    let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

    set.spawn(Arc::new(BuildController::new(ctx.clone())).run(shutdown_rx.clone(), state.ready.clone()));
    set.spawn(Arc::new(ImageChangeTriggerController::new(ctx.clone())).run(shutdown_rx.clone()));
    set.spawn(Arc::new(ConfigChangeTriggerController::new(ctx)).run(shutdown_rx.clone()));
    set.spawn(start_health_server(config.server_address, state, shutdown_rx));

    info!("✅ All controllers started");

    tokio::select! {
        _ = shutdown_signal() => info!("🛑 Shutdown signal received"),
        Some(result) = set.join_next() => match result {
            Ok(Ok(())) => warn!("A controller task exited early"),
            Ok(Err(e)) => error!("❌ A controller task failed: {}", e),
            Err(e) => error!("❌ A controller task panicked: {}", e),
        },
    }

    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while let Some(result) = set.join_next().await {
            if let Ok(Err(e)) = result {
                error!("❌ Task failed during shutdown: {}", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!("⚠️ Shutdown timed out, aborting remaining tasks");
        set.shutdown().await;
    }

    info!("👋 {} shut down", env!("CARGO_PKG_NAME"));
    Ok(())
}

async fn start_health_server(
    address: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let router = app(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), state);

    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("🏥 Health server running on {}", address);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await?;

    Ok(())
}
