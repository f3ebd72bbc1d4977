use crate::camera::{Camera, FrameSource};
use crate::config::Config;
use crate::hand_state::HandState;
use crate::prediction::{Inference, PredictionPoller, PredictionService};
use crate::server::{HttpServer, SharedState};
use crate::stream::VideoStream;
use crate::telemetry::Metrics;

use std::sync::Arc;
use tokio::{signal, sync::broadcast, task::JoinHandle};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let camera: Arc<dyn FrameSource> = match Camera::new(&config.camera).await {
        Ok(cam) => Arc::new(cam),
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(e.into());
        }
    };

    let inference: Arc<dyn Inference> =
        match PredictionService::new(&config.inference_service).await {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!("Failed to initialize prediction service: {:?}", e);
                return Err(e.into());
            }
        };

    let metrics = Arc::new(Metrics::new()?);
    let hand_state = Arc::new(HandState::new());

    let video_stream = VideoStream::new(
        camera.clone(),
        hand_state.clone(),
        config.drawing.clone(),
        metrics.clone(),
        config.camera.get_stream_delay_ms(),
    );

    let app_state = SharedState {
        inference: inference.clone(),
        hand_state: hand_state.clone(),
        video_stream,
        metrics: metrics.clone(),
    };

    let server = HttpServer::new(app_state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let poller_handle = PredictionPoller::new(
        camera,
        inference,
        hand_state,
        metrics,
        &config.prediction_polling,
    )
    .run(shutdown_tx.subscribe());

    let server_handle = server.run(shutdown_tx.subscribe())?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    wait_for_poller(poller_handle).await;
    server_handle.await??;

    Ok(())
}

async fn wait_for_poller(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::error!("Prediction poller task failed: {:?}", e);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
