use crate::{
    config::ServerConfig, hand_state::HandState, prediction::Inference, routes::api_routes,
    stream::VideoStream, telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct SharedState {
    pub inference: Arc<dyn Inference>,
    pub hand_state: Arc<HandState>,
    pub video_stream: VideoStream,
    pub metrics: Arc<Metrics>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(app_state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();

        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = Router::new()
            .merge(api_routes())
            .with_state(app_state)
            .layer(metrics_layer)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}
