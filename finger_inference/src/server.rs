use crate::{
    config::Config,
    inference_service::InferenceService,
    model_service::ModelService,
    ort_service::OrtModelService,
    state::{ServiceState, State},
};
use finger_proto::finger_spelling_service_server::FingerSpellingServiceServer;
use tokio::signal;
use tonic::transport::{server::Router, Server};

pub struct GrpcServer {
    router: Router,
    addr: String,
}

impl GrpcServer {
    pub async fn new<M: ModelService, S: State>(
        model_service: M,
        service_state: S,
        addr: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let inference_service = InferenceService::new(model_service, service_state);

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<FingerSpellingServiceServer<InferenceService<M, S>>>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(finger_proto::FILE_DESCRIPTOR_SET)
            .build_v1alpha()?;

        let router = Server::builder()
            .add_service(health_service)
            .add_service(FingerSpellingServiceServer::new(inference_service))
            .add_service(reflection_service);

        Ok(Self {
            router,
            addr: addr.to_string(),
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.addr.parse()?;

        tracing::info!("Inference service listening on {}", self.addr);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        self.router.serve_with_shutdown(addr, shutdown).await?;
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let ort_model_service =
        OrtModelService::new(&config.palms, &config.landmarks, &config.classifier)
            .inspect_err(|e| tracing::error!("Failed to load models: {}", e))?;
    let service_state = ServiceState::new(&config.labels)
        .inspect_err(|e| tracing::error!("Failed to load labels: {}", e))?;

    let addr = config.server.get_address();
    let grpc_server = GrpcServer::new(ort_model_service, service_state, &addr).await?;

    grpc_server.run().await?;

    Ok(())
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
