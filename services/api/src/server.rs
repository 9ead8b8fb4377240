use crate::cli::ServeArgs;
use crate::infra::{spawn_delivery, AppState};
use crate::routes::with_request_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use foil_portal::config::AppConfig;
use foil_portal::error::AppError;
use foil_portal::telemetry;
use foil_portal::workflows::requests::{
    ChannelDispatcher, InMemoryRequestStore, LifecycleEngine, StaffDirectory,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let (dispatcher, queue) = ChannelDispatcher::new(config.lifecycle.notification_queue);
    let delivery = spawn_delivery(queue);

    let staff = StaffDirectory::from_config(&config.access);
    if config.access.staff_tokens.is_empty() {
        warn!("no staff tokens configured; every caller is treated as a requester");
    }

    let repository = Arc::new(InMemoryRequestStore::default());
    let engine = Arc::new(LifecycleEngine::new(
        repository,
        Arc::new(dispatcher),
        config.lifecycle,
    ));

    let app = with_request_routes(engine, staff)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "foil request portal ready");

    axum::serve(listener, app).await?;
    delivery.abort();
    Ok(())
}
