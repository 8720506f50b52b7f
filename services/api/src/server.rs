use crate::cli::ServeArgs;
use crate::infra::{build_runtime, AppState};
use crate::routes::with_application_routes;
use admissions::config::AppConfig;
use admissions::error::AppError;
use admissions::telemetry;
use admissions::workflows::enrollment::{
    InMemoryEnrollmentStore, LockSweeper, SystemClock, TenantId,
};
use admissions::workflows::intake::ApplicationIntakeImporter;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
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

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = InMemoryEnrollmentStore::default();
    if let Some(path) = args.seed_csv.take() {
        let tenant = TenantId(args.tenant.clone());
        let batch = ApplicationIntakeImporter::from_path(&path, &tenant, Utc::now())?;
        let loaded = ApplicationIntakeImporter::load_into(&batch, &store)?;
        info!(path = %path.display(), %tenant, loaded, "seeded pending applications");
    }

    let runtime = build_runtime(store, Arc::new(SystemClock), &config.processing);
    let sweeper = LockSweeper::spawn(runtime.locks.clone(), config.processing.sweep_interval());

    let app = with_application_routes(runtime.processor.clone())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        lock_ttl_secs = config.processing.lock_ttl_secs,
        "application processing service ready"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    sweeper.stop().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
