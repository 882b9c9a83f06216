use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::Config,
    database::{DatabaseService, ErrorAnalyzer, LogAggregator, MySqlGateway},
    handlers, metrics,
    signals::{setup_signal_handlers, wait_for_shutdown},
};

/// State shared by every API handler
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseService>,
}

/// Build the process-wide database service (logger, analyzer, reconnector)
/// backed by MySQL. No connection is attempted here.
pub fn build_database_service(config: &Config) -> Result<Arc<DatabaseService>> {
    let logger = Arc::new(LogAggregator::new(config.logger.settings()?));
    let analyzer = Arc::new(ErrorAnalyzer::new(logger.clone()));
    let gateway = Arc::new(MySqlGateway::new(config.database.pool_limits()));

    Ok(Arc::new(DatabaseService::new(
        gateway,
        config.database.dsn()?,
        config.database.connection_info(),
        config.reconnect.settings(),
        logger,
        analyzer,
    )))
}

/// Start the inspector server
///
/// This function:
/// 1. Initializes metrics (when enabled)
/// 2. Opens the initial database connection; failures keep reconnecting in the background
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Serves requests until a shutdown signal arrives
/// 5. Closes the database connection
pub async fn start_server(config: Config) -> Result<()> {
    let metrics_handle = if config.metrics.enabled {
        info!("Initializing Prometheus metrics...");
        Some(Arc::new(metrics::init_metrics()?))
    } else {
        None
    };

    let db = build_database_service(&config)?;
    let target = db.connection_info();
    info!(
        "Connecting to database {}@{}:{}/{}",
        target.username, target.host, target.port, target.database
    );
    if let Err(e) = db.init_db().await {
        warn!("Initial database connection failed, retrying in background: {}", e);
    }

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(
        AppState { db: db.clone() },
        metrics_handle.map(|handle| (config.metrics.endpoint.clone(), handle)),
    );

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting DB Inspector on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown(shutdown_rx).await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;

    if let Err(e) = db.close_db().await {
        warn!("Failed to close database connection cleanly: {}", e);
    }
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware.
/// `metrics` carries the exposition path and handle when metrics are enabled.
pub fn create_router(state: AppState, metrics: Option<(String, Arc<PrometheusHandle>)>) -> Router {
    let api_routes = Router::new()
        .route("/healthz", get(handlers::status::health_check))
        .route("/api/status", get(handlers::status::get_status))
        .route("/api/logs", get(handlers::logs::get_logs))
        .route("/api/logs/summary", get(handlers::logs::get_log_summary))
        .route("/api/logs/level", post(handlers::logs::set_log_level))
        .route("/api/logs/clear", post(handlers::logs::clear_logs))
        .route("/api/logs/settings", post(handlers::logs::update_log_settings))
        .route("/api/errors", get(handlers::errors::get_errors))
        .route("/api/errors/top", get(handlers::errors::get_top_errors))
        .route("/api/errors/trends", get(handlers::errors::get_error_trends))
        .route("/api/errors/resolve", post(handlers::errors::resolve_error))
        .route("/api/errors/clear", post(handlers::errors::clear_old_errors))
        .with_state(state);

    let router = match metrics {
        Some((endpoint, handle)) => api_routes.merge(
            Router::new()
                .route(&endpoint, get(handlers::metrics_handler::metrics))
                .with_state(handle),
        ),
        None => api_routes,
    };

    router.layer(TraceLayer::new_for_http())
}
