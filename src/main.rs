use learnwave_backend::api;
use learnwave_backend::config::AppConfig;
use learnwave_backend::database::{self, PoolConfig};
use learnwave_backend::health::{HealthChecker, HealthStatus};
use learnwave_backend::logging::init_tracing;
use learnwave_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use learnwave_backend::payments::gateway::HttpPaymentGateway;
use learnwave_backend::payments::issuers::IssuerDirectory;
use learnwave_backend::services::effects::SideEffectDispatcher;
use learnwave_backend::services::notification::LogNotifier;
use learnwave_backend::services::payments::PaymentService;
use learnwave_backend::workers::payment_reconciler::{PaymentReconciler, ReconcilerConfig};

use axum::{
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Learnwave backend service"
    );

    let config = AppConfig::from_env().map_err(|e| {
        error!("❌ Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!("📊 Initializing database connection pool...");
    let pool_config = PoolConfig {
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        connection_timeout: Duration::from_secs(config.database.connection_timeout),
        ..PoolConfig::default()
    };
    let db_pool = database::init_pool(&config.database.url, Some(pool_config))
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!(e.to_string())
        })?;
    info!("✅ Database connection pool initialized");

    info!("💳 Initializing payment gateway client...");
    let issuers = Arc::new(IssuerDirectory::new());
    let gateway = Arc::new(HttpPaymentGateway::from_env(issuers.clone()).map_err(|e| {
        error!("❌ Failed to initialize payment gateway client: {}", e);
        anyhow::anyhow!(e.to_string())
    })?);
    info!(
        carriers = issuers.all().len(),
        "✅ Payment gateway client initialized"
    );

    let notifier = Arc::new(LogNotifier::new());
    let dispatcher = Arc::new(SideEffectDispatcher::new(db_pool.clone(), notifier));
    let payment_service = Arc::new(PaymentService::new(
        db_pool.clone(),
        gateway.clone(),
        issuers,
        dispatcher.clone(),
    ));

    let health_checker = HealthChecker::new(db_pool.clone());

    // Reconciliation worker: one loop per process, stopped via watch channel.
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let reconciler_enabled = std::env::var("RECONCILER_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    let mut reconciler_handle = None;
    if reconciler_enabled {
        let reconciler_config = ReconcilerConfig::from_env();
        info!(
            poll_interval_secs = reconciler_config.poll_interval.as_secs(),
            batch_size = reconciler_config.batch_size,
            "Starting payment reconciliation worker"
        );
        let worker = PaymentReconciler::new(
            db_pool.clone(),
            gateway.clone(),
            dispatcher.clone(),
            reconciler_config,
        );
        reconciler_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else {
        info!("Payment reconciliation worker disabled (RECONCILER_ENABLED=false)");
    }

    info!("🛣️  Setting up application routes...");
    let payments_state = api::payments::PaymentsState {
        service: payment_service,
    };
    let payment_routes = Router::new()
        .route("/api/payments", post(api::payments::create_payment))
        .route("/api/payments/{id}", get(api::payments::get_payment))
        .route(
            "/api/payments/{id}/initiate",
            post(api::payments::initiate_payment),
        )
        .with_state(payments_state);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .merge(payment_routes)
        .with_state(AppState { health_checker })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = reconciler_handle {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for reconciliation worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    "Welcome to Learnwave Backend API"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if !health_status.is_healthy() {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
