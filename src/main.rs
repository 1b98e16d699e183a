//! bnc_billing - Billing backend with BNC payment reconciliation
//!
//! Serves the BCV rate, bank lookups through the BNC encrypted API, and
//! records bolívar payments against users' USD invoices.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bnc_billing::api::{self, AppState};
use bnc_billing::billing::PgBillingStore;
use bnc_billing::bnc::{
    BankClient, BankGateway, LogOnIssuer, PgWorkingKeyRepository, PydolarveProvider, RateCache,
    SessionKeyStore,
};
use bnc_billing::cache::{Clock, SystemClock};
use bnc_billing::handlers::PaymentAllocator;
use bnc_billing::{db, Config};

/// Initialize tracing/logging. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bnc_billing=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    let api_router = api::create_router().layer(middleware::from_fn(
        api::middleware::logging_middleware,
    ));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        environment = %config.environment,
        production = config.is_production(),
        "Starting bnc_billing server"
    );
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = BankClient::new(config.bnc.clone(), clock.clone(), config.utc_offset);
    let keys = Arc::new(SessionKeyStore::new(
        Arc::new(PgWorkingKeyRepository::new(pool.clone())),
        Arc::new(LogOnIssuer::new(client.clone())),
        clock.clone(),
        config.utc_offset,
    ));
    let gateway = Arc::new(BankGateway::new(client, keys));
    let rates = Arc::new(RateCache::new(
        Arc::new(PydolarveProvider::new(config.bcv_primary_url.clone())),
        gateway.clone(),
        clock,
        config.rate_cache_ttl,
    ));
    let allocator = PaymentAllocator::new(Arc::new(PgBillingStore::new(pool.clone())));

    tracing::info!(bnc = ?config.bnc, "BNC gateway configured");
    tracing::info!("Listening on http://{}", addr);

    let app = build_router(AppState::new(rates, gateway, allocator));

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
