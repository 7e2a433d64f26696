//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use bus::InMemoryBus;
use operations::{InMemoryOperationStore, OperationStore, PostgresOperationStore};
use outbox::{
    InMemoryOutboxStore, OutboxCleanup, OutboxPublisher, OutboxStore, PostgresOutboxStore,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Create the stores
    let (outbox_store, operation_store): (Arc<dyn OutboxStore>, Arc<dyn OperationStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .expect("failed to connect to PostgreSQL");
                tracing::info!("connected to PostgreSQL");
                (
                    Arc::new(PostgresOutboxStore::new(pool.clone())),
                    Arc::new(PostgresOperationStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                (
                    Arc::new(InMemoryOutboxStore::new()),
                    Arc::new(InMemoryOperationStore::new()),
                )
            }
        };

    // 4. Start the background outbox loops
    let publisher_bus = Arc::new(InMemoryBus::new());
    let publisher = OutboxPublisher::new(
        outbox_store.clone(),
        publisher_bus,
        config.publisher_config(),
    );
    tokio::spawn(async move { publisher.run().await });

    let cleanup = OutboxCleanup::new(outbox_store.clone(), config.cleanup_config());
    tokio::spawn(async move { cleanup.run().await });

    // 5. Build the application
    let state = Arc::new(AppState {
        outbox: outbox_store,
        operations: operation_store,
    });
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
