//! API server entry point.

use std::sync::Arc;

use api::{AppState, Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{LogBroker, OutboxPublisher};
use saga::{
    FulfillmentSaga, HttpPaymentGateway, InMemoryPaymentGateway, PaymentGateway,
    ReservationSweeper,
};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, TransactionStore};
use tokio::signal;
use tokio::sync::watch;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and payment gateway, then serve
    match (&config.database_url, &config.payment_gateway_url) {
        (Some(database_url), gateway_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL store");

            match gateway_url {
                Some(url) => run(config.clone(), metrics_handle, store, http_gateway(url)).await,
                None => run(config.clone(), metrics_handle, store, sandbox_gateway()).await,
            }
        }
        (None, gateway_url) => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            let store = InMemoryStore::new();

            match gateway_url {
                Some(url) => run(config.clone(), metrics_handle, store, http_gateway(url)).await,
                None => run(config.clone(), metrics_handle, store, sandbox_gateway()).await,
            }
        }
    }
}

fn http_gateway(url: &str) -> HttpPaymentGateway {
    tracing::info!(%url, "using HTTP payment gateway");
    HttpPaymentGateway::new(url).expect("failed to build payment gateway client")
}

fn sandbox_gateway() -> InMemoryPaymentGateway {
    tracing::warn!("PAYMENT_GATEWAY_URL not set, using sandbox payment gateway");
    InMemoryPaymentGateway::new()
}

/// Serves the API with the outbox publisher and reservation sweeper running
/// alongside, and stops all three on shutdown.
async fn run<S, G>(config: Config, metrics_handle: PrometheusHandle, store: S, gateway: G)
where
    S: TransactionStore + Clone + 'static,
    G: PaymentGateway + 'static,
{
    let saga = Arc::new(FulfillmentSaga::new(
        store.clone(),
        gateway,
        config.saga_config(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 4. Start background workers
    let publisher = OutboxPublisher::new(
        Arc::new(store),
        Arc::new(LogBroker),
        config.publisher_config(),
    );
    let publisher_rx = shutdown_rx.clone();
    let publisher_task = tokio::spawn(async move { publisher.run(publisher_rx).await });

    let sweeper = ReservationSweeper::new(saga.clone(), config.sweeper_config());
    let sweeper_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    // 5. Build the application
    let app = api::create_app(Arc::new(AppState::new(saga)), metrics_handle);

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

    // 7. Stop background workers
    let _ = shutdown_tx.send(true);
    for (name, task) in [("outbox publisher", publisher_task), ("sweeper", sweeper_task)] {
        if let Err(err) = task.await {
            tracing::error!(worker = name, error = %err, "background worker panicked");
        }
    }

    tracing::info!("server shut down gracefully");
}
