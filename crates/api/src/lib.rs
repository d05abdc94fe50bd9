//! HTTP API server for the order fulfillment saga.
//!
//! Exposes transaction creation, payment callbacks and stock administration
//! over REST, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::PaymentGateway;
use store::TransactionStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::ApiError;
pub use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, G>(state: Arc<AppState<S, G>>, metrics_handle: PrometheusHandle) -> Router
where
    S: TransactionStore + 'static,
    G: PaymentGateway + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, G>))
        .route("/transactions", post(routes::transactions::create::<S, G>))
        .route("/transactions/{id}", get(routes::transactions::get::<S, G>))
        .route("/payments/callback", post(routes::payments::callback::<S, G>))
        .route("/stock", post(routes::stock::receive::<S, G>))
        .route(
            "/stock/{warehouse_id}/{product_id}",
            get(routes::stock::get::<S, G>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
