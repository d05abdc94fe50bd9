//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use saga::PaymentGateway;
use serde::Serialize;
use store::{OutboxStore, TransactionStore};

use super::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unpublished_events: Option<u64>,
}

/// GET /health: Reports whether the store answers, plus the outbox backlog.
pub async fn check<S: TransactionStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, G>>>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.store().unpublished_count().await {
        Ok(count) => {
            metrics::gauge!("outbox_unpublished_events").set(count as f64);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ok",
                    unpublished_events: Some(count),
                }),
            )
        }
        Err(err) => {
            tracing::error!(error = %err, "health check could not reach the store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    unpublished_events: None,
                }),
            )
        }
    }
}
