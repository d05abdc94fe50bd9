//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use serde_json::{Value, json};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga execution error.
    Saga(SagaError),
    /// Direct store access error.
    Store(StoreError),
    /// A payment callback that could not be applied. The gateway only tells
    /// 200 from 500, so any failure asks it to redeliver.
    Callback(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body("NOT_FOUND", msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body("BAD_REQUEST", msg)),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::Callback(err) => {
                let (status, body) = saga_error_to_response(err);
                if status != StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::warn!(%status, code = %body["code"], "callback not applied, gateway will redeliver");
                }
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn error_body(code: &str, message: impl Into<String>) -> Value {
    json!({ "error": message.into(), "code": code })
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, Value) {
    let message = err.to_string();
    match err {
        SagaError::InsufficientStock {
            transaction_id,
            warehouse_id,
            product_id,
            requested,
            available,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "code": "INSUFFICIENT_STOCK",
                "transactionId": transaction_id,
                "status": "CANCELLED",
                "warehouseId": warehouse_id,
                "productId": product_id,
                "requested": requested,
                "available": available,
            }),
        ),
        SagaError::GatewayUnavailable { transaction_id, .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "error": message,
                "code": "PAYMENT_GATEWAY_UNAVAILABLE",
                "transactionId": transaction_id,
                "status": "CANCELLED",
            }),
        ),
        SagaError::InvalidRequest(_) => (
            StatusCode::BAD_REQUEST,
            error_body("INVALID_REQUEST", message),
        ),
        SagaError::TransactionNotFound(_) => (
            StatusCode::NOT_FOUND,
            error_body("TRANSACTION_NOT_FOUND", message),
        ),
        SagaError::Domain(_) => (StatusCode::CONFLICT, error_body("INVALID_STATE", message)),
        SagaError::Store(err) => store_error_to_response(err),
        SagaError::Serialization(_) => internal(message),
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, Value) {
    let message = err.to_string();
    match err {
        StoreError::ConcurrencyConflict { .. } => (
            StatusCode::CONFLICT,
            error_body("CONCURRENCY_CONFLICT", message),
        ),
        StoreError::InsufficientStock { .. } => (
            StatusCode::CONFLICT,
            error_body("INSUFFICIENT_STOCK", message),
        ),
        StoreError::DuplicateIdempotencyKey(_) | StoreError::DuplicateCallback(_) => {
            (StatusCode::CONFLICT, error_body("DUPLICATE", message))
        }
        StoreError::TransactionNotFound(_) | StoreError::ReservationNotFound(_) => {
            (StatusCode::NOT_FOUND, error_body("NOT_FOUND", message))
        }
        StoreError::CorruptRow(_)
        | StoreError::Database(_)
        | StoreError::Migration(_)
        | StoreError::Serialization(_) => internal(message),
    }
}

fn internal(message: String) -> (StatusCode, Value) {
    tracing::error!(error = %message, "storage failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body("STORAGE_FAILURE", message),
    )
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
