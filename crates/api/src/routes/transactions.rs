//! Transaction endpoints: create (reserve + request payment) and inspect.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{GatewayReference, IdempotencyKey, Money, TransactionId, Version};
use domain::{CancellationReason, LineItem, StockReservation, Transaction, TransactionStatus};
use saga::{PaymentGateway, TransactionDetails};
use serde::{Deserialize, Serialize};
use store::TransactionStore;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub idempotency_key: IdempotencyKey,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub transaction_id: TransactionId,
    pub idempotency_key: IdempotencyKey,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<CancellationReason>,
    pub total_amount_cents: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<GatewayReference>,
    pub payment_deadline: DateTime<Utc>,
    pub line_items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: Version,
    /// Present on reads; creation responses leave it out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservations: Option<Vec<StockReservation>>,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            transaction_id: tx.id(),
            idempotency_key: tx.idempotency_key().clone(),
            status: tx.status(),
            cancellation_reason: tx.cancellation_reason(),
            total_amount_cents: tx.total_amount(),
            gateway_reference: tx.gateway_reference().cloned(),
            payment_deadline: tx.payment_deadline(),
            line_items: tx.line_items().to_vec(),
            created_at: tx.created_at(),
            updated_at: tx.updated_at(),
            version: tx.version(),
            reservations: None,
        }
    }
}

impl From<TransactionDetails> for TransactionResponse {
    fn from(details: TransactionDetails) -> Self {
        Self {
            reservations: Some(details.reservations),
            ..Self::from(details.transaction)
        }
    }
}

/// POST /transactions: Reserves stock and requests a payment intent.
///
/// 201 for a new transaction, 200 when the idempotency key replays an
/// existing one.
pub async fn create<S: TransactionStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, G>>>,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let Json(request) = payload?;

    let created = state
        .saga
        .create_transaction(request.line_items, request.idempotency_key)
        .await?;

    let status = if created.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(TransactionResponse::from(created.transaction))))
}

/// GET /transactions/{id}: Returns a transaction with its reservations.
pub async fn get<S: TransactionStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, G>>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let uuid = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("Invalid transaction ID: {id}")))?;

    let details = state
        .saga
        .get_transaction(TransactionId::from_uuid(uuid))
        .await?;

    Ok(Json(TransactionResponse::from(details)))
}
