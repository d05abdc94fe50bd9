//! Stock administration: receive units and read levels.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::{ProductId, WarehouseId};
use domain::{StockKey, StockLevel};
use saga::PaymentGateway;
use serde::{Deserialize, Serialize};
use store::{StockLedger, TransactionStore};

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveStockRequest {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub quantity: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevelResponse {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub total: u64,
    pub reserved: u64,
    pub committed: u64,
    pub available: u64,
}

impl From<StockLevel> for StockLevelResponse {
    fn from(level: StockLevel) -> Self {
        let available = level.available();
        Self {
            warehouse_id: level.warehouse_id,
            product_id: level.product_id,
            total: level.total,
            reserved: level.reserved,
            committed: level.committed,
            available,
        }
    }
}

/// POST /stock: Adds received units to a (warehouse, product) pair.
pub async fn receive<S: TransactionStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, G>>>,
    payload: Result<Json<ReceiveStockRequest>, JsonRejection>,
) -> Result<Json<StockLevelResponse>, ApiError> {
    let Json(request) = payload?;
    if request.warehouse_id.is_blank() || request.product_id.is_blank() {
        return Err(ApiError::BadRequest(
            "warehouseId and productId must not be blank".to_string(),
        ));
    }
    if request.quantity == 0 {
        return Err(ApiError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let key = StockKey::new(request.warehouse_id, request.product_id);
    let level = state.store().receive_stock(&key, request.quantity).await?;
    tracing::info!(%key, quantity = request.quantity, total = level.total, "stock received");

    Ok(Json(StockLevelResponse::from(level)))
}

/// GET /stock/{warehouse_id}/{product_id}: Returns the current level.
pub async fn get<S: TransactionStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, G>>>,
    Path((warehouse_id, product_id)): Path<(String, String)>,
) -> Result<Json<StockLevelResponse>, ApiError> {
    let key = StockKey::new(warehouse_id, product_id);
    let level = state
        .store()
        .stock_level(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No stock recorded for {key}")))?;

    Ok(Json(StockLevelResponse::from(level)))
}
