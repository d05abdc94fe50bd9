//! Payment gateway callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use common::{CallbackId, GatewayReference, TransactionId};
use domain::{PaymentOutcome, TransactionStatus};
use saga::{CallbackOutcome, PaymentGateway};
use serde::{Deserialize, Serialize};
use store::TransactionStore;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallbackRequest {
    pub callback_id: CallbackId,
    pub gateway_reference: GatewayReference,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallbackResponse {
    /// `processed`, `duplicate`, `ignored` or `unknown_reference` (held until
    /// the payment intent is attached).
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
}

impl From<CallbackOutcome> for PaymentCallbackResponse {
    fn from(outcome: CallbackOutcome) -> Self {
        let status = match outcome {
            CallbackOutcome::Processed { status, .. } | CallbackOutcome::Ignored { status, .. } => {
                Some(status)
            }
            CallbackOutcome::Duplicate | CallbackOutcome::UnknownReference => None,
        };
        Self {
            result: outcome.as_str(),
            transaction_id: outcome.transaction_id(),
            status,
        }
    }
}

/// POST /payments/callback: Applies a gateway payment outcome.
///
/// Every well-formed callback is acknowledged with 200 so the gateway stops
/// redelivering. A callback that could not be applied, whether from a storage
/// failure or from losing every concurrency retry, yields 500.
pub async fn callback<S: TransactionStore + 'static, G: PaymentGateway + 'static>(
    State(state): State<Arc<AppState<S, G>>>,
    payload: Result<Json<PaymentCallbackRequest>, JsonRejection>,
) -> Result<Json<PaymentCallbackResponse>, ApiError> {
    let Json(request) = payload?;
    if request.callback_id.is_blank() || request.gateway_reference.is_blank() {
        return Err(ApiError::BadRequest(
            "callbackId and gatewayReference must not be blank".to_string(),
        ));
    }

    let outcome = state
        .saga
        .on_callback(
            request.callback_id,
            request.gateway_reference,
            request.outcome,
        )
        .await
        .map_err(ApiError::Callback)?;

    Ok(Json(PaymentCallbackResponse::from(outcome)))
}
