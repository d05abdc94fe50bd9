//! HTTP client for an external payment gateway.

use std::time::Duration;

use async_trait::async_trait;
use common::{GatewayReference, Money, TransactionId};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::services::payment::PaymentGateway;

/// Request timeout for a single initiate call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest<'a> {
    correlation_id: TransactionId,
    amount_cents: i64,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    reference: String,
}

/// Payment gateway reached over HTTP.
///
/// `POST {base_url}/payments` with `{correlationId, amountCents, currency}`;
/// the gateway answers `{reference}`. 5xx and 429 answers are treated as
/// transient, other non-success statuses as rejections.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    currency: String,
}

impl HttpPaymentGateway {
    /// Creates a client for the gateway at `base_url`, charging in USD.
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            currency: "USD".to_string(),
        })
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate(
        &self,
        correlation_id: TransactionId,
        amount: Money,
    ) -> Result<GatewayReference, GatewayError> {
        let url = format!("{}/payments", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&InitiateRequest {
                correlation_id,
                amount_cents: amount.cents(),
                currency: &self.currency,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("HTTP {status}: {body}")));
        }

        let body: InitiateResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if body.reference.trim().is_empty() {
            return Err(GatewayError::InvalidResponse(
                "empty payment reference".to_string(),
            ));
        }

        Ok(GatewayReference::new(body.reference))
    }
}
