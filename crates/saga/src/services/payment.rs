//! Payment gateway trait, in-memory sandbox, and the retrying adapter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{GatewayReference, Money, RetryPolicy, TransactionId};

use crate::error::GatewayError;

/// Outbound side of the payment gateway contract.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests a payment intent for `amount`.
    ///
    /// `correlation_id` is echoed back by the gateway's callbacks; it is always
    /// the transaction id.
    async fn initiate(
        &self,
        correlation_id: TransactionId,
        amount: Money,
    ) -> Result<GatewayReference, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<TransactionId, (GatewayReference, Money)>,
    next_id: u32,
    attempts: usize,
    fail_on_initiate: bool,
    fail_next: usize,
    reject: bool,
}

/// Sandbox gateway for local runs and tests.
///
/// Issues `PAY-0001`, `PAY-0002`, ... references and never calls back on its
/// own; callers drive outcomes through the callback endpoint.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every initiation fail as unavailable.
    pub fn set_fail_on_initiate(&self, fail: bool) {
        self.state.write().unwrap().fail_on_initiate = fail;
    }

    /// Makes the next `count` initiations fail as unavailable.
    pub fn fail_next(&self, count: usize) {
        self.state.write().unwrap().fail_next = count;
    }

    /// Makes every initiation fail with a non-retryable rejection.
    pub fn set_reject(&self, reject: bool) {
        self.state.write().unwrap().reject = reject;
    }

    /// Returns the number of issued payment intents.
    pub fn intent_count(&self) -> usize {
        self.state.read().unwrap().intents.len()
    }

    /// Returns the number of initiate calls, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.state.read().unwrap().attempts
    }

    /// Returns the reference issued for a transaction, if any.
    pub fn reference_for(&self, transaction_id: TransactionId) -> Option<GatewayReference> {
        self.state
            .read()
            .unwrap()
            .intents
            .get(&transaction_id)
            .map(|(reference, _)| reference.clone())
    }

    /// Returns the amount requested for a transaction, if any.
    pub fn amount_for(&self, transaction_id: TransactionId) -> Option<Money> {
        self.state
            .read()
            .unwrap()
            .intents
            .get(&transaction_id)
            .map(|(_, amount)| *amount)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(
        &self,
        correlation_id: TransactionId,
        amount: Money,
    ) -> Result<GatewayReference, GatewayError> {
        let mut state = self.state.write().unwrap();
        state.attempts += 1;

        if state.fail_on_initiate {
            return Err(GatewayError::Unavailable("sandbox offline".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(GatewayError::Unavailable("transient failure".to_string()));
        }
        if state.reject {
            return Err(GatewayError::Rejected("payment declined".to_string()));
        }

        // A repeated initiation for the same correlation id returns the same intent.
        if let Some((reference, _)) = state.intents.get(&correlation_id) {
            return Ok(reference.clone());
        }

        state.next_id += 1;
        let reference = GatewayReference::new(format!("PAY-{:04}", state.next_id));
        state
            .intents
            .insert(correlation_id, (reference.clone(), amount));

        Ok(reference)
    }
}

/// Wraps a gateway with exponential backoff on transient failures.
#[derive(Debug, Clone)]
pub struct PaymentAdapter<G: PaymentGateway> {
    gateway: G,
    retry: RetryPolicy,
}

impl<G: PaymentGateway> PaymentAdapter<G> {
    pub fn new(gateway: G, retry: RetryPolicy) -> Self {
        Self { gateway, retry }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Obtains a payment intent, retrying transient failures per the policy.
    ///
    /// Returns the last error once retries are exhausted or the gateway
    /// rejects the request outright.
    #[tracing::instrument(skip(self), fields(%transaction_id, amount_cents = amount.cents()))]
    pub async fn initiate_payment(
        &self,
        transaction_id: TransactionId,
        amount: Money,
    ) -> Result<GatewayReference, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.gateway.initiate(transaction_id, amount).await {
                Ok(reference) => {
                    tracing::info!(%reference, attempt, "payment intent created");
                    return Ok(reference);
                }
                Err(err) if err.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "payment initiation failed, retrying"
                    );
                    metrics::counter!("payment_gateway_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(error = %err, attempt, "payment initiation failed");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn fast_retry(max_retries: usize) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_sandbox_issues_sequential_references() {
        let gateway = InMemoryPaymentGateway::new();
        let first = TransactionId::new();

        let a = gateway
            .initiate(first, Money::from_cents(500))
            .await
            .unwrap();
        let b = gateway
            .initiate(TransactionId::new(), Money::from_cents(700))
            .await
            .unwrap();

        assert_eq!(a.as_str(), "PAY-0001");
        assert_eq!(b.as_str(), "PAY-0002");
        assert_eq!(gateway.amount_for(first), Some(Money::from_cents(500)));
    }

    #[tokio::test]
    async fn test_sandbox_reuses_intent_for_same_correlation_id() {
        let gateway = InMemoryPaymentGateway::new();
        let id = TransactionId::new();

        let a = gateway.initiate(id, Money::from_cents(500)).await.unwrap();
        let b = gateway.initiate(id, Money::from_cents(500)).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(gateway.intent_count(), 1);
    }

    #[tokio::test]
    async fn test_adapter_retries_transient_failures() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.fail_next(2);
        let adapter = PaymentAdapter::new(gateway.clone(), fast_retry(3));

        let reference = adapter
            .initiate_payment(TransactionId::new(), Money::from_cents(100))
            .await
            .unwrap();

        assert_eq!(reference.as_str(), "PAY-0001");
        assert_eq!(gateway.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_adapter_gives_up_after_max_retries() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_on_initiate(true);
        let adapter = PaymentAdapter::new(gateway.clone(), fast_retry(2));

        let result = adapter
            .initiate_payment(TransactionId::new(), Money::from_cents(100))
            .await;

        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
        assert_eq!(gateway.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_adapter_does_not_retry_rejection() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_reject(true);
        let adapter = PaymentAdapter::new(gateway.clone(), fast_retry(5));

        let result = adapter
            .initiate_payment(TransactionId::new(), Money::from_cents(100))
            .await;

        assert!(matches!(result, Err(GatewayError::Rejected(_))));
        assert_eq!(gateway.attempt_count(), 1);
    }
}
