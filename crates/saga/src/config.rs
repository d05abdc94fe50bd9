//! Orchestrator and sweeper settings.

use std::time::Duration;

use common::RetryPolicy;

/// Settings for the fulfillment saga.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// How long a transaction may wait for its payment outcome before it expires.
    pub payment_timeout: chrono::Duration,
    /// Backoff for transient payment gateway failures.
    pub gateway_retry: RetryPolicy,
    /// Reload-and-retry attempts after losing an optimistic concurrency race.
    pub conflict_retries: usize,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            payment_timeout: chrono::Duration::minutes(15),
            gateway_retry: RetryPolicy::default(),
            conflict_retries: 5,
        }
    }
}

impl SagaConfig {
    pub fn with_payment_timeout(mut self, timeout: chrono::Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn with_gateway_retry(mut self, policy: RetryPolicy) -> Self {
        self.gateway_retry = policy;
        self
    }
}

/// Settings for the reservation sweeper loop.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Wait between sweeps.
    pub interval: Duration,
    /// Maximum expired reservations examined per sweep.
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 500,
        }
    }
}
