//! Background expiry of stale reservations.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::TransactionId;
use store::{StockLedger, StockLedgerExt, TransactionStore};
use tokio::sync::watch;

use crate::Result;
use crate::config::SweeperConfig;
use crate::coordinator::{ExpireOutcome, FulfillmentSaga};
use crate::error::SagaError;
use crate::services::PaymentGateway;

/// Counts from a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired HELD reservations found.
    pub examined: usize,
    /// Transactions cancelled as expired.
    pub expired: usize,
    /// Transactions that were no longer eligible, typically completed concurrently.
    pub skipped: usize,
    /// Reservations released because no transaction owns them.
    pub orphans_released: usize,
    /// Transactions whose expiry failed and will be retried next sweep.
    pub failed: usize,
    /// Held callbacks applied because their gateway reference is now attached.
    pub callbacks_applied: usize,
}

/// Periodically expires transactions whose reservations outlived their deadline.
pub struct ReservationSweeper<S: TransactionStore, G: PaymentGateway> {
    saga: Arc<FulfillmentSaga<S, G>>,
    config: SweeperConfig,
}

impl<S: TransactionStore, G: PaymentGateway> ReservationSweeper<S, G> {
    pub fn new(saga: Arc<FulfillmentSaga<S, G>>, config: SweeperConfig) -> Self {
        Self { saga, config }
    }

    /// Runs one sweep as of `now`.
    ///
    /// Held callbacks whose reference is now attached are applied first, so a
    /// payment that overtook its intent is never expired. Reservations are then
    /// grouped by transaction and each transaction goes through
    /// [`FulfillmentSaga::expire_stale`]; a transaction that finished in the
    /// meantime is counted as skipped.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let callbacks_applied = self
            .saga
            .resume_pending_callbacks(self.config.batch_size)
            .await?;

        let stale = self
            .saga
            .store()
            .expired_reservations(now, self.config.batch_size)
            .await?;
        let mut report = SweepReport {
            examined: stale.len(),
            callbacks_applied,
            ..SweepReport::default()
        };

        let owners: BTreeSet<TransactionId> =
            stale.iter().map(|reservation| reservation.transaction_id).collect();

        for transaction_id in owners {
            match self.saga.expire_stale(transaction_id, now).await {
                Ok(ExpireOutcome::Expired) => {
                    report.expired += 1;
                    metrics::counter!("sweeper_expired_total").increment(1);
                }
                Ok(ExpireOutcome::NotEligible(status)) => {
                    report.skipped += 1;
                    tracing::debug!(%transaction_id, %status, "not eligible for expiry");
                }
                Err(SagaError::TransactionNotFound(_)) => {
                    for reservation in stale
                        .iter()
                        .filter(|reservation| reservation.transaction_id == transaction_id)
                    {
                        self.saga.store().release(reservation.id).await?;
                        report.orphans_released += 1;
                    }
                    tracing::warn!(%transaction_id, "released reservations without a transaction");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(%transaction_id, error = %err, "expiry failed");
                }
            }
        }

        if report.examined > 0 || report.callbacks_applied > 0 {
            tracing::info!(
                callbacks_applied = report.callbacks_applied,
                examined = report.examined,
                expired = report.expired,
                skipped = report.skipped,
                orphans_released = report.orphans_released,
                failed = report.failed,
                "sweep complete"
            );
        }

        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    ///
    /// Errors are logged and the next sweep proceeds as usual.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "reservation sweeper started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(err) = self.sweep_once(Utc::now()).await {
                tracing::error!(error = %err, "sweep failed");
            }
        }

        tracing::info!("reservation sweeper stopped");
    }
}
