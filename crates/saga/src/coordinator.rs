//! Fulfillment saga orchestrator.
//!
//! Drives a [`Transaction`] from reservation through payment to commit or
//! compensation. Every transition is a single [`UnitOfWork`]: the transaction
//! write, its reservation settlements, the outbox event and (for callbacks)
//! the callback record commit together or not at all.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{
    CallbackId, GatewayReference, IdempotencyKey, ProductId, TransactionId, Version, WarehouseId,
};
use domain::{
    CancellationReason, LineItem, PaymentCallback, PaymentOutcome, PendingCallback,
    StockReservation, Transaction, TransactionStatus,
};
use store::{OutboxEvent, StockLedger, StoreError, TransactionStore, UnitOfWork};

use crate::config::SagaConfig;
use crate::error::{GatewayError, Result, SagaError};
use crate::services::{PaymentAdapter, PaymentGateway};

/// Result of [`FulfillmentSaga::create_transaction`].
#[derive(Debug, Clone)]
pub struct Created {
    pub transaction: Transaction,
    /// True if the idempotency key matched an existing transaction.
    pub replayed: bool,
}

/// How a payment callback was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The outcome was applied; the transaction is now terminal.
    Processed {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },
    /// The callback id was already recorded.
    Duplicate,
    /// Recorded, but the transaction no longer accepted a payment outcome.
    Ignored {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },
    /// No transaction carries the callback's gateway reference yet. The
    /// callback is held and applied once the payment intent is attached.
    UnknownReference,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Processed { .. } => "processed",
            CallbackOutcome::Duplicate => "duplicate",
            CallbackOutcome::Ignored { .. } => "ignored",
            CallbackOutcome::UnknownReference => "unknown_reference",
        }
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            CallbackOutcome::Processed { transaction_id, .. }
            | CallbackOutcome::Ignored { transaction_id, .. } => Some(*transaction_id),
            CallbackOutcome::Duplicate | CallbackOutcome::UnknownReference => None,
        }
    }
}

/// Result of [`FulfillmentSaga::expire_stale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Reservations released and the transaction cancelled as expired.
    Expired,
    /// The transaction is terminal or its deadline has not passed.
    NotEligible(TransactionStatus),
}

/// A transaction together with its reservations.
#[derive(Debug, Clone)]
pub struct TransactionDetails {
    pub transaction: Transaction,
    pub reservations: Vec<StockReservation>,
}

/// What a transition decided after looking at the current state.
enum Decision<T> {
    /// Commit the unit, then report `T`.
    Commit(UnitOfWork, T),
    /// Nothing to write.
    Skip(T),
}

/// Orchestrates the order fulfillment saga over a [`TransactionStore`] and a
/// payment gateway.
pub struct FulfillmentSaga<S: TransactionStore, G: PaymentGateway> {
    store: S,
    payments: PaymentAdapter<G>,
    config: SagaConfig,
}

impl<S: TransactionStore, G: PaymentGateway> FulfillmentSaga<S, G> {
    /// Creates a new saga orchestrator.
    pub fn new(store: S, gateway: G, config: SagaConfig) -> Self {
        let payments = PaymentAdapter::new(gateway, config.gateway_retry.clone());
        Self {
            store,
            payments,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn payments(&self) -> &PaymentAdapter<G> {
        &self.payments
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Creates a transaction, reserves its stock and requests a payment intent.
    ///
    /// A known idempotency key returns the stored transaction unchanged. On
    /// insufficient stock the transaction is persisted as cancelled and
    /// [`SagaError::InsufficientStock`] is returned; if no payment intent can
    /// be obtained the reservations are released, the transaction is
    /// cancelled, and [`SagaError::GatewayUnavailable`] is returned.
    #[tracing::instrument(
        skip(self, line_items),
        fields(%idempotency_key, line_items = line_items.len())
    )]
    pub async fn create_transaction(
        &self,
        line_items: Vec<LineItem>,
        idempotency_key: IdempotencyKey,
    ) -> Result<Created> {
        let started = Instant::now();
        let result = self.create(line_items, idempotency_key).await;
        metrics::histogram!("saga_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn create(
        &self,
        line_items: Vec<LineItem>,
        idempotency_key: IdempotencyKey,
    ) -> Result<Created> {
        if let Some(existing) = self
            .store
            .find_by_idempotency_key(&idempotency_key)
            .await?
        {
            return Ok(replay(existing));
        }

        let now = Utc::now();
        let deadline = now + self.config.payment_timeout;
        let mut transaction = Transaction::create(
            TransactionId::new(),
            idempotency_key,
            line_items,
            deadline,
            now,
        )
        .map_err(SagaError::InvalidRequest)?;
        let unreserved = transaction.clone();

        // Stock is held in the same unit that first persists the transaction,
        // so it is never stored in CREATED.
        transaction.mark_stock_reserved(now)?;
        let uow = transaction.line_items().iter().fold(
            UnitOfWork::new().insert_transaction(transaction.clone()),
            |uow, item| {
                uow.reserve(StockReservation::hold(
                    transaction.id(),
                    item.stock_key(),
                    item.quantity,
                    deadline,
                    now,
                ))
            },
        );

        match self.store.commit(uow).await {
            Ok(version) => {
                if let Some(version) = version {
                    transaction.set_version(version);
                }
            }
            Err(StoreError::InsufficientStock {
                warehouse_id,
                product_id,
                requested,
                available,
            }) => {
                return self
                    .reject_for_stock(unreserved, warehouse_id, product_id, requested, available)
                    .await;
            }
            Err(StoreError::DuplicateIdempotencyKey(key)) => return self.replay_key(&key).await,
            Err(err) => return Err(err.into()),
        }

        metrics::counter!("saga_transactions_created_total").increment(1);
        tracing::info!(
            transaction_id = %transaction.id(),
            total_cents = transaction.total_amount().cents(),
            "stock reserved"
        );

        match self
            .payments
            .initiate_payment(transaction.id(), transaction.total_amount())
            .await
        {
            Ok(reference) => {
                let transaction = self.attach_payment(transaction.id(), reference).await?;
                Ok(Created {
                    transaction,
                    replayed: false,
                })
            }
            Err(err) => Err(self.abandon_payment(transaction.id(), err).await),
        }
    }

    /// Persists a transaction whose stock could not be reserved as
    /// `CANCELLED(RESERVE_FAILED)`, then reports the shortage.
    async fn reject_for_stock(
        &self,
        mut transaction: Transaction,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        requested: u64,
        available: u64,
    ) -> Result<Created> {
        let now = Utc::now();
        let event = transaction.cancel(CancellationReason::ReserveFailed, now)?;
        let uow = UnitOfWork::new()
            .insert_transaction(transaction.clone())
            .enqueue(OutboxEvent::from_transaction_event(&event, now)?);

        match self.store.commit(uow).await {
            Ok(_) => {}
            Err(StoreError::DuplicateIdempotencyKey(key)) => return self.replay_key(&key).await,
            Err(err) => return Err(err.into()),
        }

        metrics::counter!("saga_transactions_created_total").increment(1);
        record_cancelled(CancellationReason::ReserveFailed);
        tracing::warn!(
            transaction_id = %transaction.id(),
            %warehouse_id,
            %product_id,
            requested,
            available,
            "insufficient stock, transaction cancelled"
        );

        Err(SagaError::InsufficientStock {
            transaction_id: transaction.id(),
            warehouse_id,
            product_id,
            requested,
            available,
        })
    }

    async fn replay_key(&self, key: &IdempotencyKey) -> Result<Created> {
        let existing = self
            .store
            .find_by_idempotency_key(key)
            .await?
            .ok_or_else(|| StoreError::DuplicateIdempotencyKey(key.clone()))?;
        Ok(replay(existing))
    }

    /// `STOCK_RESERVED` → `AWAITING_PAYMENT` with the gateway reference.
    async fn attach_payment(
        &self,
        transaction_id: TransactionId,
        reference: GatewayReference,
    ) -> Result<Transaction> {
        let now = Utc::now();
        let (mut transaction, version) = self
            .transition(transaction_id, |mut transaction, _| {
                if !transaction.status().can_await_payment() {
                    // Expired while the gateway was being retried; the intent is orphaned.
                    tracing::warn!(
                        %reference,
                        status = %transaction.status(),
                        "payment intent arrived after the transaction moved on"
                    );
                    return Ok(Decision::Skip(transaction));
                }
                transaction.await_payment(reference.clone(), now)?;
                let uow = UnitOfWork::new().update_transaction(transaction.clone());
                Ok(Decision::Commit(uow, transaction))
            })
            .await?;

        if let Some(version) = version {
            transaction.set_version(version);
            tracing::info!(%transaction_id, %reference, "awaiting payment");

            if self.apply_pending_for(&reference, transaction_id).await > 0 {
                transaction = self.load(transaction_id).await?.0;
            }
        }
        Ok(transaction)
    }

    /// Applies callbacks that arrived for `reference` before it was attached.
    ///
    /// Failures are logged and left pending for the sweeper.
    async fn apply_pending_for(
        &self,
        reference: &GatewayReference,
        transaction_id: TransactionId,
    ) -> usize {
        let pending = match self.store.pending_callbacks_for(reference).await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(%reference, error = %err, "could not load pending callbacks");
                return 0;
            }
        };

        let mut applied = 0;
        for callback in pending {
            let callback_id = callback.callback_id.clone();
            match self.resolve_pending(callback, transaction_id).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%callback_id, error = %err, "pending callback not applied");
                }
            }
        }
        applied
    }

    /// Applies held callbacks whose gateway reference has since been attached.
    ///
    /// Returns how many were applied. Individual failures are logged and
    /// retried on the next call.
    #[tracing::instrument(skip(self))]
    pub async fn resume_pending_callbacks(&self, limit: usize) -> Result<usize> {
        let pending = self.store.resolvable_pending_callbacks(limit).await?;

        let mut applied = 0;
        for callback in pending {
            let callback_id = callback.callback_id.clone();
            let Some(transaction) = self
                .store
                .find_by_gateway_reference(&callback.gateway_reference)
                .await?
            else {
                continue;
            };
            match self.resolve_pending(callback, transaction.id()).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%callback_id, error = %err, "pending callback not applied");
                }
            }
        }
        Ok(applied)
    }

    /// Applies one held callback. Returns false if it had already been recorded.
    async fn resolve_pending(
        &self,
        callback: PendingCallback,
        transaction_id: TransactionId,
    ) -> Result<bool> {
        let handled = self
            .handle_payment_outcome(callback.callback_id.clone(), transaction_id, callback.outcome)
            .await?;
        if handled == CallbackOutcome::Duplicate {
            self.store
                .discard_pending_callback(&callback.callback_id)
                .await?;
            return Ok(false);
        }
        tracing::info!(
            callback_id = %callback.callback_id,
            reference = %callback.gateway_reference,
            result = handled.as_str(),
            "pending callback applied"
        );
        Ok(true)
    }

    /// Compensates a failed payment initiation: releases every held
    /// reservation and cancels the transaction as `PAYMENT_FAILED`.
    async fn abandon_payment(&self, transaction_id: TransactionId, err: GatewayError) -> SagaError {
        let now = Utc::now();
        let cancelled = self
            .transition(transaction_id, |mut transaction, reservations| {
                if !transaction
                    .status()
                    .can_cancel(CancellationReason::PaymentFailed)
                {
                    return Ok(Decision::Skip(false));
                }
                let event = transaction.cancel(CancellationReason::PaymentFailed, now)?;
                let uow = release_held(
                    &reservations,
                    UnitOfWork::new().update_transaction(transaction),
                )
                .enqueue(OutboxEvent::from_transaction_event(&event, now)?);
                Ok(Decision::Commit(uow, true))
            })
            .await;

        match cancelled {
            Ok((true, _)) => {
                record_cancelled(CancellationReason::PaymentFailed);
                tracing::warn!(%transaction_id, error = %err, "payment initiation failed, transaction cancelled");
            }
            Ok((false, _)) => {}
            Err(compensation_err) => {
                tracing::error!(
                    %transaction_id,
                    error = %compensation_err,
                    "could not compensate failed payment initiation"
                );
                return compensation_err;
            }
        }

        SagaError::GatewayUnavailable {
            transaction_id,
            reason: err.to_string(),
        }
    }

    /// Applies a gateway outcome to a transaction, exactly once per callback id.
    ///
    /// `PAID` commits every held reservation and completes the transaction;
    /// `FAILED` releases them and cancels it. A transaction that no longer
    /// awaits payment only gets the callback recorded.
    #[tracing::instrument(skip(self), fields(%callback_id, %transaction_id, outcome = outcome.as_str()))]
    pub async fn handle_payment_outcome(
        &self,
        callback_id: CallbackId,
        transaction_id: TransactionId,
        outcome: PaymentOutcome,
    ) -> Result<CallbackOutcome> {
        if self.store.find_callback(&callback_id).await?.is_some() {
            tracing::debug!("callback already recorded");
            return Ok(record_callback_result(CallbackOutcome::Duplicate));
        }

        let now = Utc::now();
        let result = self
            .transition(transaction_id, |mut transaction, reservations| {
                let callback =
                    PaymentCallback::new(callback_id.clone(), transaction_id, outcome, now);

                if !transaction.status().accepts_payment_outcome() {
                    let uow = UnitOfWork::new().record_callback(callback);
                    let status = transaction.status();
                    return Ok(Decision::Commit(
                        uow,
                        CallbackOutcome::Ignored {
                            transaction_id,
                            status,
                        },
                    ));
                }

                let (event, uow) = match outcome {
                    PaymentOutcome::Paid => {
                        transaction.mark_paid(now)?;
                        let event = transaction.complete(now)?;
                        (event, commit_held(&reservations, UnitOfWork::new()))
                    }
                    PaymentOutcome::Failed => {
                        let event = transaction.cancel(CancellationReason::PaymentFailed, now)?;
                        (event, release_held(&reservations, UnitOfWork::new()))
                    }
                };
                let status = transaction.status();
                let uow = uow
                    .update_transaction(transaction)
                    .enqueue(OutboxEvent::from_transaction_event(&event, now)?)
                    .record_callback(callback);
                Ok(Decision::Commit(
                    uow,
                    CallbackOutcome::Processed {
                        transaction_id,
                        status,
                    },
                ))
            })
            .await;

        let handled = match result {
            Ok((handled, _)) => handled,
            // Lost a race with a redelivery of the same callback.
            Err(SagaError::Store(StoreError::DuplicateCallback(_))) => CallbackOutcome::Duplicate,
            Err(err) => return Err(err),
        };

        match handled {
            CallbackOutcome::Processed {
                status: TransactionStatus::Completed,
                ..
            } => {
                metrics::counter!("saga_transactions_completed_total").increment(1);
                tracing::info!("payment confirmed, transaction completed");
            }
            CallbackOutcome::Processed { .. } => {
                record_cancelled(CancellationReason::PaymentFailed);
                tracing::info!("payment failed, transaction cancelled");
            }
            CallbackOutcome::Ignored { status, .. } => {
                tracing::info!(%status, "payment outcome ignored");
            }
            CallbackOutcome::Duplicate | CallbackOutcome::UnknownReference => {}
        }

        Ok(record_callback_result(handled))
    }

    /// Inbound gateway callback: deduplicates by callback id, resolves the
    /// gateway reference, then applies the outcome.
    ///
    /// A gateway may call back before its initiate response is stored. An
    /// unknown reference is therefore held as pending and acknowledged; it is
    /// applied when the reference is attached.
    #[tracing::instrument(skip(self), fields(%callback_id, %gateway_reference, outcome = outcome.as_str()))]
    pub async fn on_callback(
        &self,
        callback_id: CallbackId,
        gateway_reference: GatewayReference,
        outcome: PaymentOutcome,
    ) -> Result<CallbackOutcome> {
        if self.store.find_callback(&callback_id).await?.is_some() {
            tracing::debug!("callback already recorded");
            return Ok(record_callback_result(CallbackOutcome::Duplicate));
        }

        let transaction = match self
            .store
            .find_by_gateway_reference(&gateway_reference)
            .await?
        {
            Some(transaction) => transaction,
            None => {
                let pending = PendingCallback::new(
                    callback_id.clone(),
                    gateway_reference.clone(),
                    outcome,
                    Utc::now(),
                );
                self.store.save_pending_callback(pending).await?;

                // The reference may have been attached between the lookup and the save.
                match self
                    .store
                    .find_by_gateway_reference(&gateway_reference)
                    .await?
                {
                    Some(transaction) => transaction,
                    None => {
                        tracing::warn!("callback for unknown gateway reference held as pending");
                        return Ok(record_callback_result(CallbackOutcome::UnknownReference));
                    }
                }
            }
        };

        self.handle_payment_outcome(callback_id, transaction.id(), outcome)
            .await
    }

    /// Cancels a transaction whose payment deadline passed at `now`,
    /// releasing its held reservations. Any other state is a no-op.
    #[tracing::instrument(skip(self), fields(%transaction_id))]
    pub async fn expire_stale(
        &self,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<ExpireOutcome> {
        let (outcome, _) = self
            .transition(transaction_id, |mut transaction, reservations| {
                if !transaction.is_expired(now) {
                    return Ok(Decision::Skip(ExpireOutcome::NotEligible(
                        transaction.status(),
                    )));
                }
                let event = transaction.cancel(CancellationReason::Expired, now)?;
                let uow = release_held(
                    &reservations,
                    UnitOfWork::new().update_transaction(transaction),
                )
                .enqueue(OutboxEvent::from_transaction_event(&event, now)?);
                Ok(Decision::Commit(uow, ExpireOutcome::Expired))
            })
            .await?;

        if outcome == ExpireOutcome::Expired {
            record_cancelled(CancellationReason::Expired);
            tracing::info!("payment deadline passed, transaction expired");
        }
        Ok(outcome)
    }

    /// Loads a transaction and its reservations.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<TransactionDetails> {
        let (transaction, reservations) = self.load(id).await?;
        Ok(TransactionDetails {
            transaction,
            reservations,
        })
    }

    async fn load(&self, id: TransactionId) -> Result<(Transaction, Vec<StockReservation>)> {
        let transaction = self
            .store
            .get_transaction(id)
            .await?
            .ok_or(SagaError::TransactionNotFound(id))?;
        let reservations = self.store.reservations_for_transaction(id).await?;
        Ok((transaction, reservations))
    }

    /// Loads the transaction, lets `decide` plan a unit of work, and commits it.
    ///
    /// On a version conflict the state is reloaded and `decide` runs again, so
    /// its precondition is always checked against the latest write. Returns the
    /// decision's value and the transaction's new version if one was written.
    async fn transition<T, F>(
        &self,
        transaction_id: TransactionId,
        mut decide: F,
    ) -> Result<(T, Option<Version>)>
    where
        T: Send,
        F: FnMut(Transaction, Vec<StockReservation>) -> Result<Decision<T>> + Send,
    {
        let mut attempt = 0;
        loop {
            let (transaction, reservations) = self.load(transaction_id).await?;
            let (uow, outcome) = match decide(transaction, reservations)? {
                Decision::Skip(outcome) => return Ok((outcome, None)),
                Decision::Commit(uow, outcome) => (uow, outcome),
            };

            match self.store.commit(uow).await {
                Ok(version) => return Ok((outcome, version)),
                Err(StoreError::ConcurrencyConflict { expected, .. })
                    if attempt < self.config.conflict_retries =>
                {
                    attempt += 1;
                    metrics::counter!("saga_concurrency_retries_total").increment(1);
                    tracing::debug!(%expected, attempt, "lost a concurrent update, reloading");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn replay(transaction: Transaction) -> Created {
    metrics::counter!("saga_idempotent_replays_total").increment(1);
    tracing::info!(
        transaction_id = %transaction.id(),
        status = %transaction.status(),
        "idempotency key replayed"
    );
    Created {
        transaction,
        replayed: true,
    }
}

fn release_held(reservations: &[StockReservation], uow: UnitOfWork) -> UnitOfWork {
    reservations
        .iter()
        .filter(|reservation| reservation.is_held())
        .fold(uow, |uow, reservation| uow.release_reservation(reservation.id))
}

fn commit_held(reservations: &[StockReservation], uow: UnitOfWork) -> UnitOfWork {
    reservations
        .iter()
        .filter(|reservation| reservation.is_held())
        .fold(uow, |uow, reservation| uow.commit_reservation(reservation.id))
}

fn record_cancelled(reason: CancellationReason) {
    metrics::counter!("saga_transactions_cancelled_total", "reason" => reason.as_str())
        .increment(1);
}

fn record_callback_result(outcome: CallbackOutcome) -> CallbackOutcome {
    metrics::counter!("payment_callbacks_total", "result" => outcome.as_str()).increment(1);
    outcome
}
