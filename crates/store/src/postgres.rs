use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    CallbackId, EventId, GatewayReference, IdempotencyKey, Money, ReservationId, TransactionId,
    Version,
};
use domain::{
    LineItem, PaymentCallback, PendingCallback, ReservationStatus, StockKey, StockLevel,
    StockReservation, Transaction, TransactionRecord,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OutboxEvent, Result, StoreError, UnitOfWork,
    store::{OutboxStore, StockLedger, TransactionStore, record_reservation_outcome},
    unit_of_work::{Settlement, TransactionWrite},
};

const TRANSACTION_COLUMNS: &str = "id, idempotency_key, line_items, status, cancellation_reason, \
     total_cents, gateway_reference, payment_deadline, created_at, updated_at, version";

const RESERVATION_COLUMNS: &str = "id, transaction_id, warehouse_id, product_id, quantity, status, \
     expires_at, created_at, updated_at";

const OUTBOX_COLUMNS: &str = "sequence, id, aggregate_type, aggregate_id, event_type, dedup_key, \
     payload, created_at, published_at";

/// PostgreSQL-backed store implementation.
///
/// Stock checks are a single conditional `UPDATE` per pair, so the row lock
/// taken by that statement is what serializes concurrent reservations.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_transaction(row: PgRow) -> Result<Transaction> {
        let line_items: Vec<LineItem> = serde_json::from_value(row.try_get("line_items")?)?;
        let status: String = row.try_get("status")?;
        let reason: Option<String> = row.try_get("cancellation_reason")?;

        Ok(TransactionRecord {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            idempotency_key: IdempotencyKey::new(row.try_get::<String, _>("idempotency_key")?),
            line_items,
            status: status.parse()?,
            cancellation_reason: reason.map(|r| r.parse()).transpose()?,
            total_amount: Money::from_cents(row.try_get("total_cents")?),
            gateway_reference: row
                .try_get::<Option<String>, _>("gateway_reference")?
                .map(GatewayReference::new),
            payment_deadline: row.try_get("payment_deadline")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: Version::new(row.try_get("version")?),
        }
        .into())
    }

    fn row_to_reservation(row: PgRow) -> Result<StockReservation> {
        let status: String = row.try_get("status")?;
        let quantity: i32 = row.try_get("quantity")?;

        Ok(StockReservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            transaction_id: TransactionId::from_uuid(row.try_get::<Uuid, _>("transaction_id")?),
            warehouse_id: row.try_get::<String, _>("warehouse_id")?.into(),
            product_id: row.try_get::<String, _>("product_id")?.into(),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::CorruptRow(format!("negative quantity {quantity}")))?,
            status: status.parse()?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_level(row: PgRow) -> Result<StockLevel> {
        Ok(StockLevel {
            warehouse_id: row.try_get::<String, _>("warehouse_id")?.into(),
            product_id: row.try_get::<String, _>("product_id")?.into(),
            total: to_u64(row.try_get("total")?)?,
            reserved: to_u64(row.try_get("reserved")?)?,
            committed: to_u64(row.try_get("committed")?)?,
        })
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        Ok(OutboxEvent {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sequence: row.try_get("sequence")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            dedup_key: row.try_get("dedup_key")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
        })
    }

    fn row_to_callback(row: PgRow) -> Result<PaymentCallback> {
        let outcome: String = row.try_get("outcome")?;
        Ok(PaymentCallback {
            callback_id: CallbackId::new(row.try_get::<String, _>("callback_id")?),
            transaction_id: TransactionId::from_uuid(row.try_get::<Uuid, _>("transaction_id")?),
            outcome: outcome.parse()?,
            received_at: row.try_get("received_at")?,
        })
    }

    fn row_to_pending_callback(row: PgRow) -> Result<PendingCallback> {
        let outcome: String = row.try_get("outcome")?;
        Ok(PendingCallback {
            callback_id: CallbackId::new(row.try_get::<String, _>("callback_id")?),
            gateway_reference: GatewayReference::new(row.try_get::<String, _>("gateway_reference")?),
            outcome: outcome.parse()?,
            received_at: row.try_get("received_at")?,
        })
    }

    async fn write_transaction(conn: &mut PgConnection, write: &TransactionWrite) -> Result<Version> {
        let tx = write.transaction();

        match write {
            TransactionWrite::Insert(_) => {
                let line_items = serde_json::to_value(tx.line_items())?;
                sqlx::query(&format!(
                    "INSERT INTO transactions ({TRANSACTION_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
                ))
                .bind(tx.id().as_uuid())
                .bind(tx.idempotency_key().as_str())
                .bind(line_items)
                .bind(tx.status().as_str())
                .bind(tx.cancellation_reason().map(|r| r.as_str()))
                .bind(tx.total_amount().cents())
                .bind(tx.gateway_reference().map(|r| r.as_str()))
                .bind(tx.payment_deadline())
                .bind(tx.created_at())
                .bind(tx.updated_at())
                .bind(Version::first().as_i64())
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    // Check if this is a unique constraint violation
                    if let sqlx::Error::Database(ref db_err) = e {
                        match db_err.constraint() {
                            Some("unique_idempotency_key") => {
                                return StoreError::DuplicateIdempotencyKey(
                                    tx.idempotency_key().clone(),
                                );
                            }
                            Some("transactions_pkey") => {
                                return StoreError::ConcurrencyConflict {
                                    transaction_id: tx.id(),
                                    expected: Version::initial(),
                                };
                            }
                            _ => {}
                        }
                    }
                    StoreError::Database(e)
                })?;
                Ok(Version::first())
            }
            TransactionWrite::Update(_) => {
                let expected = tx.version();
                let result = sqlx::query(
                    r#"
                    UPDATE transactions
                    SET status = $3, cancellation_reason = $4, gateway_reference = $5,
                        updated_at = $6, version = version + 1
                    WHERE id = $1 AND version = $2
                    "#,
                )
                .bind(tx.id().as_uuid())
                .bind(expected.as_i64())
                .bind(tx.status().as_str())
                .bind(tx.cancellation_reason().map(|r| r.as_str()))
                .bind(tx.gateway_reference().map(|r| r.as_str()))
                .bind(tx.updated_at())
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    let exists: bool =
                        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM transactions WHERE id = $1)")
                            .bind(tx.id().as_uuid())
                            .fetch_one(&mut *conn)
                            .await?;
                    return Err(if exists {
                        StoreError::ConcurrencyConflict {
                            transaction_id: tx.id(),
                            expected,
                        }
                    } else {
                        StoreError::TransactionNotFound(tx.id())
                    });
                }
                Ok(expected.next())
            }
        }
    }

    async fn reserve_stock(conn: &mut PgConnection, demand: &BTreeMap<StockKey, u64>) -> Result<()> {
        // Key order keeps row locks acquired in the same order across units.
        for (key, requested) in demand {
            let quantity = to_i64(*requested)?;
            let result = sqlx::query(
                r#"
                UPDATE stock_levels
                SET reserved = reserved + $3
                WHERE warehouse_id = $1 AND product_id = $2
                  AND total - reserved - committed >= $3
                "#,
            )
            .bind(key.warehouse_id.as_str())
            .bind(key.product_id.as_str())
            .bind(quantity)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                let available: Option<i64> = sqlx::query_scalar(
                    "SELECT total - reserved - committed FROM stock_levels \
                     WHERE warehouse_id = $1 AND product_id = $2",
                )
                .bind(key.warehouse_id.as_str())
                .bind(key.product_id.as_str())
                .fetch_optional(&mut *conn)
                .await?;

                return Err(StoreError::InsufficientStock {
                    warehouse_id: key.warehouse_id.clone(),
                    product_id: key.product_id.clone(),
                    requested: *requested,
                    available: available.map(to_u64).transpose()?.unwrap_or(0),
                });
            }
        }
        Ok(())
    }

    async fn insert_reservation(conn: &mut PgConnection, reservation: &StockReservation) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO stock_reservations ({RESERVATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(reservation.id.as_uuid())
        .bind(reservation.transaction_id.as_uuid())
        .bind(reservation.warehouse_id.as_str())
        .bind(reservation.product_id.as_str())
        .bind(i32::try_from(reservation.quantity).map_err(|_| {
            StoreError::CorruptRow(format!("quantity out of range {}", reservation.quantity))
        })?)
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Locks the stock rows behind a unit's settlements in key order, the same
    /// order [`Self::reserve_stock`] uses.
    async fn lock_settled_levels(conn: &mut PgConnection, settlements: &[Settlement]) -> Result<()> {
        if settlements.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = settlements
            .iter()
            .map(|settlement| settlement.reservation_id.as_uuid())
            .collect();
        sqlx::query(
            r#"
            SELECT l.warehouse_id, l.product_id
            FROM stock_levels l
            WHERE (l.warehouse_id, l.product_id) IN (
                SELECT r.warehouse_id, r.product_id
                FROM stock_reservations r
                WHERE r.id = ANY($1)
            )
            ORDER BY l.warehouse_id, l.product_id
            FOR UPDATE OF l
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;
        Ok(())
    }

    async fn settle(conn: &mut PgConnection, settlement: &Settlement, now: DateTime<Utc>) -> Result<()> {
        let row = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = $2, updated_at = $3
            WHERE id = $1 AND status = 'HELD'
            RETURNING warehouse_id, product_id, quantity
            "#,
        )
        .bind(settlement.reservation_id.as_uuid())
        .bind(settlement.status.as_str())
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM stock_reservations WHERE id = $1)")
                    .bind(settlement.reservation_id.as_uuid())
                    .fetch_one(&mut *conn)
                    .await?;
            // Already terminal: nothing to do.
            return if exists {
                Ok(())
            } else {
                Err(StoreError::ReservationNotFound(settlement.reservation_id))
            };
        };

        let warehouse_id: String = row.try_get("warehouse_id")?;
        let product_id: String = row.try_get("product_id")?;
        let quantity: i32 = row.try_get("quantity")?;

        let sql = match settlement.status {
            ReservationStatus::Committed => {
                "UPDATE stock_levels SET reserved = reserved - $3, committed = committed + $3 \
                 WHERE warehouse_id = $1 AND product_id = $2"
            }
            ReservationStatus::Released | ReservationStatus::Held => {
                "UPDATE stock_levels SET reserved = reserved - $3 \
                 WHERE warehouse_id = $1 AND product_id = $2"
            }
        };
        sqlx::query(sql)
            .bind(warehouse_id)
            .bind(product_id)
            .bind(i64::from(quantity))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn insert_event(conn: &mut PgConnection, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type, dedup_key, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.dedup_key)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn insert_callback(conn: &mut PgConnection, callback: &PaymentCallback) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_callbacks (callback_id, transaction_id, outcome, received_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (callback_id) DO NOTHING
            "#,
        )
        .bind(callback.callback_id.as_str())
        .bind(callback.transaction_id.as_uuid())
        .bind(callback.outcome.as_str())
        .bind(callback.received_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateCallback(callback.callback_id.clone()));
        }

        sqlx::query("DELETE FROM pending_callbacks WHERE callback_id = $1")
            .bind(callback.callback_id.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::CorruptRow(format!("negative counter {value}")))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::CorruptRow(format!("counter overflow {value}")))
}

#[async_trait]
impl StockLedger for PostgresStore {
    async fn receive_stock(&self, key: &StockKey, quantity: u64) -> Result<StockLevel> {
        let row = sqlx::query(
            r#"
            INSERT INTO stock_levels (warehouse_id, product_id, total)
            VALUES ($1, $2, $3)
            ON CONFLICT (warehouse_id, product_id)
            DO UPDATE SET total = stock_levels.total + EXCLUDED.total
            RETURNING warehouse_id, product_id, total, reserved, committed
            "#,
        )
        .bind(key.warehouse_id.as_str())
        .bind(key.product_id.as_str())
        .bind(to_i64(quantity)?)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_level(row)
    }

    async fn stock_level(&self, key: &StockKey) -> Result<Option<StockLevel>> {
        let row = sqlx::query(
            r#"
            SELECT warehouse_id, product_id, total, reserved, committed
            FROM stock_levels
            WHERE warehouse_id = $1 AND product_id = $2
            "#,
        )
        .bind(key.warehouse_id.as_str())
        .bind(key.product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_level).transpose()
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<StockReservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn reservations_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StockReservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE transaction_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(transaction_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StockReservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE status = 'HELD' AND expires_at <= $1 \
             ORDER BY expires_at ASC, id ASC LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE published_at IS NULL ORDER BY sequence ASC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_published(&self, id: EventId, published_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET published_at = $2 WHERE id = $1 AND published_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(published_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for_aggregate(&self, aggregate_id: Uuid) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE aggregate_id = $1 ORDER BY sequence ASC"
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn unpublished_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        to_u64(count)
    }
}

#[async_trait]
impl TransactionStore for PostgresStore {
    #[tracing::instrument(skip(self, uow))]
    async fn commit(&self, uow: UnitOfWork) -> Result<Option<Version>> {
        if uow.is_empty() {
            return Ok(None);
        }

        let demand = uow.demand();
        let reservation_count = uow.reservations().len();

        // Start a transaction; dropping it on any error rolls everything back.
        let mut tx = self.pool.begin().await?;

        let version = match uow.transaction() {
            Some(write) => Some(Self::write_transaction(&mut tx, write).await?),
            None => None,
        };

        if let Err(err) = Self::reserve_stock(&mut tx, &demand).await {
            record_reservation_outcome(reservation_count, &Err(&err));
            return Err(err);
        }

        for reservation in uow.reservations() {
            Self::insert_reservation(&mut tx, reservation).await?;
        }

        let now = Utc::now();
        Self::lock_settled_levels(&mut tx, uow.settlements()).await?;
        for settlement in uow.settlements() {
            Self::settle(&mut tx, settlement, now).await?;
        }

        for event in uow.outbox() {
            Self::insert_event(&mut tx, event).await?;
        }

        if let Some(callback) = uow.callback() {
            Self::insert_callback(&mut tx, callback).await?;
        }

        tx.commit().await?;
        record_reservation_outcome(reservation_count, &Ok(()));
        Ok(version)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &GatewayReference,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE gateway_reference = $1"
        ))
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn find_callback(&self, id: &CallbackId) -> Result<Option<PaymentCallback>> {
        let row = sqlx::query(
            "SELECT callback_id, transaction_id, outcome, received_at \
             FROM payment_callbacks WHERE callback_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_callback).transpose()
    }

    async fn save_pending_callback(&self, callback: PendingCallback) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_callbacks (callback_id, gateway_reference, outcome, received_at)
            SELECT $1::text, $2::text, $3::text, $4::timestamptz
            WHERE NOT EXISTS (SELECT 1 FROM payment_callbacks WHERE callback_id = $1::text)
            ON CONFLICT (callback_id) DO NOTHING
            "#,
        )
        .bind(callback.callback_id.as_str())
        .bind(callback.gateway_reference.as_str())
        .bind(callback.outcome.as_str())
        .bind(callback.received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_callbacks_for(
        &self,
        reference: &GatewayReference,
    ) -> Result<Vec<PendingCallback>> {
        let rows = sqlx::query(
            "SELECT callback_id, gateway_reference, outcome, received_at \
             FROM pending_callbacks WHERE gateway_reference = $1 \
             ORDER BY received_at ASC, callback_id ASC",
        )
        .bind(reference.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_pending_callback).collect()
    }

    async fn resolvable_pending_callbacks(&self, limit: usize) -> Result<Vec<PendingCallback>> {
        let rows = sqlx::query(
            r#"
            SELECT p.callback_id, p.gateway_reference, p.outcome, p.received_at
            FROM pending_callbacks p
            JOIN transactions t ON t.gateway_reference = p.gateway_reference
            ORDER BY p.received_at ASC, p.callback_id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_pending_callback).collect()
    }

    async fn discard_pending_callback(&self, id: &CallbackId) -> Result<()> {
        sqlx::query("DELETE FROM pending_callbacks WHERE callback_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
