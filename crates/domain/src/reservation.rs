//! Stock levels and per-transaction reservations.

use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId, TransactionId, WarehouseId};
use serde::{Deserialize, Serialize};

use crate::transaction::UnknownVariant;

/// A (warehouse, product) pair identifying one stock level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
}

impl StockKey {
    pub fn new(warehouse_id: impl Into<WarehouseId>, product_id: impl Into<ProductId>) -> Self {
        Self {
            warehouse_id: warehouse_id.into(),
            product_id: product_id.into(),
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.warehouse_id, self.product_id)
    }
}

/// Quantities tracked for one (warehouse, product) pair.
///
/// `reserved + committed <= total` holds after every operation. Callers check
/// [`StockLevel::available`] (or use [`StockLevel::try_reserve`]) before
/// moving stock around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    /// Units physically received.
    pub total: u64,
    /// Units held by live reservations.
    pub reserved: u64,
    /// Units sold.
    pub committed: u64,
}

impl StockLevel {
    /// An empty level for `key`.
    pub fn empty(key: &StockKey) -> Self {
        Self {
            warehouse_id: key.warehouse_id.clone(),
            product_id: key.product_id.clone(),
            total: 0,
            reserved: 0,
            committed: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.warehouse_id.clone(), self.product_id.clone())
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> u64 {
        self.total
            .saturating_sub(self.reserved)
            .saturating_sub(self.committed)
    }

    /// Holds `quantity` units if enough are available.
    pub fn try_reserve(&mut self, quantity: u64) -> bool {
        if quantity > self.available() {
            return false;
        }
        self.reserved += quantity;
        true
    }

    /// Moves `quantity` held units to committed.
    pub fn commit(&mut self, quantity: u64) {
        let moved = quantity.min(self.reserved);
        self.reserved -= moved;
        self.committed += moved;
    }

    /// Returns `quantity` held units to available.
    pub fn release(&mut self, quantity: u64) {
        self.reserved = self.reserved.saturating_sub(quantity);
    }

    /// Adds newly received units.
    pub fn receive(&mut self, quantity: u64) {
        self.total += quantity;
    }
}

/// Lifecycle of a reservation. `Committed` and `Released` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Held,
    Committed,
    Released,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Held)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "HELD",
            ReservationStatus::Committed => "COMMITTED",
            ReservationStatus::Released => "RELEASED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HELD" => Ok(ReservationStatus::Held),
            "COMMITTED" => Ok(ReservationStatus::Committed),
            "RELEASED" => Ok(ReservationStatus::Released),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A quantity of one product held at one warehouse on behalf of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservation {
    pub id: ReservationId,
    pub transaction_id: TransactionId,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockReservation {
    /// A new `Held` reservation.
    pub fn hold(
        transaction_id: TransactionId,
        key: StockKey,
        quantity: u32,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            transaction_id,
            warehouse_id: key.warehouse_id,
            product_id: key.product_id,
            quantity,
            status: ReservationStatus::Held,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.warehouse_id.clone(), self.product_id.clone())
    }

    pub fn is_held(&self) -> bool {
        self.status == ReservationStatus::Held
    }

    /// True once the hold has outlived its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_held() && now >= self.expires_at
    }
}
