use common::{Money, ProductId, WarehouseId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::reservation::StockKey;

/// One product at one warehouse requested by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// The warehouse the product ships from.
    pub warehouse_id: WarehouseId,

    /// Quantity requested.
    pub quantity: u32,

    /// Price per unit in cents.
    #[serde(rename = "unitPriceCents")]
    pub unit_price: Money,
}

impl LineItem {
    /// Largest quantity a single line may request.
    pub const MAX_QUANTITY: u32 = i32::MAX as u32;

    /// Creates a new line item.
    pub fn new(
        product_id: impl Into<ProductId>,
        warehouse_id: impl Into<WarehouseId>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            warehouse_id: warehouse_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the (warehouse, product) pair this item draws stock from.
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.warehouse_id.clone(), self.product_id.clone())
    }

    /// Returns the total price for this item (quantity * unit_price), or
    /// None if it overflows.
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }

    /// Checks quantity, price and identifiers.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.product_id.is_blank() || self.warehouse_id.is_blank() {
            return Err(DomainError::BlankIdentifier {
                field: "productId/warehouseId",
            });
        }
        if self.quantity == 0 || self.quantity > Self::MAX_QUANTITY {
            return Err(DomainError::InvalidQuantity {
                quantity: self.quantity,
            });
        }
        if !self.unit_price.is_positive() {
            return Err(DomainError::InvalidPrice {
                price: self.unit_price.cents(),
            });
        }
        if self.total_price().is_none() {
            return Err(DomainError::AmountOverflow);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_price() {
        let item = LineItem::new("SKU-001", "WH-1", 3, Money::from_cents(1000));
        assert_eq!(item.total_price(), Some(Money::from_cents(3000)));
    }

    #[test]
    fn test_validate_rejects_quantity_beyond_storable_range() {
        let at_limit = LineItem::new("SKU-001", "WH-1", LineItem::MAX_QUANTITY, Money::from_cents(1));
        assert!(at_limit.validate().is_ok());

        let beyond = LineItem::new(
            "SKU-001",
            "WH-1",
            LineItem::MAX_QUANTITY + 1,
            Money::from_cents(1),
        );
        assert!(matches!(
            beyond.validate(),
            Err(DomainError::InvalidQuantity { quantity }) if quantity == LineItem::MAX_QUANTITY + 1
        ));
    }

    #[test]
    fn test_validate_rejects_overflowing_line_total() {
        let item = LineItem::new("SKU-001", "WH-1", 3, Money::from_cents(i64::MAX / 2));
        assert_eq!(item.total_price(), None);
        assert_eq!(item.validate(), Err(DomainError::AmountOverflow));
    }

    #[test]
    fn test_validate_rejects_zero_quantity_and_price() {
        let zero_qty = LineItem::new("SKU-001", "WH-1", 0, Money::from_cents(1000));
        assert!(matches!(
            zero_qty.validate(),
            Err(DomainError::InvalidQuantity { quantity: 0 })
        ));

        let free = LineItem::new("SKU-001", "WH-1", 1, Money::zero());
        assert!(matches!(
            free.validate(),
            Err(DomainError::InvalidPrice { price: 0 })
        ));

        let blank = LineItem::new("", "WH-1", 1, Money::from_cents(1));
        assert!(matches!(
            blank.validate(),
            Err(DomainError::BlankIdentifier { .. })
        ));
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let item = LineItem::new("SKU-001", "WH-1", 2, Money::from_cents(999));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "productId": "SKU-001",
                "warehouseId": "WH-1",
                "quantity": 2,
                "unitPriceCents": 999
            })
        );
    }
}
