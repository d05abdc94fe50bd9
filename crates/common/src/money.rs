use serde::{Deserialize, Serialize};

/// An amount in minor currency units (cents).
///
/// Serialized as a bare integer so it can travel as `unitPriceCents` or
/// `amountCents`. Arithmetic is checked: an overflowing total is `None`,
/// never a clamped amount.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Price of `quantity` units at this unit price, or None on overflow.
    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_total() {
        let total = Money::from_cents(1000)
            .checked_multiply(2)
            .and_then(|lines| lines.checked_add(Money::from_cents(250)))
            .unwrap();
        assert_eq!(total, Money::from_cents(2250));
        assert!(total.is_positive());
        assert!(!Money::zero().is_positive());
    }

    #[test]
    fn test_display_in_major_units() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_overflow_is_none() {
        let half = Money::from_cents(i64::MAX / 2);
        assert_eq!(half.checked_multiply(3), None);
        assert_eq!(
            half.checked_multiply(2),
            Some(Money::from_cents(i64::MAX - 1))
        );
        assert_eq!(
            Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)),
            None
        );
    }

    #[test]
    fn test_serializes_as_bare_cents() {
        assert_eq!(serde_json::to_string(&Money::from_cents(999)).unwrap(), "999");
        let parsed: Money = serde_json::from_str("1500").unwrap();
        assert_eq!(parsed.cents(), 1500);
    }
}
