//! Value Objects for the order engine

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money value object, integer minor units (cents). Single currency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self { Self(cents) }
    pub fn cents(&self) -> i64 { self.0 }

    /// Converts a major-unit decimal (e.g. `12.505`) to cents, rounding half-up once.
    pub fn from_decimal(amount: Decimal) -> Result<Self, MoneyError> {
        let cents = (amount * Decimal::ONE_HUNDRED).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        cents.to_i64().map(Self).ok_or(MoneyError::OutOfRange)
    }

    /// `None` when the product does not fit in `i64` cents.
    pub fn checked_times(&self, qty: Quantity) -> Option<Money> { self.0.checked_mul(i64::from(qty.value())).map(Money) }
    pub fn checked_add(self, rhs: Money) -> Option<Money> { self.0.checked_add(rhs.0).map(Money) }
    pub fn clamp(self, min: Money, max: Money) -> Money { Money(self.0.clamp(min.0, max.0)) }
    pub fn is_negative(&self) -> bool { self.0 < 0 }
}

/// Sums amounts, stopping at the first overflow.
pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
    amounts.into_iter().try_fold(Money::ZERO, Money::checked_add)
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.0.abs() / 100, self.0.abs() % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount does not fit in cents")]
    OutOfRange,
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub const MAX_PER_LINE: u32 = 999;

    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0)) }
    pub fn is_orderable(&self) -> bool { (1..=Self::MAX_PER_LINE).contains(&self.0) }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Order totals snapshot. Immutable once the order exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    #[serde(rename = "subtotalCents")] pub subtotal: Money,
    #[serde(rename = "shippingCents")] pub shipping: Money,
    #[serde(rename = "codFeeCents")] pub cod_fee: Money,
    #[serde(rename = "taxCents")] pub tax: Money,
    #[serde(rename = "grandTotalCents")] pub grand_total: Money,
}

impl Totals {
    pub fn new(subtotal: Money, shipping: Money, cod_fee: Money, tax: Money) -> Result<Self, MoneyError> {
        let grand_total = checked_sum([subtotal, shipping, cod_fee, tax]).ok_or(MoneyError::OutOfRange)?;
        Ok(Self { subtotal, shipping, cod_fee, tax, grand_total })
    }
    pub fn is_consistent(&self) -> bool {
        checked_sum([self.subtotal, self.shipping, self.cod_fee, self.tax]) == Some(self.grand_total)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingMethod { Courier, CourierCod, Pickup }

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Courier => "COURIER", Self::CourierCod => "COURIER_COD", Self::Pickup => "PICKUP" }
    }
    pub fn implies_cod(&self) -> bool { matches!(self, Self::CourierCod) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod { Card, Cod }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str { match self { Self::Card => "CARD", Self::Cod => "COD" } }
}

impl std::str::FromStr for ShippingMethod {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COURIER" => Ok(Self::Courier), "COURIER_COD" => Ok(Self::CourierCod), "PICKUP" => Ok(Self::Pickup),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "CARD" => Ok(Self::Card), "COD" => Ok(Self::Cod), other => Err(UnknownVariant(other.to_string())) }
    }
}

/// Raised when a persisted enum column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant `{0}`")]
pub struct UnknownVariant(pub String);
