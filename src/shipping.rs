//! Shipping cost calculator
//!
//! Pure: cart lines + zone + method in, totals out. All amounts are integer cents.

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{checked_sum, Money, Quantity, ShippingMethod, Totals};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneRate {
    pub name: String,
    pub base: Money,
    pub per_item: Money,
    /// Two-digit postal prefixes routed to this zone.
    pub postal_prefixes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingConfig {
    pub free_shipping_threshold: Money,
    pub max_shipping: Money,
    pub cod_fee: Money,
    pub zones: Vec<ZoneRate>,
    /// Zone used when no prefix matches.
    pub default_zone: String,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: Money::from_cents(3500),
            max_shipping: Money::from_cents(1500),
            cod_fee: Money::from_cents(200),
            zones: vec![
                ZoneRate { name: "mainland".into(), base: Money::from_cents(250), per_item: Money::from_cents(90), postal_prefixes: vec![] },
                ZoneRate {
                    name: "islands".into(), base: Money::from_cents(450), per_item: Money::from_cents(120),
                    postal_prefixes: ["80", "81", "82", "83", "84", "85"].map(String::from).to_vec(),
                },
            ],
            default_zone: "mainland".into(),
        }
    }
}

/// One priced line as the calculator sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine { pub price: Money, pub qty: Quantity }

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShippingError {
    #[error("unknown shipping zone `{0}`")]
    UnknownZone(String),
    /// `line` is set when a single line's total overflows.
    #[error("amount does not fit in cents")]
    AmountOutOfRange { line: Option<usize> },
}

#[derive(Clone, Debug)]
pub struct ShippingCalculator {
    config: ShippingConfig,
}

impl ShippingCalculator {
    pub fn new(config: ShippingConfig) -> Self { Self { config } }

    /// Resolves the zone from a postal code's first two digits.
    pub fn zone_for_postal(&self, postal: &str) -> &str {
        let prefix = postal.get(..2).unwrap_or_default();
        self.config.zones.iter()
            .find(|z| z.postal_prefixes.iter().any(|p| p == prefix))
            .map(|z| z.name.as_str())
            .unwrap_or(self.config.default_zone.as_str())
    }

    pub fn quote(&self, lines: &[QuoteLine], zone: &str, method: ShippingMethod, cod_requested: bool) -> Result<Totals, ShippingError> {
        let rate = self.config.zones.iter().find(|z| z.name == zone).ok_or_else(|| ShippingError::UnknownZone(zone.to_string()))?;
        let line_totals = lines.iter().enumerate()
            .map(|(i, l)| l.price.checked_times(l.qty).ok_or(ShippingError::AmountOutOfRange { line: Some(i) }))
            .collect::<Result<Vec<_>, _>>()?;
        let subtotal = checked_sum(line_totals).ok_or(ShippingError::AmountOutOfRange { line: None })?;
        let units: i64 = lines.iter().map(|l| i64::from(l.qty.value())).sum();

        let shipping = if method == ShippingMethod::Pickup || subtotal >= self.config.free_shipping_threshold {
            Money::ZERO
        } else {
            // Saturates: anything past the cap clamps to it.
            let raw = rate.per_item.cents().saturating_mul(units).saturating_add(rate.base.cents());
            Money::from_cents(raw).clamp(Money::ZERO, self.config.max_shipping)
        };
        let cod_fee = if cod_requested { self.config.cod_fee } else { Money::ZERO };
        let tax = self.tax_for(subtotal);

        Totals::new(subtotal, shipping, cod_fee, tax).map_err(|_| ShippingError::AmountOutOfRange { line: None })
    }

    // No tax regime is configured yet; the component is still carried through the totals.
    fn tax_for(&self, _subtotal: Money) -> Money { Money::ZERO }
}
