//! Environment configuration, read once at startup.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use crate::domain::value_objects::Money;
use crate::notifications::DispatchSettings;
use crate::shipping::{ShippingConfig, ZoneRate};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub nats_subject_prefix: String,
    pub shipping: ShippingConfig,
    pub notifications: DispatchSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reads through `lookup`, so tests never touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let money = |key: &str, default: &str| -> Result<Money> {
            let raw = get(key).unwrap_or_else(|| default.to_string());
            let amount = Decimal::from_str(&raw).with_context(|| format!("{key} must be a decimal amount, got `{raw}`"))?;
            let money = Money::from_decimal(amount).with_context(|| format!("{key} is out of range"))?;
            anyhow::ensure!(!money.is_negative(), "{key} must not be negative");
            Ok(money)
        };
        let parse = |key: &str, default: u64| -> Result<u64> {
            get(key).map_or(Ok(default), |raw| raw.parse().with_context(|| format!("{key} must be a whole number, got `{raw}`")))
        };

        let islands_prefixes: Vec<String> = get("ZONE_ISLANDS_PREFIXES")
            .unwrap_or_else(|| "80,81,82,83,84,85".to_string())
            .split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
        let shipping = ShippingConfig {
            free_shipping_threshold: money("FREE_SHIPPING_THRESHOLD", "35.00")?,
            max_shipping: money("MAX_SHIPPING", "15.00")?,
            cod_fee: money("COD_FEE", "2.00")?,
            zones: vec![
                ZoneRate { name: "mainland".into(), base: money("ZONE_MAINLAND_BASE", "2.50")?, per_item: money("ZONE_MAINLAND_PER_ITEM", "0.90")?, postal_prefixes: vec![] },
                ZoneRate { name: "islands".into(), base: money("ZONE_ISLANDS_BASE", "4.50")?, per_item: money("ZONE_ISLANDS_PER_ITEM", "1.20")?, postal_prefixes: islands_prefixes },
            ],
            default_zone: "mainland".into(),
        };

        let enabled = match get("NOTIFICATIONS_ENABLED").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("true" | "1" | "yes" | "on") => true,
            Some("false" | "0" | "no" | "off") => false,
            Some(other) => anyhow::bail!("NOTIFICATIONS_ENABLED must be true or false, got `{other}`"),
        };
        let max_attempts = u32::try_from(parse("NOTIFY_MAX_ATTEMPTS", 5)?).context("NOTIFY_MAX_ATTEMPTS is too large")?;
        anyhow::ensure!(max_attempts >= 1, "NOTIFY_MAX_ATTEMPTS must be at least 1");
        let poll_interval = Duration::from_secs(parse("NOTIFY_POLL_INTERVAL_SECS", 15)?);
        anyhow::ensure!(!poll_interval.is_zero(), "NOTIFY_POLL_INTERVAL_SECS must be at least 1");
        let notifications = DispatchSettings {
            enabled,
            dedup_window: Duration::from_secs(parse("NOTIFY_DEDUP_WINDOW_SECS", 120)?),
            max_attempts,
            batch_size: usize::try_from(parse("NOTIFY_BATCH_SIZE", 50)?).context("NOTIFY_BATCH_SIZE is too large")?,
            delivery_timeout: Duration::from_millis(parse("NOTIFY_DELIVERY_TIMEOUT_MS", 5000)?),
            poll_interval,
        };

        Ok(Self {
            port: u16::try_from(parse("PORT", 8083)?).context("PORT must fit in 16 bits")?,
            database_url: get("DATABASE_URL"),
            nats_url: get("NATS_URL"),
            nats_subject_prefix: get("NATS_SUBJECT_PREFIX").unwrap_or_else(|| "marketplace.notifications".to_string()),
            shipping,
            notifications,
        })
    }
}
