//! BCV exchange rate
//!
//! The rate is read from a public aggregator first and from the bank's
//! own `Services/BCVRates` endpoint when that fails. Whichever answers is
//! cached for the TTL window; when both fail nothing is cached and the next
//! call retries.

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Clock, TtlCache};

/// Cache key of the current rate
pub const RATE_CACHE_KEY: &str = "bnc_bcv_rate";

/// Timeout for the primary source
pub const PRIMARY_TIMEOUT: Duration = Duration::from_secs(3);

/// Default cache window
pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(600);

/// Where a rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSource {
    #[serde(rename = "pydolarve")]
    Primary,
    #[serde(rename = "bnc")]
    Fallback,
}

/// Bs per USD, as published at `observed_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    #[serde(rename = "Rate", with = "rust_decimal::serde::float")]
    pub value: Decimal,
    /// Source timestamp, verbatim
    #[serde(rename = "Date")]
    pub observed_at: String,
    pub source: RateSource,
}

/// Parse a JSON number or numeric string
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => Decimal::from_str(s.trim().replace(',', ".").as_str()).ok(),
        _ => None,
    }
}

/// A place to read the rate from
#[async_trait]
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when the source is unavailable; failures are logged here
    async fn fetch_rate(&self) -> Option<ExchangeRate>;
}

/// pydolarve.org BCV monitor
#[derive(Debug, Clone)]
pub struct PydolarveProvider {
    client: reqwest::Client,
    url: String,
}

impl PydolarveProvider {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PRIMARY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    /// Pull `monitors.usd.{price,last_update}` out of the body
    pub fn parse(body: &Value) -> Option<ExchangeRate> {
        let usd = &body["monitors"]["usd"];
        let value = decimal_from_json(&usd["price"]).filter(|v| *v > Decimal::ZERO)?;
        let observed_at = match &usd["last_update"] {
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => return None,
        };
        Some(ExchangeRate {
            value,
            observed_at,
            source: RateSource::Primary,
        })
    }
}

#[async_trait]
impl RateProvider for PydolarveProvider {
    fn name(&self) -> &'static str {
        "pydolarve"
    }

    async fn fetch_rate(&self) -> Option<ExchangeRate> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Could not reach pydolarve");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::error!(status = response.status().as_u16(), "pydolarve returned non-success status");
            return None;
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "pydolarve body is not JSON");
                return None;
            }
        };

        let rate = Self::parse(&body);
        if rate.is_none() {
            tracing::error!("pydolarve payload lacks monitors.usd price/last_update");
        }
        rate
    }
}

/// Cached rate with primary/fallback sources
pub struct RateCache {
    cache: TtlCache<ExchangeRate>,
    primary: Arc<dyn RateProvider>,
    fallback: Arc<dyn RateProvider>,
    ttl: Duration,
}

impl RateCache {
    pub fn new(
        primary: Arc<dyn RateProvider>,
        fallback: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache: TtlCache::new(clock),
            primary,
            fallback,
            ttl,
        }
    }

    /// Current rate, or `None` when every source failed
    pub async fn get_rate(&self) -> Option<ExchangeRate> {
        self.cache
            .get_or_fetch(RATE_CACHE_KEY, self.ttl, || self.fetch_uncached())
            .await
    }

    async fn fetch_uncached(&self) -> Option<ExchangeRate> {
        if let Some(rate) = self.primary.fetch_rate().await {
            tracing::debug!(source = self.primary.name(), rate = %rate.value, "BCV rate fetched");
            return Some(rate);
        }

        tracing::warn!(
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            "Primary BCV source failed, trying fallback"
        );
        if let Some(rate) = self.fallback.fetch_rate().await {
            tracing::debug!(source = self.fallback.name(), rate = %rate.value, "BCV rate fetched");
            return Some(rate);
        }

        tracing::error!("All BCV rate sources failed");
        None
    }
}
