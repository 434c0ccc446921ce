//! Types for the market data sync pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// One cryptocurrency's latest price and metadata
///
/// Field names follow the CoinGecko `/coins/markets` payload so the same type
/// parses API responses and round-trips through the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Stable identity key (e.g. `bitcoin`)
    pub id: String,

    /// Ticker symbol (e.g. `btc`)
    pub symbol: String,

    /// Display name
    pub name: String,

    /// Price in USD
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_price: f64,

    /// 24h price change percentage
    #[serde(default, deserialize_with = "null_as_default")]
    pub price_change_percentage_24h: f64,

    /// Logo URL
    #[serde(default, deserialize_with = "null_as_default")]
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_volume: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<f64>,

    /// 24h price change in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_change_24h: Option<f64>,

    /// When this record last changed upstream or from a live tick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Quote {
    /// Create a quote with the required fields only
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        name: impl Into<String>,
        current_price: f64,
        price_change_percentage_24h: f64,
        image: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            current_price,
            price_change_percentage_24h,
            image: image.into(),
            market_cap: None,
            total_volume: None,
            high_24h: None,
            low_24h: None,
            price_change_24h: None,
            last_updated: None,
        }
    }

    /// Overwrite this record with a fresher copy of the same quote
    ///
    /// Required fields always take the fresh value; optional fields only when
    /// the fresh record carries one.
    pub fn merge_from(&mut self, fresh: Quote) {
        self.symbol = fresh.symbol;
        self.name = fresh.name;
        self.current_price = fresh.current_price;
        self.price_change_percentage_24h = fresh.price_change_percentage_24h;
        self.image = fresh.image;
        self.market_cap = fresh.market_cap.or(self.market_cap);
        self.total_volume = fresh.total_volume.or(self.total_volume);
        self.high_24h = fresh.high_24h.or(self.high_24h);
        self.low_24h = fresh.low_24h.or(self.low_24h);
        self.price_change_24h = fresh.price_change_24h.or(self.price_change_24h);
        self.last_updated = fresh.last_updated.or(self.last_updated);
    }

    /// Apply a live price tick
    pub fn apply_tick(&mut self, tick: &PriceTick, at: DateTime<Utc>) {
        self.current_price = tick.price;
        self.price_change_percentage_24h = tick.price_change_percentage_24h;
        self.last_updated = Some(at);
    }

    /// Case-insensitive substring match on name or symbol
    ///
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle) || self.symbol.to_lowercase().contains(needle)
    }
}

/// A live price update for one quote, as decoded from the ticker stream
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    /// Internal quote id
    pub id: String,
    pub price: f64,
    pub price_change_percentage_24h: f64,
}

/// State of the live price stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Where a fetch result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fresh from the market data API
    Live,
    /// Unexpired cache entry
    Cache,
    /// Expired cache entry served because nothing fresher was obtainable
    StaleCache,
    /// Built-in demo dataset
    Fallback,
}

impl DataSource {
    /// Banner text for data the user should not mistake for live prices
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            DataSource::Live | DataSource::Cache => None,
            DataSource::StaleCache => {
                Some("Live market data is unavailable; showing previously cached prices")
            }
            DataSource::Fallback => {
                Some("Live market data is unavailable; showing demo prices")
            }
        }
    }
}

/// Merge a freshly fetched list into the current one by id
///
/// The result follows the order of `fresh` (market-cap rank); records already
/// known keep any optional fields the fresh copy lacks.
pub fn merge_quotes(current: &[Quote], fresh: Vec<Quote>) -> Vec<Quote> {
    let mut existing: HashMap<&str, &Quote> =
        current.iter().map(|q| (q.id.as_str(), q)).collect();

    fresh
        .into_iter()
        .map(|item| match existing.remove(item.id.as_str()) {
            Some(prev) => {
                let mut merged = prev.clone();
                merged.merge_from(item);
                merged
            }
            None => item,
        })
        .collect()
}

/// Apply a tick to the matching quote; returns false when the id is unknown
pub fn apply_tick(quotes: &mut [Quote], tick: &PriceTick, at: DateTime<Utc>) -> bool {
    match quotes.iter_mut().find(|q| q.id == tick.id) {
        Some(quote) => {
            quote.apply_tick(tick, at);
            true
        }
        None => false,
    }
}

/// Filter quotes by a search query; an empty query keeps everything
pub fn filter_quotes(quotes: &[Quote], query: &str) -> Vec<Quote> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return quotes.to_vec();
    }
    quotes.iter().filter(|q| q.matches(&needle)).cloned().collect()
}

/// Timestamp of the most recently updated quote
pub fn newest_update(quotes: &[Quote]) -> Option<DateTime<Utc>> {
    quotes.iter().filter_map(|q| q.last_updated).max()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
