//! Mapping between quote ids and ticker stream channels

use crate::{constants::STREAM_QUOTE_SUFFIX, types::Quote};
use std::collections::HashMap;

/// Stream channels for the coins the app shows by default
const DEFAULT_CHANNELS: &[(&str, &str)] = &[
    ("bitcoin", "btcusdt"),
    ("ethereum", "ethusdt"),
    ("binancecoin", "bnbusdt"),
    ("ripple", "xrpusdt"),
    ("cardano", "adausdt"),
    ("solana", "solusdt"),
    ("polkadot", "dotusdt"),
    ("dogecoin", "dogeusdt"),
];

/// Read-only map from quote id to stream channel name
///
/// Quotes without an entry are simply not streamed.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    by_id: HashMap<String, String>,
    by_channel: HashMap<String, String>,
}

impl SymbolMap {
    /// Builds a map from `(id, channel)` pairs; channels are matched case-insensitively
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut by_id = HashMap::new();
        let mut by_channel = HashMap::new();
        for (id, channel) in entries {
            let id = id.into();
            let channel = channel.into().to_lowercase();
            by_channel.insert(channel.clone(), id.clone());
            by_id.insert(id, channel);
        }
        Self { by_id, by_channel }
    }

    pub fn channel_for(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    /// Resolves a wire symbol such as `BTCUSDT` back to a quote id
    ///
    /// Unknown symbols fall back to the symbol with the quote-currency suffix
    /// stripped.
    pub fn id_for(&self, wire_symbol: &str) -> String {
        let channel = wire_symbol.to_lowercase();
        if let Some(id) = self.by_channel.get(&channel) {
            return id.clone();
        }
        channel
            .strip_suffix(STREAM_QUOTE_SUFFIX)
            .unwrap_or(&channel)
            .to_string()
    }

    /// Channels for the first `top_n` quotes, skipping unmapped ids
    pub fn stream_symbols(&self, quotes: &[Quote], top_n: usize) -> Vec<String> {
        quotes
            .iter()
            .take(top_n)
            .filter_map(|q| self.channel_for(&q.id))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS.iter().copied())
    }
}
