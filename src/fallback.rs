//! Demo market listing served when neither the API nor the cache can answer

use crate::types::Quote;

/// `(id, symbol, name, price, 24h change %, image)`
const DEMO_MARKETS: &[(&str, &str, &str, f64, f64, &str)] = &[
    ("bitcoin", "btc", "Bitcoin", 64250.12, 1.84, "https://assets.coingecko.com/coins/images/1/large/bitcoin.png"),
    ("ethereum", "eth", "Ethereum", 3125.47, 2.31, "https://assets.coingecko.com/coins/images/279/large/ethereum.png"),
    ("tether", "usdt", "Tether", 1.0, 0.01, "https://assets.coingecko.com/coins/images/325/large/Tether.png"),
    ("binancecoin", "bnb", "BNB", 582.36, -0.72, "https://assets.coingecko.com/coins/images/825/large/bnb-icon2_2x.png"),
    ("solana", "sol", "Solana", 148.91, 4.12, "https://assets.coingecko.com/coins/images/4128/large/solana.png"),
    ("usd-coin", "usdc", "USDC", 1.0, -0.02, "https://assets.coingecko.com/coins/images/6319/large/usdc.png"),
    ("ripple", "xrp", "XRP", 0.5234, -1.05, "https://assets.coingecko.com/coins/images/44/large/xrp-symbol-white-128.png"),
    ("dogecoin", "doge", "Dogecoin", 0.1582, 3.47, "https://assets.coingecko.com/coins/images/5/large/dogecoin.png"),
    ("cardano", "ada", "Cardano", 0.4471, -0.38, "https://assets.coingecko.com/coins/images/975/large/cardano.png"),
    ("polkadot", "dot", "Polkadot", 6.93, 0.87, "https://assets.coingecko.com/coins/images/12171/large/polkadot.png"),
];

/// The fixed demo dataset, in market-cap order
pub fn demo_quotes() -> Vec<Quote> {
    DEMO_MARKETS
        .iter()
        .map(|&(id, symbol, name, price, change, image)| {
            Quote::new(id, symbol, name, price, change, image)
        })
        .collect()
}
