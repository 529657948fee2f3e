use crate::api::cache::TtlCache;
use crate::error::Result;
use log::{debug, info};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    quote_asset: String,
    status: String,
}

fn tradable_usdt_pairs(info: ExchangeInfo) -> Vec<String> {
    info.symbols
        .into_iter()
        .filter(|s| s.quote_asset == "USDT" && s.status == "TRADING")
        .map(|s| s.symbol)
        .collect()
}

/// Autocomplete over a symbol list: case-insensitive substring match
pub fn search(symbols: &[String], query: &str, limit: usize) -> Vec<String> {
    let query = query.trim().to_uppercase();
    if query.is_empty() {
        return Vec::new();
    }
    symbols
        .iter()
        .filter(|s| s.contains(&query))
        .take(limit)
        .cloned()
        .collect()
}

/// Tradable USDT pairs from Binance `exchangeInfo`, cached for a long interval
#[derive(Clone)]
pub struct CoinDirectory {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<Mutex<TtlCache<Vec<String>>>>,
}

impl CoinDirectory {
    pub fn new(base_url: impl Into<String>, ttl: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: Arc::new(Mutex::new(TtlCache::new(ttl))),
        })
    }

    pub async fn symbols(&self) -> Result<Vec<String>> {
        let mut cache = self.cache.lock().await;
        if let Some(symbols) = cache.get() {
            return Ok(symbols);
        }

        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        debug!("Fetching symbol directory from {}", url);
        let info: ExchangeInfo = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let symbols = tradable_usdt_pairs(info);
        info!("Loaded {} tradable USDT pairs", symbols.len());

        cache.put(symbols.clone());
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_tradable_usdt_pairs() {
        let json = r#"{
            "timezone": "UTC",
            "symbols": [
                {"symbol": "BTCUSDT", "quoteAsset": "USDT", "status": "TRADING", "baseAsset": "BTC"},
                {"symbol": "ETHBTC", "quoteAsset": "BTC", "status": "TRADING"},
                {"symbol": "LUNAUSDT", "quoteAsset": "USDT", "status": "BREAK"},
                {"symbol": "ETHUSDT", "quoteAsset": "USDT", "status": "TRADING"}
            ]
        }"#;
        let info: ExchangeInfo = serde_json::from_str(json).unwrap();
        assert_eq!(tradable_usdt_pairs(info), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_search_limits_matches() {
        let symbols: Vec<String> = ["BTCUSDT", "ETHUSDT", "ETHFIUSDT", "SOLUSDT", "WBTCUSDT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(search(&symbols, "btc", 5), vec!["BTCUSDT", "WBTCUSDT"]);
        assert_eq!(search(&symbols, "usdt", 2), vec!["BTCUSDT", "ETHUSDT"]);
        assert!(search(&symbols, "  ", 5).is_empty());
    }
}
