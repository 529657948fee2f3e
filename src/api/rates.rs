use crate::api::cache::TtlCache;
use crate::market::format::SUPPORTED_CURRENCIES;
use crate::error::{Result, TickwatchError};
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const BASE_CURRENCY: &str = "USD";

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

/// USD-based conversion rates, cached for about an hour
#[derive(Clone)]
pub struct RateService {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<Mutex<TtlCache<HashMap<String, f64>>>>,
}

impl RateService {
    pub fn new(base_url: impl Into<String>, ttl: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: Arc::new(Mutex::new(TtlCache::new(ttl))),
        })
    }

    /// Multiplier from USD into `code`
    pub async fn rate_for(&self, code: &str) -> Result<f64> {
        let code = checked_code(code)?;
        if code == BASE_CURRENCY {
            return Ok(1.0);
        }
        let rates = self.rates().await?;
        lookup(&rates, &code)
    }

    async fn rates(&self) -> Result<HashMap<String, f64>> {
        let mut cache = self.cache.lock().await;
        if let Some(rates) = cache.get() {
            return Ok(rates);
        }

        let url = format!("{}/latest?from={}", self.base_url, BASE_CURRENCY);
        debug!("Fetching currency rates from {}", url);
        let response: RatesResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!("Loaded {} currency rates", response.rates.len());

        cache.put(response.rates.clone());
        Ok(response.rates)
    }
}

fn checked_code(code: &str) -> Result<String> {
    let code = code.trim().to_uppercase();
    if SUPPORTED_CURRENCIES.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(TickwatchError::UnsupportedCurrency(code))
    }
}

fn lookup(rates: &HashMap<String, f64>, code: &str) -> Result<f64> {
    rates
        .get(code)
        .copied()
        .filter(|r| r.is_finite() && *r > 0.0)
        .ok_or_else(|| TickwatchError::UnsupportedCurrency(code.to_string()))
}
