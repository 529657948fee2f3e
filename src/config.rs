//! Runtime configuration
//!
//! Defaults point at the public Binance and Frankfurter endpoints. Every
//! field can be overridden from the environment (see [`Config::from_env`]).
use log::warn;
use std::time::Duration;

pub const DEFAULT_WS_URL: &str = "wss://stream.binance.com:443";
pub const DEFAULT_REST_URL: &str = "https://api.binance.com";
pub const DEFAULT_RATES_URL: &str = "https://api.frankfurter.app";
pub const DEFAULT_WATCHLIST: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];
pub const DEFAULT_SERIES_WINDOW: usize = 50;

/// Exponential backoff applied by a connection after it drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base of the combined ticker stream, without the `/stream` path
    pub ws_url: String,
    /// Binance REST base, used for the tradable symbol directory
    pub rest_url: String,
    /// Currency rate service base
    pub rates_url: String,
    /// Initial watchlist, in display order
    pub watchlist: Vec<String>,
    /// Number of samples kept by the chart buffer
    pub series_window: usize,
    /// Whether alerts may raise a desktop-style notification
    pub notifications_enabled: bool,
    /// `None` leaves a dropped feed stale until the watchlist changes
    pub reconnect_delay: Option<Duration>,
    pub max_reconnect_delay: Duration,
    /// Buffer for UI commands flowing into the app task
    pub channel_buffer_size: usize,
    pub directory_ttl: Duration,
    pub rates_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            rates_url: DEFAULT_RATES_URL.to_string(),
            watchlist: DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect(),
            series_window: DEFAULT_SERIES_WINDOW,
            notifications_enabled: true,
            reconnect_delay: Some(Duration::from_secs(2)),
            max_reconnect_delay: Duration::from_secs(30),
            channel_buffer_size: 100,
            directory_ttl: Duration::from_secs(60 * 60 * 24),
            rates_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    /// Defaults, overridden by any `TICKWATCH_*` variables that are set
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("TICKWATCH_WS_URL") {
            config.ws_url = url;
        }
        if let Some(url) = lookup("TICKWATCH_REST_URL") {
            config.rest_url = url;
        }
        if let Some(url) = lookup("TICKWATCH_RATES_URL") {
            config.rates_url = url;
        }
        if let Some(list) = lookup("TICKWATCH_WATCHLIST") {
            config.watchlist = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(window) = lookup("TICKWATCH_SERIES_WINDOW") {
            match window.parse::<usize>() {
                Ok(n) if n > 0 => config.series_window = n,
                _ => warn!("Ignoring invalid TICKWATCH_SERIES_WINDOW '{}'", window),
            }
        }
        if let Some(flag) = lookup("TICKWATCH_NOTIFY") {
            config.notifications_enabled = !matches!(flag.trim(), "0" | "false" | "off");
        }
        if let Some(secs) = lookup("TICKWATCH_RECONNECT_SECS") {
            match secs.parse::<u64>() {
                Ok(0) => config.reconnect_delay = None,
                Ok(n) => config.reconnect_delay = Some(Duration::from_secs(n)),
                Err(_) => warn!("Ignoring invalid TICKWATCH_RECONNECT_SECS '{}'", secs),
            }
        }

        config
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_watchlist<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watchlist = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_series_window(mut self, window: usize) -> Self {
        self.series_window = window;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        self.reconnect_delay
            .map(|delay| ReconnectPolicy::new(delay, self.max_reconnect_delay))
    }
}
