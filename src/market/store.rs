//! Ticker store: the single owned state container for market data and
//! user selections.
//!
//! Mutations are synchronous and never fail. Each one that actually changes
//! state publishes a [`StoreEvent`] to every subscriber observing that slice.
//! Subscribers unsubscribe by dropping their [`Subscription`].

use log::debug;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Latest normalized snapshot for one symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerData {
    pub symbol: String,
    /// Last price, two decimals
    pub price: String,
    /// 24h change percent, two decimals
    pub change_percent: String,
}

/// The one armed alert
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    pub symbol: String,
    pub target_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyConversion {
    pub code: String,
    pub rate: f64,
}

impl Default for CurrencyConversion {
    fn default() -> Self {
        Self {
            code: "USD".to_string(),
            rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    Tickers,
    Selection,
    Watchlist,
    Alert,
    Currency,
}

impl Slice {
    pub const ALL: [Slice; 5] = [
        Slice::Tickers,
        Slice::Selection,
        Slice::Watchlist,
        Slice::Alert,
        Slice::Currency,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    TickerUpdated(String),
    SelectionChanged(Option<String>),
    WatchlistChanged(Vec<String>),
    AlertChanged(Option<AlertConfig>),
    CurrencyChanged(CurrencyConversion),
}

impl StoreEvent {
    pub fn slice(&self) -> Slice {
        match self {
            StoreEvent::TickerUpdated(_) => Slice::Tickers,
            StoreEvent::SelectionChanged(_) => Slice::Selection,
            StoreEvent::WatchlistChanged(_) => Slice::Watchlist,
            StoreEvent::AlertChanged(_) => Slice::Alert,
            StoreEvent::CurrencyChanged(_) => Slice::Currency,
        }
    }
}

/// Receiving end of a store subscription
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl Subscription {
    /// Next pending event, without waiting
    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    /// Drain everything published so far
    pub fn drain(&mut self) -> Vec<StoreEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

#[derive(Debug)]
struct Listener {
    slices: Vec<Slice>,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Debug, Default)]
pub struct TickerStore {
    tickers: HashMap<String, TickerData>,
    selected_symbol: Option<String>,
    watchlist: Vec<String>,
    alert: Option<AlertConfig>,
    currency: CurrencyConversion,
    listeners: Vec<Listener>,
}

fn normalize_symbol(symbol: &str) -> Option<String> {
    let symbol = symbol.trim().to_uppercase();
    (!symbol.is_empty()).then_some(symbol)
}

impl TickerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a watchlist; the first entry becomes the selection
    pub fn with_watchlist<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut store = Self::new();
        for symbol in symbols {
            store.add_to_watchlist(symbol.as_ref());
        }
        store.selected_symbol = store.watchlist.first().cloned();
        store
    }

    pub fn subscribe(&mut self, slices: &[Slice]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(Listener {
            slices: slices.to_vec(),
            tx,
        });
        Subscription { rx }
    }

    fn publish(&mut self, event: StoreEvent) {
        let slice = event.slice();
        self.listeners.retain(|listener| {
            if !listener.slices.contains(&slice) {
                return !listener.tx.is_closed();
            }
            listener.tx.send(event.clone()).is_ok()
        });
    }

    pub fn set_ticker(&mut self, symbol: &str, data: TickerData) {
        self.tickers.insert(symbol.to_string(), data);
        self.publish(StoreEvent::TickerUpdated(symbol.to_string()));
    }

    /// Empty input clears the selection; symbols outside the watchlist are ignored
    pub fn set_selected_symbol(&mut self, symbol: &str) {
        let next = match normalize_symbol(symbol) {
            None => None,
            Some(symbol) if self.watchlist.contains(&symbol) => Some(symbol),
            Some(symbol) => {
                debug!("Ignoring selection of {} (not in watchlist)", symbol);
                return;
            }
        };
        self.replace_selection(next);
    }

    fn replace_selection(&mut self, next: Option<String>) {
        if self.selected_symbol != next {
            self.selected_symbol = next.clone();
            self.publish(StoreEvent::SelectionChanged(next));
        }
    }

    /// `Some(price)` arms the single alert slot, `None` disarms it.
    /// A price that is not a finite positive number also disarms.
    pub fn set_alert(&mut self, symbol: &str, price: Option<f64>) {
        let next = price
            .filter(|p| p.is_finite() && *p > 0.0)
            .map(|target_price| AlertConfig {
                symbol: symbol.to_string(),
                target_price,
            });
        if self.alert != next {
            self.alert = next.clone();
            self.publish(StoreEvent::AlertChanged(next));
        }
    }

    pub fn add_to_watchlist(&mut self, symbol: &str) {
        let Some(symbol) = normalize_symbol(symbol) else {
            return;
        };
        if self.watchlist.contains(&symbol) {
            return;
        }
        self.watchlist.push(symbol);
        self.publish(StoreEvent::WatchlistChanged(self.watchlist.clone()));
    }

    pub fn remove_from_watchlist(&mut self, symbol: &str) {
        let Some(symbol) = normalize_symbol(symbol) else {
            return;
        };
        let before = self.watchlist.len();
        self.watchlist.retain(|s| *s != symbol);
        if self.watchlist.len() == before {
            return;
        }
        self.publish(StoreEvent::WatchlistChanged(self.watchlist.clone()));

        if self.selected_symbol.as_deref() == Some(symbol.as_str()) {
            self.replace_selection(self.watchlist.first().cloned());
        }
    }

    pub fn set_currency(&mut self, code: &str, rate: f64) {
        let next = CurrencyConversion {
            code: code.trim().to_uppercase(),
            rate,
        };
        if self.currency != next {
            self.currency = next.clone();
            self.publish(StoreEvent::CurrencyChanged(next));
        }
    }

    pub fn ticker(&self, symbol: &str) -> Option<&TickerData> {
        self.tickers.get(symbol)
    }

    pub fn tickers(&self) -> &HashMap<String, TickerData> {
        &self.tickers
    }

    pub fn selected_symbol(&self) -> Option<&str> {
        self.selected_symbol.as_deref()
    }

    pub fn selected_ticker(&self) -> Option<&TickerData> {
        self.selected_symbol().and_then(|s| self.tickers.get(s))
    }

    pub fn watchlist(&self) -> &[String] {
        &self.watchlist
    }

    pub fn alert(&self) -> Option<&AlertConfig> {
        self.alert.as_ref()
    }

    pub fn currency(&self) -> &CurrencyConversion {
        &self.currency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, price: &str) -> TickerData {
        TickerData {
            symbol: symbol.to_string(),
            price: price.to_string(),
            change_percent: "0.00".to_string(),
        }
    }

    #[test]
    fn test_watchlist_keeps_first_insertion_order_without_duplicates() {
        let mut store = TickerStore::new();
        for symbol in ["BTCUSDT", "ETHUSDT", "btcusdt", "SOLUSDT", "ETHUSDT", " ", ""] {
            store.add_to_watchlist(symbol);
        }
        store.remove_from_watchlist("ETHUSDT");
        store.add_to_watchlist("ETHUSDT");
        store.add_to_watchlist("SOLUSDT");

        assert_eq!(store.watchlist(), ["BTCUSDT", "SOLUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_removing_selected_symbol_reselects_first_remaining() {
        let mut store = TickerStore::with_watchlist(["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        store.set_selected_symbol("ETHUSDT");

        store.remove_from_watchlist("ETHUSDT");
        assert_eq!(store.selected_symbol(), Some("BTCUSDT"));

        store.remove_from_watchlist("BTCUSDT");
        assert_eq!(store.selected_symbol(), Some("SOLUSDT"));

        store.remove_from_watchlist("SOLUSDT");
        assert_eq!(store.selected_symbol(), None);
        assert!(store.watchlist().is_empty());
    }

    #[test]
    fn test_removing_other_symbol_keeps_selection() {
        let mut store = TickerStore::with_watchlist(["BTCUSDT", "ETHUSDT"]);
        store.remove_from_watchlist("ETHUSDT");
        assert_eq!(store.selected_symbol(), Some("BTCUSDT"));
    }

    #[test]
    fn test_selection_stays_inside_watchlist() {
        let mut store = TickerStore::with_watchlist(["BTCUSDT"]);
        store.set_selected_symbol("DOGEUSDT");
        assert_eq!(store.selected_symbol(), Some("BTCUSDT"));

        store.set_selected_symbol("");
        assert_eq!(store.selected_symbol(), None);
    }

    #[test]
    fn test_selection_invariant_holds_for_mixed_sequences() {
        let mut store = TickerStore::with_watchlist(["A", "B", "C"]);
        let ops: [(&str, &str); 9] = [
            ("select", "C"),
            ("rm", "C"),
            ("add", "D"),
            ("select", "D"),
            ("rm", "A"),
            ("rm", "D"),
            ("add", "A"),
            ("rm", "B"),
            ("rm", "A"),
        ];
        for (op, symbol) in ops {
            match op {
                "select" => store.set_selected_symbol(symbol),
                "add" => store.add_to_watchlist(symbol),
                _ => store.remove_from_watchlist(symbol),
            }
            if let Some(selected) = store.selected_symbol() {
                assert!(store.watchlist().iter().any(|s| s == selected));
            }
        }
        assert_eq!(store.selected_symbol(), None);
    }

    #[test]
    fn test_set_alert_single_slot() {
        let mut store = TickerStore::new();
        store.set_alert("BTCUSDT", Some(50000.0));
        store.set_alert("ETHUSDT", Some(3000.0));
        assert_eq!(
            store.alert(),
            Some(&AlertConfig {
                symbol: "ETHUSDT".to_string(),
                target_price: 3000.0
            })
        );

        store.set_alert("ETHUSDT", None);
        assert!(store.alert().is_none());

        store.set_alert("ETHUSDT", Some(f64::NAN));
        assert!(store.alert().is_none());
        store.set_alert("ETHUSDT", Some(0.0));
        assert!(store.alert().is_none());
    }

    #[test]
    fn test_set_ticker_replaces_entry() {
        let mut store = TickerStore::new();
        store.set_ticker("BTCUSDT", ticker("BTCUSDT", "1.00"));
        store.set_ticker("BTCUSDT", ticker("BTCUSDT", "2.00"));
        assert_eq!(store.ticker("BTCUSDT").map(|t| t.price.as_str()), Some("2.00"));
        assert_eq!(store.tickers().len(), 1);
    }

    #[test]
    fn test_subscribers_only_see_their_slices() {
        let mut store = TickerStore::with_watchlist(["BTCUSDT"]);
        let mut watchlist_only = store.subscribe(&[Slice::Watchlist]);
        let mut everything = store.subscribe(&Slice::ALL);

        store.set_ticker("BTCUSDT", ticker("BTCUSDT", "1.00"));
        store.add_to_watchlist("ETHUSDT");
        store.set_currency("inr", 83.5);

        assert_eq!(
            watchlist_only.drain(),
            vec![StoreEvent::WatchlistChanged(vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string()
            ])]
        );
        let slices: Vec<Slice> = everything.drain().iter().map(StoreEvent::slice).collect();
        assert_eq!(slices, vec![Slice::Tickers, Slice::Watchlist, Slice::Currency]);
        assert_eq!(store.currency().code, "INR");
    }

    #[test]
    fn test_no_op_mutations_do_not_notify() {
        let mut store = TickerStore::with_watchlist(["BTCUSDT"]);
        let mut sub = store.subscribe(&Slice::ALL);

        store.add_to_watchlist("BTCUSDT");
        store.remove_from_watchlist("DOGEUSDT");
        store.set_selected_symbol("BTCUSDT");
        store.set_alert("BTCUSDT", None);
        store.set_currency("USD", 1.0);

        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_remove_selected_notifies_watchlist_then_selection() {
        let mut store = TickerStore::with_watchlist(["BTCUSDT", "ETHUSDT"]);
        let mut sub = store.subscribe(&Slice::ALL);
        store.remove_from_watchlist("BTCUSDT");

        assert_eq!(
            sub.drain(),
            vec![
                StoreEvent::WatchlistChanged(vec!["ETHUSDT".to_string()]),
                StoreEvent::SelectionChanged(Some("ETHUSDT".to_string())),
            ]
        );
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let mut store = TickerStore::new();
        let sub = store.subscribe(&[Slice::Tickers]);
        let _kept = store.subscribe(&[Slice::Alert]);
        drop(sub);

        store.set_ticker("BTCUSDT", ticker("BTCUSDT", "1.00"));
        assert_eq!(store.listeners.len(), 1);
    }
}
