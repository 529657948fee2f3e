//! The app task: sole owner of the store, alert engine, chart buffer and feed
//! connector. Everything that mutates them runs on this task's select loop,
//! one event at a time.

use crate::api::binance::rest::{self, CoinDirectory};
use crate::api::binance::ws::{self, WsTransport};
use crate::api::rates::RateService;
use crate::config::Config;
use crate::error::Result;
use crate::market::alerts::{parse_target_price, AlertEngine};
use crate::market::feed::{ConnectionState, FeedConnector, FeedMessage, Tick, Transport};
use crate::market::intent::{Intent, IntentResolver, KeywordResolver};
use crate::market::notify::{Notifier, TerminalNotifier};
use crate::market::series::{RollingSeries, Sample, Trend};
use crate::market::store::{
    AlertConfig, CurrencyConversion, Slice, StoreEvent, Subscription, TickerData, TickerStore,
};
use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

const SEARCH_LIMIT: usize = 5;

/// User intents coming from the dashboard
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    AddSymbol(String),
    RemoveSymbol(String),
    Select(String),
    SelectNext,
    SelectPrevious,
    /// Raw target as typed; validated before it reaches the store
    ArmAlert(String),
    CancelAlert,
    SetCurrency(String),
    Search(String),
    TogglePause,
    ClearSeries,
    Say(String),
    Quit,
}

impl UiCommand {
    /// Parse a command-line entry such as `add SOLUSDT` or `alert 96000`.
    /// Anything unrecognised is handed to the intent resolver.
    pub fn parse(line: &str) -> Option<UiCommand> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim().to_string();
        let command = match (verb.to_lowercase().as_str(), rest.is_empty()) {
            ("add", false) => UiCommand::AddSymbol(rest),
            ("rm" | "remove", false) => UiCommand::RemoveSymbol(rest),
            ("select", false) => UiCommand::Select(rest),
            ("alert", _) => UiCommand::ArmAlert(rest),
            ("cancel", true) => UiCommand::CancelAlert,
            ("currency", false) => UiCommand::SetCurrency(rest),
            ("find", false) => UiCommand::Search(rest),
            ("pause", true) => UiCommand::TogglePause,
            ("clear", true) => UiCommand::ClearSeries,
            ("quit" | "q", true) => UiCommand::Quit,
            ("say", false) => UiCommand::Say(rest),
            _ => UiCommand::Say(line.to_string()),
        };
        Some(command)
    }
}

/// One watchlist card
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub symbol: String,
    pub ticker: Option<TickerData>,
}

/// Everything the dashboard renders, published after every processed event
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub cards: Vec<Card>,
    pub selected: Option<String>,
    pub alert: Option<AlertConfig>,
    pub currency: CurrencyConversion,
    pub samples: Vec<Sample>,
    pub series_capacity: usize,
    pub trend: Trend,
    pub paused: bool,
    pub connection: ConnectionState,
    pub status: Option<String>,
}

/// Results of work the app hands off so ticks keep flowing
#[derive(Debug)]
enum Background {
    CurrencyResolved { code: String, rate: f64 },
    CurrencyFailed { code: String, error: String },
    DirectoryLoaded(Vec<String>),
    DirectoryFailed(String),
}

pub struct App {
    store: TickerStore,
    alerts: AlertEngine,
    series: RollingSeries,
    connector: FeedConnector,
    feed_rx: mpsc::UnboundedReceiver<FeedMessage>,
    changes: Subscription,
    resolver: Box<dyn IntentResolver>,
    rates: Option<RateService>,
    directory: Option<CoinDirectory>,
    known_symbols: Option<Vec<String>>,
    background_tx: mpsc::UnboundedSender<Background>,
    background_rx: mpsc::UnboundedReceiver<Background>,
    snapshot_tx: watch::Sender<Snapshot>,
    status: Option<String>,
}

impl App {
    /// Production wiring: Binance WebSocket, REST collaborators, terminal notifier
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut app = Self::new(
            config,
            Box::new(WsTransport::new(config.reconnect_policy())),
            Box::new(TerminalNotifier),
            Box::new(KeywordResolver),
        );
        app.rates = Some(RateService::new(&config.rates_url, config.rates_ttl)?);
        app.directory = Some(CoinDirectory::new(&config.rest_url, config.directory_ttl)?);
        Ok(app)
    }

    pub fn new(
        config: &Config,
        transport: Box<dyn Transport>,
        notifier: Box<dyn Notifier>,
        resolver: Box<dyn IntentResolver>,
    ) -> Self {
        let mut store = TickerStore::with_watchlist(&config.watchlist);
        let alerts = AlertEngine::new(&mut store, notifier, config.notifications_enabled);
        let changes = store.subscribe(&Slice::ALL);

        let mut series = RollingSeries::new(config.series_window);
        series.set_symbol(store.selected_symbol());

        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let connector = FeedConnector::new(&config.ws_url, transport, feed_tx);
        let (background_tx, background_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(Snapshot::default());

        Self {
            store,
            alerts,
            series,
            connector,
            feed_rx,
            changes,
            resolver,
            rates: None,
            directory: None,
            known_symbols: None,
            background_tx,
            background_rx,
            snapshot_tx,
            status: None,
        }
    }

    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn store(&self) -> &TickerStore {
        &self.store
    }

    pub fn series(&self) -> &RollingSeries {
        &self.series
    }

    pub fn connector(&self) -> &FeedConnector {
        &self.connector
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<UiCommand>) -> Result<()> {
        self.load_directory();
        self.connector.reconcile(self.store.watchlist()).await;
        self.publish();

        loop {
            tokio::select! {
                Some(message) = self.feed_rx.recv() => self.handle_feed_message(message),
                Some(result) = self.background_rx.recv() => self.handle_background(result),
                command = commands.recv() => match command {
                    Some(UiCommand::Quit) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
            self.sync().await;
            self.publish();
        }

        info!("Shutting down feed");
        self.connector.shutdown().await;
        Ok(())
    }

    /// Feed message in, store/alert/series updated
    pub fn handle_feed_message(&mut self, message: FeedMessage) {
        if let Some(text) = self.connector.handle_message(message) {
            if let Some(tick) = ws::parse_ticker_frame(&text) {
                self.apply_tick(&tick);
            }
        }
    }

    /// Alert check first, then the store write
    pub fn apply_tick(&mut self, tick: &Tick) {
        if let Some(fired) = self.alerts.check_price(&mut self.store, tick) {
            self.status = Some(format!(
                "{} hit target {} (now {})",
                fired.symbol, fired.target_price, fired.price
            ));
        }
        self.store.set_ticker(&tick.symbol, tick.to_ticker_data());
    }

    pub fn handle_command(&mut self, command: UiCommand) {
        debug!("Command: {:?}", command);
        match command {
            UiCommand::AddSymbol(symbol) => self.add_symbol(&symbol),
            UiCommand::RemoveSymbol(symbol) => self.store.remove_from_watchlist(&symbol),
            UiCommand::Select(symbol) => self.store.set_selected_symbol(&symbol),
            UiCommand::SelectNext => self.step_selection(1),
            UiCommand::SelectPrevious => self.step_selection(-1),
            UiCommand::ArmAlert(input) => self.arm_alert(&input),
            UiCommand::CancelAlert => {
                if let Some(alert) = self.store.alert().cloned() {
                    self.store.set_alert(&alert.symbol, None);
                    self.status = Some(format!("Alert on {} cancelled", alert.symbol));
                }
            }
            UiCommand::SetCurrency(code) => self.request_currency(&code),
            UiCommand::Search(query) => self.search(&query),
            UiCommand::TogglePause => {
                let paused = self.series.toggle_pause();
                self.status = Some(if paused { "Chart paused" } else { "Chart live" }.to_string());
            }
            UiCommand::ClearSeries => self.series.clear(),
            UiCommand::Say(text) => self.say(&text),
            UiCommand::Quit => {}
        }
    }

    fn add_symbol(&mut self, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        if let Some(known) = &self.known_symbols {
            if !known.contains(&symbol) {
                self.status = Some(format!("{} is not a tradable USDT pair", symbol));
                return;
            }
        }
        self.store.add_to_watchlist(&symbol);
    }

    fn step_selection(&mut self, step: isize) {
        let watchlist = self.store.watchlist();
        if watchlist.is_empty() {
            return;
        }
        let len = watchlist.len() as isize;
        let current = self
            .store
            .selected_symbol()
            .and_then(|s| watchlist.iter().position(|w| w == s))
            .map_or(0, |i| i as isize + step);
        let next = watchlist[current.rem_euclid(len) as usize].clone();
        self.store.set_selected_symbol(&next);
    }

    fn arm_alert(&mut self, input: &str) {
        let Some(symbol) = self.store.selected_symbol().map(str::to_string) else {
            self.status = Some("Select a symbol before setting an alert".to_string());
            return;
        };
        match parse_target_price(input) {
            Ok(target) => {
                self.store.set_alert(&symbol, Some(target));
                self.status = Some(format!("Alert armed: {} >= {}", symbol, target));
            }
            Err(e) => self.status = Some(e.to_string()),
        }
    }

    fn request_currency(&mut self, code: &str) {
        let code = code.trim().to_uppercase();
        if code == "USD" {
            self.store.set_currency("USD", 1.0);
            return;
        }
        let Some(rates) = self.rates.clone() else {
            self.status = Some("Currency rates unavailable".to_string());
            return;
        };
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = match rates.rate_for(&code).await {
                Ok(rate) => Background::CurrencyResolved { code, rate },
                Err(e) => Background::CurrencyFailed {
                    code,
                    error: e.to_string(),
                },
            };
            let _ = tx.send(result);
        });
    }

    fn load_directory(&self) {
        let Some(directory) = self.directory.clone() else {
            return;
        };
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let result = match directory.symbols().await {
                Ok(symbols) => Background::DirectoryLoaded(symbols),
                Err(e) => Background::DirectoryFailed(e.to_string()),
            };
            let _ = tx.send(result);
        });
    }

    fn search(&mut self, query: &str) {
        self.status = Some(match &self.known_symbols {
            Some(symbols) => {
                let matches = rest::search(symbols, query, SEARCH_LIMIT);
                if matches.is_empty() {
                    format!("No pairs match '{}'", query)
                } else {
                    matches.join("  ")
                }
            }
            None => "Symbol directory not loaded yet".to_string(),
        });
    }

    fn say(&mut self, text: &str) {
        let intent = self
            .resolver
            .resolve(text, self.store.watchlist(), self.store.tickers());
        if let Intent::Navigate { pair, .. } = &intent {
            self.store.set_selected_symbol(pair);
        }
        self.status = Some(intent.reply());
    }

    fn handle_background(&mut self, result: Background) {
        match result {
            Background::CurrencyResolved { code, rate } => {
                self.store.set_currency(&code, rate);
                self.status = Some(format!("Prices in {}", code));
            }
            Background::CurrencyFailed { code, error } => {
                warn!("Could not switch currency to {}: {}", code, error);
                self.status = Some(format!("Could not switch to {}", code));
            }
            Background::DirectoryLoaded(symbols) => self.known_symbols = Some(symbols),
            Background::DirectoryFailed(error) => {
                warn!("Symbol directory unavailable: {}", error);
            }
        }
    }

    /// Route store changes to their consumers. A watchlist change reconciles
    /// the feed connection.
    pub async fn sync(&mut self) {
        let mut watchlist_changed = false;
        while let Some(event) = self.changes.try_next() {
            match event {
                StoreEvent::TickerUpdated(symbol) => {
                    let price = self
                        .store
                        .ticker(&symbol)
                        .and_then(|t| t.price.parse::<f64>().ok());
                    if let Some(price) = price {
                        self.series.record(&symbol, price, Utc::now());
                    }
                }
                StoreEvent::SelectionChanged(selected) => {
                    self.series.set_symbol(selected.as_deref());
                }
                StoreEvent::WatchlistChanged(_) => watchlist_changed = true,
                StoreEvent::AlertChanged(_) | StoreEvent::CurrencyChanged(_) => {}
            }
        }
        if watchlist_changed {
            self.connector.reconcile(self.store.watchlist()).await;
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            cards: self
                .store
                .watchlist()
                .iter()
                .map(|symbol| Card {
                    symbol: symbol.clone(),
                    ticker: self.store.ticker(symbol).cloned(),
                })
                .collect(),
            selected: self.store.selected_symbol().map(str::to_string),
            alert: self.store.alert().cloned(),
            currency: self.store.currency().clone(),
            samples: self.series.samples().copied().collect(),
            series_capacity: self.series.capacity(),
            trend: self.series.trend(),
            paused: self.series.is_paused(),
            connection: self.connector.state(),
            status: self.status.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
