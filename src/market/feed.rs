//! Feed connector: keeps exactly one streaming connection whose topic set
//! mirrors the watchlist.
//!
//! The connector never reads the socket itself. A [`Transport`] spawns one
//! task per connection which reports back over an unbounded channel, tagged
//! with the connection's generation so that late messages from a replaced
//! connection can be told apart and dropped.

use crate::market::store::TickerData;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Parsed numeric form of one inbound ticker frame
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
}

impl Tick {
    /// Normalized two-decimal snapshot written into the store
    pub fn to_ticker_data(&self) -> TickerData {
        TickerData {
            symbol: self.symbol.clone(),
            price: format!("{:.2}", self.price),
            change_percent: format!("{:.2}", self.change_percent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connecting,
    Opened,
    Frame(String),
    /// The socket went away without being asked to
    Closed { reason: String, retrying: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    pub generation: u64,
    pub event: FeedEvent,
}

impl FeedMessage {
    pub fn new(generation: u64, event: FeedEvent) -> Self {
        Self { generation, event }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub generation: u64,
    pub url: String,
    pub topics: Vec<String>,
}

/// Handle to one running connection task
#[derive(Debug)]
pub struct Connection {
    generation: u64,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Connection {
    pub fn new(generation: u64, shutdown: oneshot::Sender<()>, handle: JoinHandle<()>) -> Self {
        Self {
            generation,
            shutdown: Some(shutdown),
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signal the task to close its socket and wait until it has
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = self.handle.await {
            warn!("Connection task {} ended abnormally: {}", self.generation, e);
        }
    }
}

/// Opens connections. Implementations spawn a task that forwards
/// [`FeedEvent`]s until its shutdown signal fires.
pub trait Transport: Send + Sync {
    fn open(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<FeedMessage>,
    ) -> Connection;
}

struct ActiveConnection {
    topics: Vec<String>,
    connection: Connection,
}

pub struct FeedConnector {
    base_url: String,
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedSender<FeedMessage>,
    active: Option<ActiveConnection>,
    state: ConnectionState,
    generation: u64,
}

/// `btcusdt@ticker` style topics, in watchlist order
pub fn topics_for(watchlist: &[String]) -> Vec<String> {
    watchlist
        .iter()
        .map(|s| format!("{}@ticker", s.to_lowercase()))
        .collect()
}

/// Combined stream URL for a topic set
pub fn stream_url(base_url: &str, topics: &[String]) -> String {
    format!(
        "{}/stream?streams={}",
        base_url.trim_end_matches('/'),
        topics.join("/")
    )
}

impl FeedConnector {
    pub fn new(
        base_url: impl Into<String>,
        transport: Box<dyn Transport>,
        events: mpsc::UnboundedSender<FeedMessage>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            events,
            active: None,
            state: ConnectionState::Idle,
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_topics(&self) -> &[String] {
        match &self.active {
            Some(active) => &active.topics,
            None => &[],
        }
    }

    /// Bring the live connection in line with `watchlist`.
    ///
    /// Returns `true` when a connection was torn down or opened. The old
    /// connection is fully closed before the new one is opened.
    pub async fn reconcile(&mut self, watchlist: &[String]) -> bool {
        let desired = topics_for(watchlist);
        let alive = self.state != ConnectionState::Idle;
        if alive && desired.as_slice() == self.active_topics() {
            debug!("Subscription set unchanged ({} topics)", desired.len());
            return false;
        }

        let had_connection = self.active.is_some();
        self.close_active().await;

        if desired.is_empty() {
            info!("Watchlist empty, feed idle");
            return had_connection;
        }

        self.generation += 1;
        let url = stream_url(&self.base_url, &desired);
        info!(
            "Opening ticker stream #{} for {} symbols",
            self.generation,
            desired.len()
        );
        let request = ConnectRequest {
            generation: self.generation,
            url,
            topics: desired.clone(),
        };
        let connection = self.transport.open(request, self.events.clone());
        self.active = Some(ActiveConnection {
            topics: desired,
            connection,
        });
        self.state = ConnectionState::Connecting;
        true
    }

    /// Teardown: close whatever is open and go idle
    pub async fn shutdown(&mut self) {
        self.close_active().await;
    }

    async fn close_active(&mut self) {
        if let Some(active) = self.active.take() {
            self.state = ConnectionState::Closing;
            debug!("Closing ticker stream #{}", active.connection.generation());
            active.connection.close().await;
        }
        self.state = ConnectionState::Idle;
    }

    /// Track connection state from a task message. Returns the frame text when
    /// the message is a frame from the current connection.
    pub fn handle_message(&mut self, message: FeedMessage) -> Option<String> {
        if self.active.is_none() || message.generation != self.generation {
            debug!(
                "Dropping message from stale stream #{} (current #{})",
                message.generation, self.generation
            );
            return None;
        }

        match message.event {
            FeedEvent::Connecting => {
                self.state = ConnectionState::Connecting;
                None
            }
            FeedEvent::Opened => {
                info!("Ticker stream #{} open", message.generation);
                self.state = ConnectionState::Open;
                None
            }
            FeedEvent::Frame(text) => Some(text),
            FeedEvent::Closed { reason, retrying } => {
                if retrying {
                    warn!("Ticker stream dropped ({}), reconnecting", reason);
                    self.state = ConnectionState::Connecting;
                } else {
                    warn!("Ticker stream dropped ({}), feed is stale", reason);
                    self.state = ConnectionState::Idle;
                }
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TransportLog {
        Opened(u64, Vec<String>),
        Closed(u64),
    }

    /// In-memory transport: connections stay up until closed and record
    /// their lifecycle
    #[derive(Clone, Default)]
    pub struct MemoryTransport {
        pub log: Arc<Mutex<Vec<TransportLog>>>,
        pub senders: Arc<Mutex<Vec<(u64, mpsc::UnboundedSender<FeedMessage>)>>>,
    }

    impl MemoryTransport {
        pub fn log(&self) -> Vec<TransportLog> {
            self.log.lock().unwrap().clone()
        }

        pub fn live(&self) -> usize {
            let log = self.log();
            let opened = log
                .iter()
                .filter(|e| matches!(e, TransportLog::Opened(..)))
                .count();
            opened - (log.len() - opened)
        }

        /// Push an event as if it came from connection `generation`
        pub fn emit(&self, generation: u64, event: FeedEvent) {
            let senders = self.senders.lock().unwrap();
            if let Some((_, tx)) = senders.iter().find(|(g, _)| *g == generation) {
                let _ = tx.send(FeedMessage::new(generation, event));
            }
        }
    }

    impl Transport for MemoryTransport {
        fn open(
            &self,
            request: ConnectRequest,
            events: mpsc::UnboundedSender<FeedMessage>,
        ) -> Connection {
            let generation = request.generation;
            self.log
                .lock()
                .unwrap()
                .push(TransportLog::Opened(generation, request.topics));
            self.senders.lock().unwrap().push((generation, events));

            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let log = self.log.clone();
            let handle = tokio::spawn(async move {
                let _ = shutdown_rx.await;
                log.lock().unwrap().push(TransportLog::Closed(generation));
            });
            Connection::new(generation, shutdown_tx, handle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{MemoryTransport, TransportLog};
    use super::*;

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn connector() -> (
        FeedConnector,
        MemoryTransport,
        mpsc::UnboundedReceiver<FeedMessage>,
    ) {
        let transport = MemoryTransport::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = FeedConnector::new(
            "wss://stream.binance.com:443",
            Box::new(transport.clone()),
            tx,
        );
        (connector, transport, rx)
    }

    #[test]
    fn test_topics_and_url() {
        let topics = topics_for(&symbols(&["BTCUSDT", "EthUsdt"]));
        assert_eq!(topics, vec!["btcusdt@ticker", "ethusdt@ticker"]);
        assert_eq!(
            stream_url("wss://stream.binance.com:443/", &topics),
            "wss://stream.binance.com:443/stream?streams=btcusdt@ticker/ethusdt@ticker"
        );
    }

    #[test]
    fn test_tick_normalizes_to_two_decimals() {
        let tick = Tick {
            symbol: "BTCUSDT".to_string(),
            price: 50001.239,
            change_percent: -1.5,
        };
        let data = tick.to_ticker_data();
        assert_eq!(data.price, "50001.24");
        assert_eq!(data.change_percent, "-1.50");
    }

    #[tokio::test]
    async fn test_watchlist_change_replaces_connection_once() {
        let (mut connector, transport, _rx) = connector();

        assert!(connector.reconcile(&symbols(&["BTCUSDT"])).await);
        assert!(
            connector
                .reconcile(&symbols(&["BTCUSDT", "ETHUSDT"]))
                .await
        );

        assert_eq!(
            transport.log(),
            vec![
                TransportLog::Opened(1, symbols(&["btcusdt@ticker"])),
                TransportLog::Closed(1),
                TransportLog::Opened(2, symbols(&["btcusdt@ticker", "ethusdt@ticker"])),
            ]
        );
        assert_eq!(transport.live(), 1);
        assert_eq!(connector.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_unchanged_watchlist_keeps_connection() {
        let (mut connector, transport, _rx) = connector();
        connector.reconcile(&symbols(&["BTCUSDT"])).await;
        assert!(!connector.reconcile(&symbols(&["btcusdt"])).await);
        assert_eq!(transport.log().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_watchlist_goes_idle() {
        let (mut connector, transport, _rx) = connector();
        assert!(!connector.reconcile(&[]).await);
        assert!(transport.log().is_empty());

        connector.reconcile(&symbols(&["BTCUSDT"])).await;
        assert!(connector.reconcile(&[]).await);
        assert_eq!(connector.state(), ConnectionState::Idle);
        assert!(connector.active_topics().is_empty());
        assert_eq!(transport.live(), 0);
    }

    #[tokio::test]
    async fn test_state_follows_messages_and_ignores_stale_generations() {
        let (mut connector, transport, mut rx) = connector();
        connector.reconcile(&symbols(&["BTCUSDT"])).await;
        transport.emit(1, FeedEvent::Opened);
        let msg = rx.recv().await.unwrap();
        assert_eq!(connector.handle_message(msg), None);
        assert_eq!(connector.state(), ConnectionState::Open);

        connector.reconcile(&symbols(&["ETHUSDT"])).await;
        transport.emit(1, FeedEvent::Frame("late".to_string()));
        let stale = rx.recv().await.unwrap();
        assert_eq!(connector.handle_message(stale), None);

        transport.emit(2, FeedEvent::Frame("fresh".to_string()));
        let fresh = rx.recv().await.unwrap();
        assert_eq!(connector.handle_message(fresh), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_stream_allows_reopen_with_same_topics() {
        let (mut connector, transport, mut rx) = connector();
        connector.reconcile(&symbols(&["BTCUSDT"])).await;
        transport.emit(
            1,
            FeedEvent::Closed {
                reason: "reset".to_string(),
                retrying: false,
            },
        );
        let msg = rx.recv().await.unwrap();
        connector.handle_message(msg);
        assert_eq!(connector.state(), ConnectionState::Idle);

        assert!(connector.reconcile(&symbols(&["BTCUSDT"])).await);
        assert_eq!(connector.generation(), 2);
        assert_eq!(transport.live(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connection() {
        let (mut connector, transport, _rx) = connector();
        connector.reconcile(&symbols(&["BTCUSDT"])).await;
        connector.shutdown().await;
        assert_eq!(transport.log().last(), Some(&TransportLog::Closed(1)));
        assert_eq!(connector.state(), ConnectionState::Idle);
    }
}
