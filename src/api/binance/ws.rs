use crate::config::ReconnectPolicy;
use crate::error::Result;
use crate::market::feed::{ConnectRequest, Connection, FeedEvent, FeedMessage, Tick, Transport};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Fields of a 24hr ticker payload this crate reads; the rest is ignored
#[derive(Debug, Deserialize)]
struct TickerPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "P")]
    change_percent: String,
}

/// Combined streams wrap the payload as `{"stream": ..., "data": {...}}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TickerFrame {
    Combined { data: TickerPayload },
    Single(TickerPayload),
}

/// Parse one text frame. Anything that is not a complete ticker is `None`.
pub fn parse_ticker_frame(text: &str) -> Option<Tick> {
    let frame = match serde_json::from_str::<TickerFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Discarding frame ({}): {:.100}", e, text);
            return None;
        }
    };
    let payload = match frame {
        TickerFrame::Combined { data } => data,
        TickerFrame::Single(payload) => payload,
    };

    let price = payload.last_price.parse::<f64>().ok().filter(|p| p.is_finite());
    let change = payload
        .change_percent
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite());
    match (price, change) {
        (Some(price), Some(change_percent)) if !payload.symbol.is_empty() => Some(Tick {
            symbol: payload.symbol,
            price,
            change_percent,
        }),
        _ => {
            debug!(
                "Discarding ticker for '{}' with unreadable numbers",
                payload.symbol
            );
            None
        }
    }
}

/// Binance WebSocket transport
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    reconnect: Option<ReconnectPolicy>,
}

impl WsTransport {
    pub fn new(reconnect: Option<ReconnectPolicy>) -> Self {
        Self { reconnect }
    }
}

impl Transport for WsTransport {
    fn open(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<FeedMessage>,
    ) -> Connection {
        let generation = request.generation;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_connection(
            request,
            self.reconnect,
            events,
            shutdown_rx,
        ));
        Connection::new(generation, shutdown_tx, handle)
    }
}

enum StreamExit {
    /// Asked to stop; the socket was closed on our side
    Shutdown,
    Dropped(String),
}

async fn run_connection(
    request: ConnectRequest,
    reconnect: Option<ReconnectPolicy>,
    events: mpsc::UnboundedSender<FeedMessage>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let generation = request.generation;
    let send = |event: FeedEvent| events.send(FeedMessage::new(generation, event)).is_ok();
    let mut attempt = 0u32;

    loop {
        send(FeedEvent::Connecting);
        info!("Connecting to Binance WebSocket: {}", request.url);

        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = connect(&request.url) => result,
        };

        let reason = match connected {
            Ok(ws_stream) => {
                info!("Successfully connected to WebSocket");
                attempt = 0;
                if !send(FeedEvent::Opened) {
                    return;
                }
                match pump_frames(ws_stream, generation, &events, &mut shutdown).await {
                    StreamExit::Shutdown => return,
                    StreamExit::Dropped(reason) => reason,
                }
            }
            Err(e) => {
                error!("Connection error: {}", e);
                e.to_string()
            }
        };

        let delay = reconnect.map(|policy| policy.delay_for(attempt));
        if !send(FeedEvent::Closed {
            reason,
            retrying: delay.is_some(),
        }) {
            return;
        }
        let Some(delay) = delay else {
            return;
        };

        attempt = attempt.saturating_add(1);
        debug!("Waiting {:?} before reconnecting...", delay);
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(url: &str) -> Result<WsStream> {
    let (ws_stream, _) = connect_async(url).await?;
    Ok(ws_stream)
}

async fn pump_frames(
    mut ws_stream: WsStream,
    generation: u64,
    events: &mpsc::UnboundedSender<FeedMessage>,
    shutdown: &mut oneshot::Receiver<()>,
) -> StreamExit {
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                if let Err(e) = ws_stream.close(None).await {
                    debug!("Close handshake failed: {}", e);
                }
                info!("WebSocket connection closed");
                return StreamExit::Shutdown;
            }
            message = ws_stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if events.send(FeedMessage::new(generation, FeedEvent::Frame(text))).is_err() {
                        warn!("Feed receiver dropped, closing stream");
                        let _ = ws_stream.close(None).await;
                        return StreamExit::Shutdown;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket connection closed by server");
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return StreamExit::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return StreamExit::Dropped(e.to_string());
                }
                None => return StreamExit::Dropped("stream ended".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_combined_stream_frame() {
        let text = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"120.5","P":"0.241","c":"50001.239","v":"1000"}}"#;
        assert_eq!(
            parse_ticker_frame(text),
            Some(Tick {
                symbol: "BTCUSDT".to_string(),
                price: 50001.239,
                change_percent: 0.241
            })
        );
    }

    #[test]
    fn test_parses_bare_ticker() {
        let tick = parse_ticker_frame(r#"{"s":"ETHUSDT","c":"3000.1","P":"-2.5"}"#).unwrap();
        assert_eq!(tick.symbol, "ETHUSDT");
        assert_eq!(tick.change_percent, -2.5);
    }

    #[test]
    fn test_discards_malformed_frames() {
        for text in [
            r#"{"foo":"bar"}"#,
            r#"{"data":{"s":"BTCUSDT"}}"#,
            r#"{"data":{"s":"BTCUSDT","c":"1.0"}}"#,
            r#"{"data":{"s":"BTCUSDT","c":"abc","P":"1.0"}}"#,
            r#"{"data":{"s":"BTCUSDT","c":"NaN","P":"1.0"}}"#,
            r#"{"data":{"s":"","c":"1.0","P":"1.0"}}"#,
            r#"{"result":null,"id":1}"#,
            "not json",
            "",
        ] {
            assert_eq!(parse_ticker_frame(text), None, "frame: {}", text);
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_closed_without_retry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = WsTransport::new(None);
        let connection = transport.open(
            ConnectRequest {
                generation: 7,
                url: "ws://127.0.0.1:1/stream?streams=btcusdt@ticker".to_string(),
                topics: vec!["btcusdt@ticker".to_string()],
            },
            tx,
        );

        assert_eq!(rx.recv().await.map(|m| m.event), Some(FeedEvent::Connecting));
        match rx.recv().await {
            Some(FeedMessage {
                generation: 7,
                event: FeedEvent::Closed { retrying, .. },
            }) => assert!(!retrying),
            other => panic!("unexpected message: {:?}", other),
        }
        connection.close().await;
    }
}
