//! Market data WebSocket stream.
//!
//! Maintains a channel subscription table across reconnects. On each
//! (re)connect the current table is re-issued in a single SUBSCRIBE frame,
//! so callers observe each subscription exactly once per session and no
//! duplicate confirmations. Heartbeat pings go out every `ping_interval`;
//! a missing pong within `pong_timeout` closes the connection and the
//! session reconnects with exponential backoff.

use crate::parser::parse_message;
use common::ExponentialBackoff;
use exchange_core::{ExchangeError, StreamSender};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Channel name for a symbol's mark price stream.
pub fn mark_price_channel(symbol: &str) -> String {
    format!("{}@markPrice", symbol.to_lowercase())
}

/// Channel name for a symbol's funding rate stream.
pub fn funding_rate_channel(symbol: &str) -> String {
    format!("{}@fundingRate", symbol.to_lowercase())
}

/// Channel name for a symbol's best bid/ask stream.
pub fn book_ticker_channel(symbol: &str) -> String {
    format!("{}@bookTicker", symbol.to_lowercase())
}

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct MarketStreamConfig {
    /// WebSocket endpoint (combined-stream URL).
    pub ws_url: String,
    /// Heartbeat ping interval.
    pub ping_interval: Duration,
    /// How long to wait for a pong before declaring the connection dead.
    pub pong_timeout: Duration,
    /// Reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay.
    pub reconnect_interval: Duration,
}

impl Default for MarketStreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://fstream.binance.com/stream".into(),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 0,
            reconnect_interval: Duration::from_secs(1),
        }
    }
}

enum Control {
    Subscribe(String),
    Unsubscribe(String),
}

/// WebSocket market data client with automatic reconnection.
pub struct MarketStream {
    config: MarketStreamConfig,
    channels: Mutex<BTreeSet<String>>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    request_id: AtomicU64,
}

impl MarketStream {
    pub fn new(config: MarketStreamConfig) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            config,
            channels: Mutex::new(BTreeSet::new()),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            request_id: AtomicU64::new(1),
        }
    }

    /// Register a channel. If a session is live, the SUBSCRIBE frame goes
    /// out immediately; either way the channel is re-issued on reconnect.
    pub fn subscribe(&self, channel: &str) {
        let inserted = self.channels.lock().insert(channel.to_string());
        if inserted {
            let _ = self.control_tx.send(Control::Subscribe(channel.to_string()));
            debug!(channel = %channel, "subscription registered");
        }
    }

    /// Remove a channel from the table and the live session.
    pub fn unsubscribe(&self, channel: &str) {
        let removed = self.channels.lock().remove(channel);
        if removed {
            let _ = self
                .control_tx
                .send(Control::Unsubscribe(channel.to_string()));
            debug!(channel = %channel, "subscription removed");
        }
    }

    /// Current subscription table (sorted).
    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().iter().cloned().collect()
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn frame(&self, method: &str, channels: &[String]) -> String {
        serde_json::json!({
            "method": method,
            "params": channels,
            "id": self.next_request_id(),
        })
        .to_string()
    }

    /// Run the stream until shutdown, reconnecting on failure.
    pub async fn run(
        &self,
        sender: StreamSender,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), ExchangeError> {
        let mut control_rx = self
            .control_rx
            .lock()
            .take()
            .ok_or_else(|| ExchangeError::Invariant("market stream already running".into()))?;

        let mut backoff = ExponentialBackoff::new(
            self.config.reconnect_interval,
            Duration::from_secs(60),
            2.0,
            0.1,
        );
        let mut attempts = 0u32;

        loop {
            if *shutdown_rx.borrow() {
                info!("shutdown requested, exiting market stream");
                return Ok(());
            }

            match self
                .run_session(&sender, &mut control_rx, &mut shutdown_rx)
                .await
            {
                SessionEnd::Shutdown => {
                    info!("market stream shutdown complete");
                    return Ok(());
                }
                SessionEnd::ReceiverDropped => {
                    info!("event receiver dropped, exiting market stream");
                    return Ok(());
                }
                SessionEnd::Lost { stable, reason } => {
                    if stable {
                        backoff.reset();
                        attempts = 0;
                    }

                    attempts += 1;
                    if self.config.max_reconnect_attempts > 0
                        && attempts > self.config.max_reconnect_attempts
                    {
                        return Err(ExchangeError::transport(
                            "market_stream",
                            format!("gave up after {} reconnect attempts", attempts - 1),
                        ));
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        reason = %reason,
                        attempt = attempts,
                        delay_secs = delay.as_secs_f64(),
                        "market stream lost, reconnecting"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_session(
        &self,
        sender: &StreamSender,
        control_rx: &mut mpsc::UnboundedReceiver<Control>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        info!(url = %self.config.ws_url, "connecting to market stream");

        let connect = tokio::time::timeout(
            Duration::from_secs(30),
            connect_async(&self.config.ws_url),
        );
        let ws_stream = match connect.await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                return SessionEnd::Lost {
                    stable: false,
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                return SessionEnd::Lost {
                    stable: false,
                    reason: "connection timeout".into(),
                }
            }
        };

        info!("market stream connected");
        let connected_at = Instant::now();
        let (mut write, mut read) = ws_stream.split();

        // Control messages queued while disconnected are already reflected
        // in the table; drop them so the table is issued exactly once.
        while control_rx.try_recv().is_ok() {}

        // Re-establish every registered channel exactly once per session.
        let channels = self.channels();
        if !channels.is_empty() {
            let frame = self.frame("SUBSCRIBE", &channels);
            info!(count = channels.len(), "re-establishing subscriptions");
            if let Err(e) = write.send(Message::Text(frame)).await {
                return SessionEnd::Lost {
                    stable: false,
                    reason: e.to_string(),
                };
            }
        }

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.tick().await; // skip the immediate tick
        let mut last_pong = Instant::now();
        let mut ping_sent_at: Option<Instant> = None;

        let stable = |connected_at: Instant| connected_at.elapsed() > Duration::from_secs(300);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = write.close().await;
                        return SessionEnd::Shutdown;
                    }
                }

                _ = ping_interval.tick() => {
                    // A ping is outstanding and the pong never came
                    if let Some(sent_at) = ping_sent_at {
                        if last_pong < sent_at && sent_at.elapsed() > self.config.pong_timeout {
                            let _ = write.close().await;
                            return SessionEnd::Lost {
                                stable: stable(connected_at),
                                reason: "pong timeout".into(),
                            };
                        }
                    }

                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return SessionEnd::Lost {
                            stable: stable(connected_at),
                            reason: e.to_string(),
                        };
                    }
                    ping_sent_at = Some(Instant::now());
                }

                Some(control) = control_rx.recv() => {
                    let (method, channel) = match control {
                        Control::Subscribe(c) => ("SUBSCRIBE", c),
                        Control::Unsubscribe(c) => ("UNSUBSCRIBE", c),
                    };
                    let frame = self.frame(method, std::slice::from_ref(&channel));
                    if let Err(e) = write.send(Message::Text(frame)).await {
                        return SessionEnd::Lost {
                            stable: stable(connected_at),
                            reason: e.to_string(),
                        };
                    }
                }

                msg_opt = read.next() => {
                    let msg = match msg_opt {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            return SessionEnd::Lost {
                                stable: stable(connected_at),
                                reason: e.to_string(),
                            };
                        }
                        None => {
                            return SessionEnd::Lost {
                                stable: stable(connected_at),
                                reason: "stream ended".into(),
                            };
                        }
                    };

                    match msg {
                        Message::Text(text) => {
                            match parse_message(&text) {
                                Ok(events) => {
                                    for event in events {
                                        if sender.send(event).await.is_err() {
                                            return SessionEnd::ReceiverDropped;
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "failed to parse stream message");
                                }
                            }
                        }
                        Message::Ping(data) => {
                            debug!("ping received, replying");
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Lost {
                                    stable: stable(connected_at),
                                    reason: e.to_string(),
                                };
                            }
                        }
                        Message::Pong(_) => {
                            last_pong = Instant::now();
                        }
                        Message::Close(_) => {
                            return SessionEnd::Lost {
                                stable: stable(connected_at),
                                reason: "closed by server".into(),
                            };
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    ReceiverDropped,
    Lost { stable: bool, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(mark_price_channel("BTCUSDT"), "btcusdt@markPrice");
        assert_eq!(funding_rate_channel("ETHUSDT"), "ethusdt@fundingRate");
        assert_eq!(book_ticker_channel("BTCUSDT"), "btcusdt@bookTicker");
    }

    #[test]
    fn test_subscribe_unsubscribe_leaves_table_empty() {
        let stream = MarketStream::new(MarketStreamConfig::default());

        stream.subscribe("btcusdt@markPrice");
        stream.subscribe("ethusdt@fundingRate");
        assert_eq!(stream.channels().len(), 2);

        stream.unsubscribe("btcusdt@markPrice");
        stream.unsubscribe("ethusdt@fundingRate");
        assert!(stream.channels().is_empty());
    }

    #[test]
    fn test_duplicate_subscribe_registers_once() {
        let stream = MarketStream::new(MarketStreamConfig::default());

        stream.subscribe("btcusdt@markPrice");
        stream.subscribe("btcusdt@markPrice");
        assert_eq!(stream.channels(), vec!["btcusdt@markPrice".to_string()]);
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let stream = MarketStream::new(MarketStreamConfig::default());
        let frame = stream.frame(
            "SUBSCRIBE",
            &["btcusdt@markPrice".to_string(), "ethusdt@fundingRate".to_string()],
        );

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["method"], "SUBSCRIBE");
        assert_eq!(value["params"][0], "btcusdt@markPrice");
        assert_eq!(value["params"][1], "ethusdt@fundingRate");
        assert!(value["id"].is_u64());
    }

    #[test]
    fn test_request_ids_increment() {
        let stream = MarketStream::new(MarketStreamConfig::default());
        let a = stream.next_request_id();
        let b = stream.next_request_id();
        assert!(b > a);
    }
}
