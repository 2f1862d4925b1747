//! Single-symbol feed driver.
//!
//! Owns the order book and everything that feeds it: the WebSocket depth
//! stream, the REST snapshot client, and the resync protocol. All book
//! mutations happen on this task; the host observes through events.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use backoff::ExponentialBackoff;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::binance::types::{
    ConnectionStatus, DepthUpdateEvent, StreamMessage, WebSocketError,
};
use crate::binance::{BinanceRestClient, BinanceWebSocket};
use crate::book::{
    ApplyOutcome, BookConfig, BookSnapshot, DepthDiff, OrderBook, PriceLevel, ResyncReason,
};
use crate::config::Config;

/// Control message for the feed task
#[derive(Debug)]
pub enum ControlMessage {
    Shutdown,
    Reconnect,
}

/// Events emitted to the host
#[derive(Debug, Clone)]
pub enum FeedEvent {
    BookUpdated {
        symbol: String,
        best_bid: Option<PriceLevel>,
        best_ask: Option<PriceLevel>,
        watermark: u64,
    },
    Resynced {
        symbol: String,
        last_update_id: u64,
    },
    ConnectionStatus {
        symbol: String,
        status: ConnectionStatus,
    },
    Error {
        symbol: String,
        error: String,
    },
}

/// Runtime settings the driver needs from the configuration.
#[derive(Debug, Clone)]
struct FeedSettings {
    snapshot_limit: u32,
    depth_update_speed_ms: u16,
    resync_timeout: Duration,
    qty_change_log_threshold: f64,
}

/// Feed driver for a single trading pair
pub struct BookFeed {
    symbol: String,
    book: OrderBook,
    ws: BinanceWebSocket,
    message_rx: mpsc::Receiver<Result<StreamMessage, WebSocketError>>,
    rest: BinanceRestClient,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    event_tx: mpsc::UnboundedSender<FeedEvent>,
    settings: FeedSettings,
}

impl BookFeed {
    pub fn new(
        symbol: String,
        config: &Config,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
        event_tx: mpsc::UnboundedSender<FeedEvent>,
    ) -> Self {
        let ws_url = format!("{}/ws", config.binance.ws_url);
        let (ws, message_rx) = BinanceWebSocket::new(ws_url);
        let rest = BinanceRestClient::with_timeout(
            config.binance.rest_url.clone(),
            Duration::from_secs(config.binance.timeout_seconds),
        );
        let book = OrderBook::new(BookConfig::from(&config.book));

        Self {
            symbol,
            book,
            ws,
            message_rx,
            rest,
            control_rx,
            event_tx,
            settings: FeedSettings {
                snapshot_limit: config.binance.snapshot_limit,
                depth_update_speed_ms: config.binance.depth_update_speed_ms,
                resync_timeout: Duration::from_secs(config.binance.resync_timeout_secs),
                qty_change_log_threshold: config.book.qty_change_log_threshold,
            },
        }
    }

    /// Connect, subscribe to the diff stream, then seed the book from a
    /// REST snapshot. Diffs that race the snapshot are dropped; the
    /// bootstrap predicate absorbs the window.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing feed for {}", self.symbol);

        self.ws
            .connect()
            .await
            .with_context(|| format!("failed to connect stream for {}", self.symbol))?;
        self.ws.start_listening().await?;
        self.ws
            .subscribe_depth(&self.symbol, Some(self.settings.depth_update_speed_ms))
            .await
            .with_context(|| format!("failed to subscribe depth for {}", self.symbol))?;

        self.load_snapshot().await?;
        info!(
            symbol = %self.symbol,
            watermark = self.book.watermark(),
            "feed initialized"
        );
        Ok(())
    }

    /// Run the feed loop until a shutdown message arrives.
    pub async fn run(mut self) {
        info!("Starting feed loop for {}", self.symbol);

        loop {
            tokio::select! {
                Some(control_msg) = self.control_rx.recv() => {
                    match control_msg {
                        ControlMessage::Shutdown => {
                            info!("Received shutdown signal for {}", self.symbol);
                            break;
                        }
                        ControlMessage::Reconnect => {
                            info!("Received reconnect signal for {}", self.symbol);
                            if let Err(e) = self.reconnect().await {
                                error!("Failed to reconnect for {}: {}", self.symbol, e);
                                self.emit_error(e.to_string());
                            }
                        }
                    }
                }

                Some(message_result) = self.message_rx.recv() => {
                    match message_result {
                        Ok(StreamMessage::DepthUpdate(event)) => {
                            self.on_depth_update(event).await;
                        }
                        Ok(other) => {
                            debug!("Non-depth stream message for {}: {:?}", self.symbol, other);
                        }
                        Err(e) => {
                            error!("Stream error for {}: {}", self.symbol, e);
                            self.emit_error(e.to_string());

                            if e.requires_reconnection() {
                                warn!(
                                    "Connection-level error, reconnecting stream for {}",
                                    self.symbol
                                );
                                if let Err(reconnect_err) = self.reconnect().await {
                                    error!(
                                        "Automatic reconnection failed for {}: {}",
                                        self.symbol, reconnect_err
                                    );
                                    self.emit_error(reconnect_err.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = self.ws.disconnect().await {
            warn!("Error during stream disconnect for {}: {}", self.symbol, e);
        }
        info!("Feed loop terminated for {}", self.symbol);
    }

    async fn on_depth_update(&mut self, event: DepthUpdateEvent) {
        if event.symbol != self.symbol {
            debug!(
                "Ignoring depth update for {} on the {} feed",
                event.symbol, self.symbol
            );
            return;
        }

        let diff = match DepthDiff::try_from(event) {
            Ok(diff) => diff,
            Err(e) => {
                // An undecodable batch means its update ids are lost to us;
                // the book must rebuild from a snapshot.
                warn!("Undecodable depth update for {}: {}", self.symbol, e);
                self.book.force_resync(ResyncReason::MalformedDiff);
                self.start_resync().await;
                return;
            }
        };

        self.log_significant_changes(&diff);

        match self.book.apply_diff(&diff) {
            ApplyOutcome::Applied => {
                debug!(
                    symbol = %self.symbol,
                    watermark = self.book.watermark(),
                    best_bid = ?self.book.best_bid().map(|l| l.price),
                    best_ask = ?self.book.best_ask().map(|l| l.price),
                    "depth diff applied"
                );
                self.emit(FeedEvent::BookUpdated {
                    symbol: self.symbol.clone(),
                    best_bid: self.book.best_bid(),
                    best_ask: self.book.best_ask(),
                    watermark: self.book.watermark(),
                });
            }
            ApplyOutcome::Discarded(reason) => {
                debug!("Discarded depth diff for {}: {:?}", self.symbol, reason);
            }
            ApplyOutcome::ResyncNeeded(reason) => {
                warn!("Resync required for {}: {:?}", self.symbol, reason);
                self.start_resync().await;
            }
        }
    }

    /// Log levels whose quantity moved by more than the configured
    /// threshold. Runs against the pre-merge book, so the old quantity is
    /// still visible.
    fn log_significant_changes(&self, diff: &DepthDiff) {
        let threshold = self.settings.qty_change_log_threshold;
        if threshold <= 0.0 {
            return;
        }

        let sides = [
            ("BID", &diff.bids, self.book.bids()),
            ("ASK", &diff.asks, self.book.asks()),
        ];
        for (label, deltas, ladder) in sides {
            for delta in deltas.iter() {
                let old_qty = ladder.quantity_at(delta.price).unwrap_or(0.0);
                let change = delta.quantity - old_qty;
                if change.abs() > threshold {
                    info!(
                        "[{}] {} price {:.8}: quantity {:+.8} ({:.8} -> {:.8})",
                        self.symbol, label, delta.price, change, old_qty, delta.quantity
                    );
                }
            }
        }
    }

    /// The resync protocol: the book is already in resync and dropping
    /// diffs; fetch and load a fresh snapshot, then let the stream resume.
    async fn start_resync(&mut self) {
        self.emit(FeedEvent::ConnectionStatus {
            symbol: self.symbol.clone(),
            status: ConnectionStatus::Reconnecting,
        });
        match self.load_snapshot().await {
            Ok(()) => {
                self.emit(FeedEvent::Resynced {
                    symbol: self.symbol.clone(),
                    last_update_id: self.book.watermark(),
                });
            }
            Err(e) => {
                error!("Resync failed for {}: {}", self.symbol, e);
                self.emit_error(format!("resync failed: {e}"));
            }
        }
    }

    /// Fetch a snapshot with bounded retries and load it into the book.
    async fn load_snapshot(&mut self) -> Result<()> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.settings.resync_timeout),
            ..ExponentialBackoff::default()
        };

        let limit = self.settings.snapshot_limit;
        let rest = &self.rest;
        let msg = backoff::future::retry(policy, || {
            let symbol = self.symbol.clone();
            async move {
                rest.get_depth_snapshot(&symbol, limit)
                    .await
                    .map_err(|e| backoff::Error::transient(anyhow!(e)))
            }
        })
        .await
        .with_context(|| format!("snapshot fetch exhausted its budget for {}", self.symbol))?;

        let snapshot = BookSnapshot::try_from(msg)
            .map_err(|e| anyhow!("snapshot failed boundary parsing: {e}"))?;
        self.book
            .apply_snapshot(snapshot)
            .map_err(|e| anyhow!("snapshot rejected: {e}"))?;

        info!(
            symbol = %self.symbol,
            watermark = self.book.watermark(),
            bids = self.book.bids().len(),
            asks = self.book.asks().len(),
            "snapshot loaded"
        );
        self.emit(FeedEvent::BookUpdated {
            symbol: self.symbol.clone(),
            best_bid: self.book.best_bid(),
            best_ask: self.book.best_ask(),
            watermark: self.book.watermark(),
        });
        Ok(())
    }

    /// Reconnect the stream, then rebuild the book: a transport restart
    /// always loses an unknown span of diffs.
    async fn reconnect(&mut self) -> Result<()> {
        self.ws.reconnect().await?;
        self.ws
            .subscribe_depth(&self.symbol, Some(self.settings.depth_update_speed_ms))
            .await?;
        self.book.force_resync(ResyncReason::ConnectionLost);
        self.load_snapshot().await?;
        self.emit(FeedEvent::Resynced {
            symbol: self.symbol.clone(),
            last_update_id: self.book.watermark(),
        });
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    fn emit(&self, event: FeedEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event receiver dropped for {}", self.symbol);
        }
    }

    fn emit_error(&self, error: String) {
        self.emit(FeedEvent::Error {
            symbol: self.symbol.clone(),
            error,
        });
    }
}
