//! Binance WebSocket client implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use backoff::ExponentialBackoff;
use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, warn};

use super::types::{
    ConnectionStatus, DepthUpdateEvent, StreamMessage, StreamResponse, SubscribeRequest,
    UnsubscribeRequest, WebSocketError,
};

/// Binance WebSocket client for the depth-diff stream
pub struct BinanceWebSocket {
    url: String,
    status: Arc<Mutex<ConnectionStatus>>,
    connection: Arc<Mutex<Option<WebSocketStream<MaybeTlsStream<TcpStream>>>>>,
    message_tx: mpsc::Sender<Result<StreamMessage, WebSocketError>>,
}

impl BinanceWebSocket {
    /// Create a new client together with the receiving end of its message
    /// pump.
    pub fn new(
        url: impl Into<String>,
    ) -> (Self, mpsc::Receiver<Result<StreamMessage, WebSocketError>>) {
        // Generous capacity: the 100ms depth stream bursts.
        let (message_tx, message_rx) = mpsc::channel(1000);

        let ws = Self {
            url: url.into(),
            status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            connection: Arc::new(Mutex::new(None)),
            message_tx,
        };

        (ws, message_rx)
    }

    /// Get current connection status
    pub async fn status(&self) -> ConnectionStatus {
        let status = self.status.lock().await;
        status.clone()
    }

    /// Connect to the stream endpoint
    pub async fn connect(&self) -> Result<()> {
        self.update_status(ConnectionStatus::Connecting).await;

        match connect_async(&self.url).await {
            Ok((ws_stream, _)) => {
                let mut connection = self.connection.lock().await;
                *connection = Some(ws_stream);
                self.update_status(ConnectionStatus::Connected).await;
                info!("Connected to Binance WebSocket at {}", self.url);
                Ok(())
            }
            Err(e) => {
                let error_msg = format!("Failed to connect to WebSocket: {}", e);
                self.update_status(ConnectionStatus::Error(error_msg.clone()))
                    .await;
                error!("{}", error_msg);
                Err(anyhow::anyhow!(error_msg))
            }
        }
    }

    /// Disconnect from WebSocket
    pub async fn disconnect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if let Some(mut ws) = connection.take() {
            if let Err(e) = ws.close(None).await {
                warn!("Error closing WebSocket connection: {}", e);
            }
        }

        self.update_status(ConnectionStatus::Disconnected).await;
        info!("Disconnected from Binance WebSocket");
        Ok(())
    }

    /// Subscribe to a symbol stream
    pub async fn subscribe(&self, symbol: &str, stream_type: &str) -> Result<()> {
        let subscribe_request = SubscribeRequest::new(symbol, stream_type);
        let message = serde_json::to_string(&subscribe_request)?;

        self.send_message(Message::Text(message)).await?;
        info!("Subscribed to {}@{}", symbol, stream_type);
        Ok(())
    }

    /// Unsubscribe from a symbol stream
    pub async fn unsubscribe(&self, symbol: &str, stream_type: &str) -> Result<()> {
        let unsubscribe_request = UnsubscribeRequest::new(symbol, stream_type);
        let message = serde_json::to_string(&unsubscribe_request)?;

        self.send_message(Message::Text(message)).await?;
        info!("Unsubscribed from {}@{}", symbol, stream_type);
        Ok(())
    }

    /// Subscribe to the depth-diff stream for a symbol.
    /// Binance supports two update speeds:
    /// - 1000ms: "depth"
    /// - 100ms: "depth@100ms"
    pub async fn subscribe_depth(&self, symbol: &str, update_speed_ms: Option<u16>) -> Result<()> {
        let stream_type = match update_speed_ms {
            Some(100) => "depth@100ms",
            Some(1000) | None => "depth",
            Some(speed) => {
                return Err(anyhow::anyhow!(
                    "Unsupported depth update speed: {}ms. Supported: 100ms, 1000ms",
                    speed
                ));
            }
        };

        self.subscribe(symbol, stream_type).await
    }

    /// Send a message through the WebSocket
    async fn send_message(&self, message: Message) -> Result<()> {
        let mut connection = self.connection.lock().await;
        match connection.as_mut() {
            Some(ws) => {
                ws.send(message).await?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("WebSocket not connected")),
        }
    }

    /// Start pumping incoming frames into the message channel
    pub async fn start_listening(&self) -> Result<()> {
        let connection = self.connection.clone();
        let message_tx = self.message_tx.clone();
        let status = self.status.clone();

        tokio::spawn(async move {
            loop {
                let mut connection = connection.lock().await;
                if let Some(ws) = connection.as_mut() {
                    if let Some(message) = ws.next().await {
                        match message {
                            Ok(Message::Ping(data)) => {
                                // Answer in place so the server keeps the
                                // stream alive.
                                debug!("Received ping, sending pong");
                                if let Err(e) = ws.send(Message::Pong(data.clone())).await {
                                    warn!("Failed to send pong: {}", e);
                                }
                                if message_tx.send(Ok(StreamMessage::Ping(data))).await.is_err() {
                                    break;
                                }
                            }
                            Ok(msg) => {
                                let result = Self::process_message(msg);
                                if message_tx.send(result).await.is_err() {
                                    error!("Stream consumer dropped, stopping listener");
                                    break;
                                }
                            }
                            Err(e) => {
                                let error_msg = format!("WebSocket message error: {}", e);
                                error!("{}", error_msg);
                                let mut status = status.lock().await;
                                *status = ConnectionStatus::Error(error_msg.clone());

                                if message_tx
                                    .send(Err(WebSocketError::MessageError(error_msg)))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    } else {
                        // Connection closed
                        break;
                    }
                } else {
                    // No connection, wait briefly and retry
                    drop(connection);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        });

        Ok(())
    }

    /// Decode one incoming frame
    fn process_message(msg: Message) -> Result<StreamMessage, WebSocketError> {
        match msg {
            Message::Text(text) => {
                // Depth diff events dominate the stream; try them first.
                if let Ok(event) = serde_json::from_str::<DepthUpdateEvent>(&text) {
                    debug!(
                        "Depth update: symbol={}, first_id={}, final_id={}, bids={}, asks={}",
                        event.symbol,
                        event.first_update_id,
                        event.final_update_id,
                        event.bids.len(),
                        event.asks.len()
                    );
                    return Ok(StreamMessage::DepthUpdate(event));
                }
                match serde_json::from_str::<StreamResponse>(&text) {
                    Ok(response) => {
                        if response.error.is_some() {
                            return Err(WebSocketError::SubscriptionError(format!(
                                "Subscription error: {:?}",
                                response.error
                            )));
                        }
                        Ok(StreamMessage::Response(response))
                    }
                    Err(e) => {
                        warn!("Failed to parse message: {} - {}", text, e);
                        Err(WebSocketError::ParseError(format!(
                            "Failed to parse message: {} - {}",
                            text, e
                        )))
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket connection closed");
                Err(WebSocketError::ConnectionError(
                    "Connection closed".to_string(),
                ))
            }
            Message::Pong(_) => Ok(StreamMessage::Pong),
            Message::Ping(data) => Ok(StreamMessage::Ping(data)),
            _ => Err(WebSocketError::ParseError(
                "Unsupported message type".to_string(),
            )),
        }
    }

    /// Update connection status
    async fn update_status(&self, new_status: ConnectionStatus) {
        let mut status = self.status.lock().await;
        *status = new_status;
    }

    /// Reconnect with exponential backoff
    pub async fn reconnect(&self) -> Result<()> {
        self.update_status(ConnectionStatus::Reconnecting).await;

        if let Err(e) = self.disconnect().await {
            warn!("Error disconnecting during reconnect: {}", e);
        }

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async {
            self.connect().await.map_err(backoff::Error::transient)
        })
        .await?;

        info!("Reconnected to {}", self.url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[test]
    fn test_websocket_creation() {
        let (ws, _rx) = BinanceWebSocket::new("wss://test.binance.com/ws");
        block_on(async {
            let status = ws.status().await;
            assert_eq!(status, ConnectionStatus::Disconnected);
        });
    }

    #[test]
    fn test_depth_frame_decodes_to_stream_message() {
        let raw = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":10,"u":12,"b":[["10.0","1.0"]],"a":[]}"#;
        let decoded = BinanceWebSocket::process_message(Message::Text(raw.to_string())).unwrap();
        match decoded {
            StreamMessage::DepthUpdate(event) => {
                assert_eq!(event.symbol, "BTCUSDT");
                assert_eq!(event.first_update_id, 10);
            }
            other => panic!("Expected depth update, got {:?}", other),
        }
    }

    #[test]
    fn test_subscription_ack_decodes_to_response() {
        let raw = r#"{"result":null,"id":1}"#;
        let decoded = BinanceWebSocket::process_message(Message::Text(raw.to_string())).unwrap();
        assert!(matches!(decoded, StreamMessage::Response(_)));
    }

    #[test]
    fn test_close_frame_is_a_connection_error() {
        let decoded = BinanceWebSocket::process_message(Message::Close(None));
        assert!(matches!(
            decoded,
            Err(WebSocketError::ConnectionError(_))
        ));
    }
}
