//! Binance wire types and boundary parsing.
//!
//! Everything on the wire carries prices and quantities as decimal strings.
//! They are parsed into finite typed numbers here, at the boundary; the
//! book core never sees a string.

use serde::{Deserialize, Serialize};

use crate::book::{BookSnapshot, DepthDiff, PriceLevel};

/// Connection status for the WebSocket transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error(String),
}

/// Depth diff event from the `<symbol>@depth` stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepthUpdateEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

/// Depth snapshot from the REST `/api/v3/depth` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshotMsg {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// WebSocket subscription request.
#[derive(Debug, Serialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: u64,
}

impl SubscribeRequest {
    pub fn new(symbol: &str, stream_type: &str) -> Self {
        let stream_name = format!("{}@{}", symbol.to_lowercase(), stream_type);
        Self {
            method: "SUBSCRIBE".to_string(),
            params: vec![stream_name],
            id: 1,
        }
    }
}

/// WebSocket unsubscribe request.
#[derive(Debug, Serialize)]
pub struct UnsubscribeRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: u64,
}

impl UnsubscribeRequest {
    pub fn new(symbol: &str, stream_type: &str) -> Self {
        let stream_name = format!("{}@{}", symbol.to_lowercase(), stream_type);
        Self {
            method: "UNSUBSCRIBE".to_string(),
            params: vec![stream_name],
            id: 1,
        }
    }
}

/// WebSocket response envelope for subscribe/unsubscribe acks.
#[derive(Debug, Deserialize)]
pub struct StreamResponse {
    pub result: Option<serde_json::Value>,
    pub id: Option<u64>,
    pub error: Option<serde_json::Value>,
}

/// A decoded message from the depth stream.
#[derive(Debug)]
pub enum StreamMessage {
    DepthUpdate(DepthUpdateEvent),
    Response(StreamResponse),
    Ping(Vec<u8>),
    Pong,
}

/// A wire field could not be converted into a typed record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    #[error("unparseable price '{0}'")]
    Price(String),
    #[error("unparseable quantity '{0}'")]
    Quantity(String),
    #[error("non-finite number '{0}' on the wire")]
    NonFinite(String),
}

fn parse_decimal(text: &str, err: fn(String) -> WireError) -> Result<f64, WireError> {
    let value = text.parse::<f64>().map_err(|_| err(text.to_string()))?;
    if !value.is_finite() {
        return Err(WireError::NonFinite(text.to_string()));
    }
    Ok(value)
}

/// Decode `[price, quantity]` string pairs into typed levels.
pub fn parse_levels(entries: &[[String; 2]]) -> Result<Vec<PriceLevel>, WireError> {
    entries
        .iter()
        .map(|entry| {
            Ok(PriceLevel::new(
                parse_decimal(&entry[0], WireError::Price)?,
                parse_decimal(&entry[1], WireError::Quantity)?,
            ))
        })
        .collect()
}

impl TryFrom<DepthSnapshotMsg> for BookSnapshot {
    type Error = WireError;

    fn try_from(msg: DepthSnapshotMsg) -> Result<Self, Self::Error> {
        Ok(BookSnapshot {
            last_update_id: msg.last_update_id,
            bids: parse_levels(&msg.bids)?,
            asks: parse_levels(&msg.asks)?,
        })
    }
}

impl TryFrom<DepthUpdateEvent> for DepthDiff {
    type Error = WireError;

    fn try_from(event: DepthUpdateEvent) -> Result<Self, Self::Error> {
        Ok(DepthDiff {
            first_update_id: event.first_update_id,
            final_update_id: event.final_update_id,
            bids: parse_levels(&event.bids)?,
            asks: parse_levels(&event.asks)?,
        })
    }
}

/// Error types for WebSocket operations.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum WebSocketError {
    #[error("WebSocket connection error: {0}")]
    ConnectionError(String),
    #[error("WebSocket message error: {0}")]
    MessageError(String),
    #[error("Subscription error: {0}")]
    SubscriptionError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl WebSocketError {
    /// True when the transport itself is suspect and a reconnect (followed
    /// by a book resync) is warranted; parse failures of a single frame
    /// are not connection-level problems.
    pub fn requires_reconnection(&self) -> bool {
        match self {
            WebSocketError::ConnectionError(_)
            | WebSocketError::IoError(_)
            | WebSocketError::MessageError(_)
            | WebSocketError::SubscriptionError(_) => true,
            WebSocketError::ParseError(_) | WebSocketError::JsonError(_) => false,
        }
    }
}

/// Error types for REST API operations.
#[derive(Debug, thiserror::Error)]
pub enum RestApiError {
    #[error("HTTP request error: {0}")]
    HttpRequestError(String),
    #[error("HTTP status error: {0} - {1}")]
    HttpStatusError(u16, String),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_update_event_parses_from_stream_json() {
        let raw = r#"{
            "e": "depthUpdate",
            "E": 1672515782136,
            "s": "BTCUSDT",
            "U": 157,
            "u": 160,
            "b": [["0.0024", "10"]],
            "a": [["0.0026", "100"], ["0.0027", "0"]]
        }"#;

        let event: DepthUpdateEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.symbol, "BTCUSDT");
        assert_eq!(event.first_update_id, 157);
        assert_eq!(event.final_update_id, 160);

        let diff = DepthDiff::try_from(event).unwrap();
        assert_eq!(diff.bids, vec![PriceLevel::new(0.0024, 10.0)]);
        assert_eq!(diff.asks[1].quantity, 0.0);
    }

    #[test]
    fn snapshot_parses_from_rest_json() {
        let raw = r#"{
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        }"#;

        let msg: DepthSnapshotMsg = serde_json::from_str(raw).unwrap();
        let snapshot = BookSnapshot::try_from(msg).unwrap();
        assert_eq!(snapshot.last_update_id, 1027024);
        assert_eq!(snapshot.bids, vec![PriceLevel::new(4.0, 431.0)]);
    }

    #[test]
    fn non_numeric_and_non_finite_fields_are_rejected() {
        assert_eq!(
            parse_levels(&[["abc".to_string(), "1".to_string()]]),
            Err(WireError::Price("abc".to_string()))
        );
        assert_eq!(
            parse_levels(&[["1.0".to_string(), "x".to_string()]]),
            Err(WireError::Quantity("x".to_string()))
        );
        // "1e999" parses to infinity; it must not reach the core.
        assert_eq!(
            parse_levels(&[["1e999".to_string(), "1".to_string()]]),
            Err(WireError::NonFinite("1e999".to_string()))
        );
    }

    #[test]
    fn subscribe_request_formats_stream_name() {
        let request = SubscribeRequest::new("BTCUSDT", "depth@100ms");
        assert_eq!(request.method, "SUBSCRIBE");
        assert_eq!(request.params, vec!["btcusdt@depth@100ms"]);
    }
}
