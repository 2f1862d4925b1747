//! Binance API integration module
//!
//! Handles WebSocket connections, REST API calls, and wire-format parsing.
//! The book core consumes only the typed records produced here.

pub mod rest;
pub mod types;
pub mod websocket;

// Re-export commonly used types
pub use rest::BinanceRestClient;
pub use types::*;
pub use websocket::BinanceWebSocket;
