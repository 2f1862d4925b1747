//! Binance REST API client implementation

use std::time::Duration;

use tracing::debug;

use super::types::{DepthSnapshotMsg, RestApiError};

/// Default number of levels requested per snapshot.
pub const DEFAULT_SNAPSHOT_LIMIT: u32 = 1000;

/// Binance REST API client
pub struct BinanceRestClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl BinanceRestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Fetch a depth snapshot for `symbol` with up to `limit` levels per
    /// side.
    pub async fn get_depth_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<DepthSnapshotMsg, RestApiError> {
        if symbol.len() < 3 || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RestApiError::InvalidSymbol(symbol.to_string()));
        }

        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            limit
        );
        debug!(%url, "fetching depth snapshot");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RestApiError::HttpRequestError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RestApiError::HttpRequestError(e.to_string()))?;
        if !status.is_success() {
            return Err(RestApiError::HttpStatusError(status.as_u16(), body));
        }

        let snapshot: DepthSnapshotMsg = serde_json::from_str(&body)?;
        debug!(
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "snapshot fetched"
        );
        Ok(snapshot)
    }

    /// Fetch a depth snapshot with the default level limit.
    pub async fn get_depth_snapshot_default(
        &self,
        symbol: &str,
    ) -> Result<DepthSnapshotMsg, RestApiError> {
        self.get_depth_snapshot(symbol, DEFAULT_SNAPSHOT_LIMIT).await
    }
}
