//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::book::{BookConfig, GAP_WARN, MAX_DEPTH};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Trading symbol to track
    pub symbol: String,

    /// Number of levels per side shown by display commands
    pub display_depth: usize,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Order book tuning
    pub book: BookSettings,

    /// Binance-specific configuration
    pub binance: BinanceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BookSettings {
    /// Bound on the number of levels kept per side
    pub max_depth: usize,

    /// Update-id gap above which a warning is logged before resync
    pub gap_warn: u64,

    /// Whether the validator attempts the localized cross repair
    pub repair_crossed: bool,

    /// Quantity change above which a level update is logged; zero disables
    pub qty_change_log_threshold: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BinanceConfig {
    /// WebSocket base URL
    pub ws_url: String,

    /// REST API base URL
    pub rest_url: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Reconnect interval in milliseconds
    pub reconnect_interval_ms: u64,

    /// Maximum reconnection attempts
    pub max_reconnect_attempts: u32,

    /// Levels requested per REST snapshot
    pub snapshot_limit: u32,

    /// Depth stream update speed (100 or 1000 ms)
    pub depth_update_speed_ms: u16,

    /// Overall budget for one resync, in seconds
    pub resync_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Absolute or relative path to the rolling log file; empty disables
    /// file logging
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            display_depth: 10,
            log_level: "info".to_string(),
            log: LogConfig::default(),
            book: BookSettings::default(),
            binance: BinanceConfig::default(),
        }
    }
}

impl Default for BookSettings {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            gap_warn: GAP_WARN,
            repair_crossed: true,
            qty_change_log_threshold: 10.0,
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.binance.com:9443".to_string(),
            rest_url: "https://api.binance.com".to_string(),
            timeout_seconds: 10,
            reconnect_interval_ms: 1000,
            max_reconnect_attempts: 10,
            snapshot_limit: 1000,
            depth_update_speed_ms: 100,
            resync_timeout_secs: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/bookstream.log".to_string(),
        }
    }
}

impl From<&BookSettings> for BookConfig {
    fn from(settings: &BookSettings) -> Self {
        Self {
            max_depth: settings.max_depth,
            gap_warn: settings.gap_warn,
            repair_crossed: settings.repair_crossed,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // BOOKSTREAM_SYMBOL - trading symbol
        if let Ok(symbol) = env::var("BOOKSTREAM_SYMBOL") {
            if !symbol.trim().is_empty() {
                self.symbol = symbol.trim().to_string();
            }
        }

        // BOOKSTREAM_DISPLAY_DEPTH - displayed levels per side
        if let Ok(depth) = env::var("BOOKSTREAM_DISPLAY_DEPTH") {
            if let Ok(value) = depth.parse::<usize>() {
                self.display_depth = value;
            }
        }

        // BOOKSTREAM_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("BOOKSTREAM_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // BOOKSTREAM_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("BOOKSTREAM_LOG_FILE_PATH") {
            self.log.file_path = file_path;
        }

        // Book-specific environment variables
        // BOOKSTREAM_BOOK_MAX_DEPTH - per-side level bound
        if let Ok(depth) = env::var("BOOKSTREAM_BOOK_MAX_DEPTH") {
            if let Ok(value) = depth.parse::<usize>() {
                self.book.max_depth = value;
            }
        }

        // BOOKSTREAM_BOOK_GAP_WARN - gap warning threshold
        if let Ok(gap) = env::var("BOOKSTREAM_BOOK_GAP_WARN") {
            if let Ok(value) = gap.parse::<u64>() {
                self.book.gap_warn = value;
            }
        }

        // BOOKSTREAM_BOOK_REPAIR_CROSSED - cross repair switch
        if let Ok(repair) = env::var("BOOKSTREAM_BOOK_REPAIR_CROSSED") {
            self.book.repair_crossed = repair.parse().unwrap_or(self.book.repair_crossed);
        }

        // Binance-specific environment variables
        // BOOKSTREAM_BINANCE_WS_URL - WebSocket URL
        if let Ok(ws_url) = env::var("BOOKSTREAM_BINANCE_WS_URL") {
            self.binance.ws_url = ws_url;
        }

        // BOOKSTREAM_BINANCE_REST_URL - REST API URL
        if let Ok(rest_url) = env::var("BOOKSTREAM_BINANCE_REST_URL") {
            self.binance.rest_url = rest_url;
        }

        // BOOKSTREAM_BINANCE_TIMEOUT_SECONDS - request timeout
        if let Ok(timeout) = env::var("BOOKSTREAM_BINANCE_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.binance.timeout_seconds = value;
            }
        }

        // BOOKSTREAM_BINANCE_SNAPSHOT_LIMIT - snapshot levels per side
        if let Ok(limit) = env::var("BOOKSTREAM_BINANCE_SNAPSHOT_LIMIT") {
            if let Ok(value) = limit.parse::<u32>() {
                self.binance.snapshot_limit = value;
            }
        }

        // BOOKSTREAM_BINANCE_RESYNC_TIMEOUT_SECS - resync budget
        if let Ok(timeout) = env::var("BOOKSTREAM_BINANCE_RESYNC_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.binance.resync_timeout_secs = value;
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() || self.symbol.len() < 3 {
            anyhow::bail!("Invalid symbol format: {}", self.symbol);
        }

        if self.display_depth == 0 {
            anyhow::bail!("Display depth must be greater than 0");
        }

        if self.book.max_depth == 0 {
            anyhow::bail!("book.max_depth must be greater than 0");
        }

        if self.binance.timeout_seconds == 0 {
            anyhow::bail!("Timeout must be greater than 0");
        }

        if self.binance.resync_timeout_secs == 0 {
            anyhow::bail!("binance.resync_timeout_secs must be greater than 0");
        }

        match self.binance.depth_update_speed_ms {
            100 | 1000 => {}
            other => anyhow::bail!("Unsupported depth update speed: {}ms", other),
        }

        Ok(())
    }

    /// Normalize symbol format for the Binance API
    pub fn normalize_symbol(symbol: &str) -> String {
        // Convert BTC-USDT to BTCUSDT format
        symbol.replace('-', "").to_uppercase()
    }
}
