//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for bookstream.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bookstream")]
#[command(about = "Bookstream order book monitor")]
#[command(long_about = "Maintains a local order book from a Binance depth-diff stream")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the live order book feed until interrupted
    Run {
        /// Trading symbol (e.g. BTC-USDT); defaults to the configured one
        symbol: Option<String>,
    },

    /// Fetch one REST snapshot and print the top of the book
    Snapshot {
        /// Trading symbol to fetch
        symbol: String,

        /// Levels to request per side
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_default_symbol() {
        let cli = Cli::try_parse_from(["bookstream", "run"]).unwrap();
        match cli.command {
            Commands::Run { symbol } => assert!(symbol.is_none()),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_snapshot_command() {
        let cli =
            Cli::try_parse_from(["bookstream", "snapshot", "BTC-USDT", "--limit", "50"]).unwrap();
        match cli.command {
            Commands::Snapshot { symbol, limit } => {
                assert_eq!(symbol, "BTC-USDT");
                assert_eq!(limit, Some(50));
            }
            _ => panic!("Expected Snapshot command"),
        }
    }

    #[test]
    fn test_verbose_flag() {
        let cli = Cli::try_parse_from(["bookstream", "--verbose", "run"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.effective_log_level(), "debug");
    }
}
