use std::time::Duration;

use colored::Colorize;
use tokio::sync::mpsc;

use bookstream::binance::BinanceRestClient;
use bookstream::book::{BookConfig, BookSnapshot, OrderBook, PriceLevel};
use bookstream::cli::{Cli, Commands, ConfigAction};
use bookstream::config::Config;
use bookstream::feed::{BookFeed, ControlMessage, FeedEvent};
use bookstream::{AppResult, init_logging};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();
    let config = Config::load_or_default(&cli.config_file);

    let _log_guard = init_logging(&cli.effective_log_level(), &config.log)?;

    tracing::info!("Bookstream starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    match cli.command {
        Commands::Run { symbol } => handle_run(symbol, config).await,
        Commands::Snapshot { symbol, limit } => handle_snapshot(symbol, limit, &config).await,
        Commands::Config { action } => handle_config(action, &cli.config_file).await,
    }
}

async fn handle_run(symbol: Option<String>, config: Config) -> AppResult<()> {
    let symbol = Config::normalize_symbol(symbol.as_deref().unwrap_or(&config.symbol));
    tracing::info!("Running live book feed for {}", symbol);

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut feed = BookFeed::new(symbol.clone(), &config, control_rx, event_tx);
    feed.initialize().await?;
    let feed_task = tokio::spawn(feed.run());

    // Ctrl-C becomes a shutdown message into the feed loop; nothing is torn
    // down from the signal context itself.
    let shutdown_tx = control_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
            let _ = shutdown_tx.send(ControlMessage::Shutdown);
        }
    });

    // The event channel closes when the feed loop exits.
    while let Some(event) = event_rx.recv().await {
        print_feed_event(&event);
    }

    feed_task.await?;
    tracing::info!("Feed for {} stopped", symbol);
    Ok(())
}

fn print_feed_event(event: &FeedEvent) {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match event {
        FeedEvent::BookUpdated {
            symbol,
            best_bid,
            best_ask,
            watermark,
        } => {
            println!(
                "[{}] {} bid {} | ask {} (u={})",
                now,
                symbol,
                format_level(best_bid).green(),
                format_level(best_ask).red(),
                watermark
            );
        }
        FeedEvent::Resynced {
            symbol,
            last_update_id,
        } => {
            println!(
                "[{}] {} {} at update id {}",
                now,
                symbol,
                "resynced".yellow(),
                last_update_id
            );
        }
        FeedEvent::ConnectionStatus { symbol, status } => {
            println!("[{}] {} connection: {:?}", now, symbol, status);
        }
        FeedEvent::Error { symbol, error } => {
            eprintln!("[{}] {} {}: {}", now, symbol, "error".red().bold(), error);
        }
    }
}

fn format_level(level: &Option<PriceLevel>) -> String {
    match level {
        Some(level) => format!("{:.8} x {:.8}", level.price, level.quantity),
        None => "unavailable".to_string(),
    }
}

async fn handle_snapshot(symbol: String, limit: Option<u32>, config: &Config) -> AppResult<()> {
    let symbol = Config::normalize_symbol(&symbol);
    let limit = limit.unwrap_or(config.binance.snapshot_limit);
    tracing::info!("Fetching snapshot for {} (limit {})", symbol, limit);

    let rest = BinanceRestClient::with_timeout(
        config.binance.rest_url.clone(),
        Duration::from_secs(config.binance.timeout_seconds),
    );
    let msg = rest.get_depth_snapshot(&symbol, limit).await?;
    let snapshot = BookSnapshot::try_from(msg)?;

    let mut book = OrderBook::new(BookConfig::from(&config.book));
    book.apply_snapshot(snapshot)?;

    println!(
        "{} snapshot at update id {}",
        symbol.bold(),
        book.watermark()
    );
    let (bids, asks) = book.top_levels(config.display_depth);
    println!(
        "{:>18} {:>18} | {:<18} {:<18}",
        "bid qty", "bid", "ask", "ask qty"
    );
    for i in 0..bids.len().max(asks.len()) {
        let bid = match bids.get(i) {
            Some(level) => format!("{:>18.8} {:>18.8}", level.quantity, level.price)
                .green()
                .to_string(),
            None => format!("{:>37}", ""),
        };
        let ask = match asks.get(i) {
            Some(level) => format!("{:<18.8} {:<18.8}", level.price, level.quantity)
                .red()
                .to_string(),
            None => String::new(),
        };
        println!("{} | {}", bid, ask);
    }
    if let (Some(spread), Some(mid)) = (book.spread(), book.mid()) {
        println!("spread {:.8}  mid {:.8}", spread, mid);
    }

    Ok(())
}

async fn handle_config(action: Option<ConfigAction>, config_file: &str) -> AppResult<()> {
    tracing::info!("Handling config action: {:?}", action);

    match action {
        Some(ConfigAction::Show) => {
            let config = Config::load_or_default(config_file);
            println!("Configuration from: {}", config_file);
            println!("{} = {}", "symbol".bold(), config.symbol);
            println!("{} = {}", "display_depth".bold(), config.display_depth);
            println!("{} = {}", "log_level".bold(), config.log_level);
            println!("{} = {}", "log.file_path".bold(), config.log.file_path);
            println!("\nBook configuration:");
            println!("{} = {}", "max_depth".bold(), config.book.max_depth);
            println!("{} = {}", "gap_warn".bold(), config.book.gap_warn);
            println!(
                "{} = {}",
                "repair_crossed".bold(),
                config.book.repair_crossed
            );
            println!(
                "{} = {}",
                "qty_change_log_threshold".bold(),
                config.book.qty_change_log_threshold
            );
            println!("\nBinance configuration:");
            println!("{} = {}", "ws_url".bold(), config.binance.ws_url);
            println!("{} = {}", "rest_url".bold(), config.binance.rest_url);
            println!(
                "{} = {} s",
                "timeout_seconds".bold(),
                config.binance.timeout_seconds
            );
            println!(
                "{} = {}",
                "snapshot_limit".bold(),
                config.binance.snapshot_limit
            );
            println!(
                "{} = {} ms",
                "depth_update_speed_ms".bold(),
                config.binance.depth_update_speed_ms
            );
            println!(
                "{} = {} s",
                "resync_timeout_secs".bold(),
                config.binance.resync_timeout_secs
            );
        }
        Some(ConfigAction::Set { key, value }) => {
            println!("Setting {}={}", key, value);
            println!("Configuration modification via CLI is not implemented yet.");
            println!("Please edit the config file directly: {}", config_file);
        }
        Some(ConfigAction::Reset) => {
            let default_config = Config::default();
            default_config.save_to_file(config_file)?;
            println!(
                "Configuration reset to defaults and saved to: {}",
                config_file
            );
        }
        None => {
            println!("Configuration management");
            println!("Use 'bookstream config show' to view current configuration");
            println!("Use 'bookstream config reset' to restore defaults");
            println!("\nEnvironment variables can override config:");
            println!("  BOOKSTREAM_SYMBOL=ETHUSDT");
            println!("  BOOKSTREAM_BOOK_MAX_DEPTH=1000");
            println!("  BOOKSTREAM_LOG_LEVEL=debug");
        }
    }

    Ok(())
}
