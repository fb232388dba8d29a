//! Cadence Trader
//!
//! Synchronizes streamed bars across a watchlist, maintains aggregated
//! history, and runs trading algorithms on a wall-clock cadence.

mod algo;
mod api;
mod config;
mod engine;
mod error;
mod models;
mod storage;
mod trader;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{DummyStreamer, PaperBroker};
use crate::config::AppConfig;
use crate::models::Interval;
use crate::storage::{MemoryStorage, SqliteStorage, Storage};
use crate::trader::Trader;

/// Bar synchronization and algorithm scheduling engine.
#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Run trading algorithms on synchronized multi-symbol bars", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL
    #[arg(short, long, env = "CADENCE_DATABASE", default_value = "sqlite:./cadence.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "CADENCE_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trader against the simulated streamer and paper broker
    Run {
        /// Comma-separated watchlist, overriding the config file
        #[arg(short, long, env = "CADENCE_SYMBOLS", value_delimiter = ',')]
        symbols: Vec<String>,

        /// Trader interval (1MIN, 5MIN, 15MIN, 30MIN, 1HR, 1DAY)
        #[arg(short, long)]
        interval: Option<Interval>,

        /// Comma-separated aggregation intervals
        #[arg(short, long, value_delimiter = ',')]
        aggregations: Vec<Interval>,

        /// Bundled algorithms to run (watch, sma-cross)
        #[arg(long = "algo", value_delimiter = ',', default_value = "watch")]
        algos: Vec<String>,

        /// Straggler deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Keep history in memory instead of the database
        #[arg(long)]
        memory: bool,

        /// Stop after a single period
        #[arg(long)]
        once: bool,

        /// Seed for the simulated market
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Show stored bars for a symbol
    History {
        symbol: String,

        /// Interval to show; the finest stored one if omitted
        #[arg(short, long)]
        interval: Option<Interval>,

        /// Number of most recent bars
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the equity curve and transaction log
    Equity {
        /// Number of most recent equity points
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut app = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Run {
            symbols,
            interval,
            aggregations,
            algos,
            timeout_ms,
            memory,
            once,
            seed,
        } => {
            if !symbols.is_empty() {
                app.trader.watchlist = symbols;
            }
            if let Some(interval) = interval {
                app.trader.interval = interval;
            }
            if !aggregations.is_empty() {
                app.trader.aggregations = aggregations;
            }
            if let Some(ms) = timeout_ms {
                app.trader.timeout_ms = ms;
            }

            let storage: Arc<dyn Storage> = if memory {
                Arc::new(MemoryStorage::new())
            } else {
                Arc::new(SqliteStorage::new(&cli.database).await?)
            };
            let streamer = Arc::new(DummyStreamer::new(&app.simulation, seed));
            let broker = Arc::new(PaperBroker::new(app.simulation.starting_cash));

            let trader = Trader::new(app.trader.clone(), streamer, broker, storage);
            for name in &algos {
                let strategy = algo::bundled(name).with_context(|| {
                    format!("Unknown algorithm '{}', expected one of {:?}", name, algo::BUNDLED)
                })?;
                trader.add_algo(strategy).await?;
            }

            info!(
                symbols = ?app.trader.watchlist,
                interval = %app.trader.interval,
                algorithms = ?algos,
                "Starting trader"
            );

            println!("\n=== Cadence Trader ===");
            println!("Watchlist:  {}", app.trader.watchlist.join(", "));
            println!("Interval:   {}", app.trader.interval);
            println!("Algorithms: {}", algos.join(", "));
            println!("Cash:       ${}", app.simulation.starting_cash);
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = trader.run(once).await {
                tracing::error!(error = %e, "Trader stopped");
                return Err(e.into());
            }

            let snap = trader.snapshot().await;
            println!("\nCycles:     {}", snap.cycles);
            println!("Cash:       ${:.2}", snap.portfolio.account.cash);
            println!("Equity:     ${:.2}", snap.portfolio.account.equity);
            println!("Open orders: {}", snap.orders.len());
            println!("Active:     {}", snap.active_algos.join(", "));
        }

        Commands::History {
            symbol,
            interval,
            limit,
            json,
        } => {
            let storage = SqliteStorage::new(&cli.database).await?;
            let bars = storage.load(&symbol, interval).await?;
            let recent = &bars[bars.len().saturating_sub(limit)..];

            if json {
                println!("{}", serde_json::to_string_pretty(recent)?);
                return Ok(());
            }

            if recent.is_empty() {
                println!("No bars stored for {}.", symbol);
                return Ok(());
            }

            println!(
                "\n{:<22} {:>12} {:>12} {:>12} {:>12} {:>14}",
                "TIMESTAMP", "OPEN", "HIGH", "LOW", "CLOSE", "VOLUME"
            );
            println!("{}", "-".repeat(90));
            for bar in recent {
                println!(
                    "{:<22} {:>12} {:>12} {:>12} {:>12} {:>14}",
                    bar.timestamp.format("%Y-%m-%d %H:%M"),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                );
            }
        }

        Commands::Equity { limit } => {
            let storage = SqliteStorage::new(&cli.database).await?;
            let curve = storage.equity_curve(limit).await?;

            println!("\n=== Equity Curve ===\n");
            println!("{:<22} {:>14} {:>14}", "TIMESTAMP", "CASH", "EQUITY");
            println!("{}", "-".repeat(52));
            for point in &curve {
                println!(
                    "{:<22} {:>14.2} {:>14.2}",
                    point.timestamp.format("%Y-%m-%d %H:%M"),
                    point.cash,
                    point.equity
                );
            }

            if let (Some(first), Some(last)) = (curve.first(), curve.last()) {
                let change = last.equity - first.equity;
                let pct = if first.equity.is_zero() {
                    Decimal::ZERO
                } else {
                    change / first.equity * Decimal::from(100)
                };
                println!("\nChange: ${:.2} ({:.2}%)", change, pct);
            }

            let transactions = storage.transactions().await?;
            println!("\n=== Transactions ({}) ===\n", transactions.len());
            for tx in transactions.iter().rev().take(limit) {
                println!(
                    "{:<22} {:<5} {:<7} {:<22} {:>10}  {}",
                    tx.timestamp.format("%Y-%m-%d %H:%M"),
                    tx.side.as_str(),
                    tx.asset_class.as_str(),
                    tx.symbol,
                    tx.quantity,
                    tx.order_id
                );
            }
        }

        Commands::Config => {
            let trader = &app.trader;
            let sim = &app.simulation;

            println!("\n=== Trader Configuration ===\n");
            println!("  Watchlist:          {}", trader.watchlist.join(", "));
            println!("  Interval:           {}", trader.interval);
            println!(
                "  Aggregations:       {}",
                trader
                    .aggregations
                    .iter()
                    .map(|i| i.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("  Timeout:            {}ms", trader.timeout_ms);
            println!("  Daily Cutoff:       {} UTC", trader.daily_cutoff);
            println!("  Sync:               {}", trader.sync);
            println!("  Cred Refresh:       every {}h", trader.cred_refresh_hours);

            println!("\n=== Simulation ===\n");
            println!("  Starting Cash:      ${}", sim.starting_cash);
            println!("  Tick:               {}ms", sim.tick_ms);
            println!("  Dropout:            {:.1}%", sim.dropout * 100.0);
            println!("  History:            {} minutes", sim.history_minutes);

            println!("\n  Database:           {}", cli.database);
            println!("  Algorithms:         {}", algo::BUNDLED.join(", "));
        }
    }

    Ok(())
}
