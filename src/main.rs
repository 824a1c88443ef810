use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tickbot::config::{Settings, DEFAULT_CONFIG_FILE};
use tickbot::gateway::BybitGateway;
use tickbot::journal::{read_recent, JsonlJournal, TradeSummary};
use tickbot::{EngineConfig, Supervisor};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "tickbot", about = "Tick-driven momentum trading bot for Bybit spot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade the configured pairs until Ctrl+C.
    Run {
        /// Settings file (TOML). Missing file means defaults + environment.
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Trade these pairs instead of the configured ones (repeatable).
        #[arg(long = "pair")]
        pairs: Vec<String>,
    },
    /// Print recent trade records and a summary.
    Trades {
        /// Journal file. Defaults to the configured journal path.
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Number of records to show.
        #[arg(long, default_value_t = 20)]
        last: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, pairs } => run(&config, pairs).await,
        Commands::Trades { journal, last } => {
            let journal = match journal {
                Some(path) => path,
                None => Settings::load(Path::new(DEFAULT_CONFIG_FILE))?.journal_path,
            };
            print_trades(&journal, last)
        }
    }
}

async fn run(config_path: &Path, pairs: Vec<String>) -> Result<()> {
    let mut settings = Settings::load(config_path)?;
    if !pairs.is_empty() {
        settings.pairs = pairs;
        settings.validate()?;
    }

    tracing::info!(
        "🚀 tickbot starting ({})",
        if settings.exchange.testnet { "testnet" } else { "MAINNET" }
    );

    let gateway = BybitGateway::new(settings.bybit_config())
        .context("Failed to create Bybit client")?;
    let journal = JsonlJournal::new(&settings.journal_path);
    tracing::info!("Trade journal: {}", journal.path().display());

    let mut supervisor = Supervisor::new(
        EngineConfig::from(&settings),
        Arc::new(gateway),
        Arc::new(journal),
    );

    for symbol in settings.symbols() {
        if let Err(e) = supervisor.start_symbol(&symbol).await {
            tracing::error!(symbol = %symbol, "Failed to start session: {}", e);
        }
    }

    if supervisor.symbols().is_empty() {
        bail!("No session could be started");
    }
    tracing::info!("✓ Trading {}", supervisor.symbols().join(", "));

    let mut status_timer = interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    status_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    status_timer.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = status_timer.tick() => log_status(&supervisor),
        }
    }

    for snapshot in supervisor.stop_all().await {
        tracing::info!(
            symbol = %snapshot.symbol,
            in_position = snapshot.position.is_open(),
            "Session stopped"
        );
    }

    let risk = supervisor.risk();
    tracing::info!(
        daily_pnl_pct = %format!("{:.2}", risk.daily_pnl_pct),
        halted = risk.trading_halted,
        "Shutdown complete"
    );
    Ok(())
}

fn log_status(supervisor: &Supervisor) {
    let risk = supervisor.risk();
    if risk.trading_halted {
        tracing::warn!(
            daily_pnl_pct = %format!("{:.2}", risk.daily_pnl_pct),
            "🛑 Trading halted by drawdown limit"
        );
    }

    for snapshot in supervisor.status() {
        let position = match snapshot.position.as_open() {
            Some(open) => format!(
                "open {} @ {} (stop {:.4})",
                open.quantity, open.entry_price, open.trailing_stop_price
            ),
            None => "flat".to_string(),
        };
        tracing::info!(
            symbol = %snapshot.symbol,
            active = snapshot.active,
            samples = snapshot.window_len,
            "📊 {} | last {:?} | {}",
            snapshot.symbol,
            snapshot.last_price,
            position
        );
    }
}

fn print_trades(path: &Path, last: usize) -> Result<()> {
    let records = read_recent(path, last)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

    if records.is_empty() {
        println!("No trades recorded in {}", path.display());
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:<5} {:<9} {:>12} {:>12} {:>12} {:>10}  Reason",
        "Time", "Symbol", "Side", "Status", "Qty", "Entry", "Exit", "PnL"
    );
    for record in &records {
        println!(
            "{:<20} {:<10} {:<5} {:<9} {:>12} {:>12} {:>12} {:>10}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.symbol,
            record.side.to_string(),
            format!("{:?}", record.status),
            record.quantity,
            record.entry_price,
            record
                .exit_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record
                .pnl
                .map(|p| format!("{:.4}", p))
                .unwrap_or_else(|| "-".to_string()),
            record.reason
        );
    }

    let summary = TradeSummary::from_records(&records);
    println!();
    println!("Entries:      {}", summary.entries);
    println!(
        "Exits:        {} ({} wins / {} losses, {:.1}% win rate)",
        summary.exits,
        summary.wins,
        summary.losses,
        summary.win_rate()
    );
    println!("Rejected:     {}", summary.rejected);
    println!("Realized PnL: {:.4}", summary.realized_pnl);
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tickbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
