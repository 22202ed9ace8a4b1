use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use scalpbot_brokers_metatrader::MetaTraderTerminal;
use scalpbot_core::{BotEvent, SymbolInfo, Terminal, TradeMode};
use scalpbot_engine::{run_replay, BotCommand, BotConfig, BotController, ReplayConfig};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "scalpbot")]
#[command(about = "MT5 scalping bot: live trading through a terminal bridge, replay and diagnostics")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Bot configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "SCALPBOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the MT5 bridge and run the bot until Ctrl-C
    Run {
        /// Send real orders (disables shadow mode)
        #[arg(long)]
        live: bool,

        /// Execute signals automatically
        #[arg(long)]
        auto_trade: bool,
    },

    /// Replay recorded M1 bars through the bot on a simulated account
    Replay {
        /// Path to CSV data file (plain OHLC or an MT5 history export)
        #[arg(short, long)]
        data: PathBuf,

        /// Initial account balance
        #[arg(long, default_value = "10000")]
        balance: Decimal,

        /// Fixed spread in points
        #[arg(long, default_value = "20")]
        spread: u32,

        /// M1 bars consumed before the first signal
        #[arg(long, default_value = "300")]
        warmup: usize,

        /// Symbol point size
        #[arg(long, default_value = "0.01")]
        point: Decimal,

        /// Quote digits
        #[arg(long, default_value = "2")]
        digits: u32,

        /// Account-currency value of one tick for one lot
        #[arg(long, default_value = "1")]
        tick_value: Decimal,

        #[arg(long, default_value = "0.01")]
        tick_size: Decimal,

        #[arg(long, default_value = "100")]
        contract_size: Decimal,

        #[arg(long, default_value = "0.01")]
        volume_min: Decimal,

        #[arg(long, default_value = "50")]
        volume_max: Decimal,

        #[arg(long, default_value = "0.01")]
        volume_step: Decimal,

        /// Print every closed trade
        #[arg(long)]
        trades: bool,
    },

    /// Check terminal, account, symbol and history without trading
    Diagnose,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate the configuration file
    Check,
    /// Print the default configuration as TOML
    Default,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run { live, auto_trade } => {
            let mut config = load_config(cli.config.as_deref())?;
            if live {
                config.trading.shadow_mode = false;
            }
            if auto_trade {
                config.trading.auto_trading = true;
            }
            run_live(config).await?;
        }
        Commands::Replay {
            data,
            balance,
            spread,
            warmup,
            point,
            digits,
            tick_value,
            tick_size,
            contract_size,
            volume_min,
            volume_max,
            volume_step,
            trades,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let symbol = SymbolInfo {
                name: config.trading.symbol.clone(),
                point,
                digits,
                volume_min,
                volume_max,
                volume_step,
                trade_tick_value: tick_value,
                trade_tick_size: tick_size,
                trade_contract_size: contract_size,
                trade_mode: TradeMode::Full,
            };
            let mut replay = ReplayConfig::new(config, symbol, balance);
            replay.spread_points = spread;
            replay.warmup_bars = warmup;
            replay_data(&data, replay, trades).await?;
        }
        Commands::Diagnose => {
            let config = load_config(cli.config.as_deref())?;
            diagnose(config).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Check => {
                let config = load_config(cli.config.as_deref())?;
                println!("Configuration OK");
                println!("  Symbol:        {}", config.trading.symbol);
                println!("  Bridge:        {}:{}", config.terminal.host, config.terminal.port);
                println!("  Shadow mode:   {}", config.trading.shadow_mode);
                println!("  Auto trading:  {}", config.trading.auto_trading);
                println!("  Risk/trade:    {}%", config.sizing.risk_percent);
                println!("  TP/SL mode:    {:?}", config.sizing.tp_sl_mode);
            }
            ConfigCommands::Default => {
                print!("{}", BotConfig::default().to_toml_string()?);
            }
        },
    }

    Ok(())
}

fn init_tracing(level: &str, format: LogFormat, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = match format {
        LogFormat::Text => fmt::layer().with_target(false).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            Some(match format {
                LogFormat::Text => layer.boxed(),
                LogFormat::Json => layer.json().boxed(),
            })
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BotConfig> {
    let config = BotConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

async fn run_live(config: BotConfig) -> Result<()> {
    tracing::info!(
        symbol = %config.trading.symbol,
        bridge = %format!("{}:{}", config.terminal.host, config.terminal.port),
        shadow_mode = config.trading.shadow_mode,
        auto_trading = config.trading.auto_trading,
        "Starting bot"
    );

    let terminal = MetaTraderTerminal::new(config.terminal.clone());
    let mut controller = BotController::new(terminal, config)?;
    let printer = tokio::spawn(print_events(controller.subscribe()));

    controller.connect().await?;
    controller.start().await?;

    let (command_tx, command_rx) = mpsc::channel::<BotCommand>(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
        }
        let _ = shutdown_tx.send(true);
        // The loop also exits once every command sender is gone.
        drop(command_tx);
    });

    controller.run(command_rx, shutdown_rx).await;
    printer.abort();
    Ok(())
}

/// Echo trading events to stdout while the bot runs; log lines already go
/// through tracing.
async fn print_events(mut events: broadcast::Receiver<BotEvent>) {
    loop {
        match events.recv().await {
            Ok(BotEvent::Signal(signal)) => println!(
                "SIGNAL    {:?} {} @ {} (confidence {}%)",
                signal.action, signal.symbol, signal.entry_price, signal.confidence
            ),
            Ok(BotEvent::Execution(report)) => println!(
                "EXECUTION {} {} {} @ {} ticket {:?} [{}]",
                if report.success { "OK  " } else { "FAIL" },
                report.side,
                report.volume,
                report.price,
                report.ticket,
                report.message
            ),
            Ok(BotEvent::Risk(event)) => println!("RISK      {event:?}"),
            Ok(BotEvent::Status(status)) => println!("STATUS    {status:?}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn replay_data(data: &Path, config: ReplayConfig, print_trades: bool) -> Result<()> {
    tracing::info!(data = %data.display(), symbol = %config.symbol.name, "Starting replay");

    let bars = scalpbot_data::load_bars_from_csv(data)?;
    tracing::info!(bars = bars.len(), "Loaded historical data");
    if bars.is_empty() {
        anyhow::bail!("No bars loaded from CSV file");
    }

    let report = run_replay(bars, config).await?;
    let s = &report.summary;

    let sep = "=".repeat(60);
    println!("\n{sep}");
    println!("  REPLAY RESULTS");
    println!("{sep}");
    println!("  Symbol:          {}", report.symbol);
    println!(
        "  Period:          {} → {}",
        report.start.format("%Y-%m-%d %H:%M"),
        report.end.format("%Y-%m-%d %H:%M")
    );
    println!("  Bars:            {}", report.bars_processed);
    println!("  Initial Balance: ${:.2}", report.initial_balance);
    println!("  Final Balance:   ${:.2}", report.final_balance);
    println!("  Net Profit:      ${:.2}", s.net_profit);
    println!("  Total Trades:    {} ({} won, {} lost)", s.total_trades, s.winning_trades, s.losing_trades);
    println!("  Win Rate:        {:.1}%", s.win_rate);
    println!("  Profit Factor:   {:.2}", s.profit_factor);
    println!("  Avg Trade:       ${:.2}", s.avg_trade);
    println!("  Max Drawdown:    ${:.2} ({:.1}%)", s.max_drawdown, s.max_drawdown_percent);
    println!("  Journal Rows:    {}", report.records.len());
    println!("{sep}\n");

    if print_trades {
        for t in &report.closed_trades {
            println!(
                "{}  #{:<6} {:<4} {:>6} @ {:<10} {:>10.2}  {}",
                t.timestamp.format("%Y-%m-%d %H:%M"),
                t.ticket.unwrap_or_default(),
                t.action.as_str(),
                t.volume,
                t.entry,
                t.profit,
                t.reason
            );
        }
    }

    Ok(())
}

async fn diagnose(config: BotConfig) -> Result<()> {
    let terminal = MetaTraderTerminal::new(config.terminal.clone());
    let mut controller = BotController::new(terminal, config)?;

    let report = controller.diagnostic().await;
    println!("{report}");

    if controller.terminal().is_connected() {
        if let Err(e) = controller.terminal_mut().shutdown().await {
            tracing::warn!(error = %e, "Terminal shutdown failed");
        }
    }

    if !report.is_healthy() {
        anyhow::bail!("Diagnostic found failures");
    }
    Ok(())
}
