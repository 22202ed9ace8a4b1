use crate::config::BotConfig;
use crate::controller::{BotController, ControllerError};
use crate::metrics::{self, EquityPoint, PerformanceSummary};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use scalpbot_brokers_common::{ClosedDeal, CloseReason, SimulatedTerminal, SimulatedTerminalConfig};
use scalpbot_core::*;
use std::time::Duration;
use tracing::{info, warn};

/// Settings for a replay over recorded M1 bars.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub bot: BotConfig,
    pub symbol: SymbolInfo,
    pub initial_balance: Decimal,
    pub spread_points: u32,
    /// M1 bars consumed before the first analysis cycle.
    pub warmup_bars: usize,
}

impl ReplayConfig {
    pub fn new(bot: BotConfig, symbol: SymbolInfo, initial_balance: Decimal) -> Self {
        Self {
            bot,
            symbol,
            initial_balance,
            spread_points: 20,
            warmup_bars: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bars_processed: usize,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub summary: PerformanceSummary,
    /// Journal rows written by the controller.
    pub records: Vec<TradeRecord>,
    /// Realized round trips as settled by the simulated terminal.
    pub closed_trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

/// Run the bot over `bars` on a simulated terminal, one M1 bar per step.
///
/// Each step refreshes positions and account, then runs one analysis cycle.
/// Orders are always sent to the simulated account, whatever the shadow and
/// auto-trading settings say. Open positions are closed after the last bar.
pub async fn run_replay(bars: Vec<Bar>, config: ReplayConfig) -> Result<ReplayReport, ControllerError> {
    if bars.len() <= config.warmup_bars {
        return Err(TerminalError::NoData(format!(
            "{} bars loaded, warm-up alone needs {}",
            bars.len(),
            config.warmup_bars
        ))
        .into());
    }

    let mut bot = config.bot;
    bot.trading.symbol = config.symbol.name.clone();
    bot.trading.shadow_mode = false;
    bot.trading.auto_trading = true;

    let start = bars[config.warmup_bars].time;
    let end = bars.last().map(|b| b.time).unwrap_or(start);
    info!(
        symbol = %config.symbol.name,
        bars = bars.len(),
        warmup = config.warmup_bars,
        "Starting replay from {} to {}",
        start,
        end
    );

    let mut sim = SimulatedTerminalConfig::new(config.symbol.clone(), config.initial_balance);
    sim.spread_points = config.spread_points;
    let mut terminal = SimulatedTerminal::new(sim, bars);
    terminal.seek(config.warmup_bars);

    let mut controller = BotController::new(terminal, bot)?
        .with_retry_delays(Duration::ZERO, Duration::ZERO)
        .with_record_limit(None);
    controller.connect().await?;
    controller.start().await?;

    let mut equity_curve = Vec::new();
    let mut bars_processed = 0;
    loop {
        controller.refresh_positions().await?;
        controller.refresh_account().await?;
        if let Err(e) = controller.analysis_cycle().await {
            warn!(error = %e, "Replay analysis cycle failed");
        }

        let terminal = controller.terminal();
        if let Some(bar) = terminal.current_bar() {
            equity_curve.push(EquityPoint {
                timestamp: bar.time,
                equity: terminal.equity(),
            });
        }
        bars_processed += 1;

        if controller.terminal_mut().advance().is_none() {
            break;
        }
    }

    controller.close_all_positions().await?;
    let terminal = controller.terminal();
    let final_balance = terminal.balance();
    equity_curve.push(EquityPoint {
        timestamp: end,
        equity: terminal.equity(),
    });

    let closed_trades: Vec<TradeRecord> = terminal
        .closed_deals()
        .iter()
        .map(|deal| deal_record(&config.symbol.name, deal))
        .collect();
    let summary = metrics::summarize(&closed_trades, config.initial_balance, &equity_curve);
    let records = controller.records().to_vec();
    controller.disconnect().await;

    info!(
        trades = summary.total_trades,
        net_profit = %summary.net_profit,
        final_balance = %final_balance,
        "Replay complete"
    );

    Ok(ReplayReport {
        symbol: config.symbol.name,
        start,
        end,
        bars_processed,
        initial_balance: config.initial_balance,
        final_balance,
        summary,
        records,
        closed_trades,
        equity_curve,
    })
}

fn deal_record(symbol: &str, deal: &ClosedDeal) -> TradeRecord {
    let reason = match deal.reason {
        CloseReason::StopLoss => "Stop loss hit",
        CloseReason::TakeProfit => "Take profit hit",
        CloseReason::Request => "Closed by request",
    };
    TradeRecord {
        timestamp: deal.closed_at,
        symbol: symbol.to_string(),
        action: deal.side,
        volume: deal.volume,
        entry: deal.price_open,
        sl: None,
        tp: None,
        spread_points: 0,
        result: TradeOutcome::Closed,
        reason: reason.to_string(),
        ticket: Some(deal.ticket),
        profit: deal.profit,
    }
}
