use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalpbot_core::{TradeOutcome, TradeRecord};
use serde::{Deserialize, Serialize};

/// Account equity at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Aggregate performance over a set of closed trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub net_profit: Decimal,
    pub profit_factor: Decimal,
    pub avg_trade: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_percent: Decimal,
}

/// Summarize the `CLOSED` rows of `trades`. Other journal rows (entries,
/// shadow and blocked signals) carry no realized profit and are ignored.
pub fn summarize(trades: &[TradeRecord], initial_balance: Decimal, equity_curve: &[EquityPoint]) -> PerformanceSummary {
    let closed: Vec<&TradeRecord> = trades.iter().filter(|t| t.result == TradeOutcome::Closed).collect();

    let total_trades = closed.len();
    let winning_trades = closed.iter().filter(|t| t.profit > Decimal::ZERO).count();
    let losing_trades = closed.iter().filter(|t| t.profit < Decimal::ZERO).count();

    let gross_profit: Decimal = closed
        .iter()
        .filter(|t| t.profit > Decimal::ZERO)
        .map(|t| t.profit)
        .sum();

    let gross_loss: Decimal = closed
        .iter()
        .filter(|t| t.profit < Decimal::ZERO)
        .map(|t| t.profit.abs())
        .sum();

    let net_profit = gross_profit - gross_loss;

    let win_rate = if total_trades == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(winning_trades) / Decimal::from(total_trades) * dec!(100)).round_dp(2)
    };

    let profit_factor = if gross_loss.is_zero() {
        if gross_profit > Decimal::ZERO {
            dec!(999.99)
        } else {
            Decimal::ZERO
        }
    } else {
        (gross_profit / gross_loss).min(dec!(999.99)).round_dp(2)
    };

    let avg_trade = if total_trades == 0 {
        Decimal::ZERO
    } else {
        (net_profit / Decimal::from(total_trades)).round_dp(2)
    };

    let (max_drawdown, max_drawdown_percent) = max_drawdown(initial_balance, equity_curve);

    PerformanceSummary {
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        gross_profit,
        gross_loss,
        net_profit,
        profit_factor,
        avg_trade,
        max_drawdown,
        max_drawdown_percent,
    }
}

/// Largest peak-to-trough equity decline, absolute and as a percent of the
/// peak it fell from. The peak starts at `initial_balance`.
fn max_drawdown(initial_balance: Decimal, equity_curve: &[EquityPoint]) -> (Decimal, Decimal) {
    let mut peak = initial_balance;
    let mut worst = Decimal::ZERO;
    let mut worst_percent = Decimal::ZERO;

    for point in equity_curve {
        peak = peak.max(point.equity);
        let drawdown = peak - point.equity;
        if drawdown > worst {
            worst = drawdown;
        }
        if peak > Decimal::ZERO {
            worst_percent = worst_percent.max(drawdown / peak * dec!(100));
        }
    }

    (worst, worst_percent.round_dp(2))
}
