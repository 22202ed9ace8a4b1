use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalpbot_core::{Side, SymbolInfo};
use serde::{Deserialize, Serialize};

/// How stop-loss and take-profit distances are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TpSlMode {
    /// Multiples of the M1 ATR.
    #[default]
    Atr,
    /// Raw points.
    Points,
    /// Pips (ten points on 3/5 digit quotes).
    Pips,
    /// Percent of balance, converted to a price distance at one lot.
    Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Balance percentage risked per trade.
    pub risk_percent: Decimal,
    pub tp_sl_mode: TpSlMode,
    pub sl_value: Decimal,
    pub tp_value: Decimal,
    /// Floor for the ATR-mode stop distance, in points.
    pub min_sl_points: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_percent: dec!(1.0),
            tp_sl_mode: TpSlMode::Atr,
            sl_value: dec!(1.5),
            tp_value: dec!(2.0),
            min_sl_points: 150,
        }
    }
}

/// Stop-loss / take-profit prices for an entry, plus the raw distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub sl: Decimal,
    pub tp: Decimal,
    pub sl_distance: Decimal,
    pub tp_distance: Decimal,
}

fn distances(atr: Decimal, balance: Decimal, symbol: &SymbolInfo, config: &SizingConfig) -> (Decimal, Decimal) {
    match config.tp_sl_mode {
        TpSlMode::Atr => {
            let sl = atr * config.sl_value;
            let tp = atr * config.tp_value;
            let floor = Decimal::from(config.min_sl_points) * symbol.point;
            if sl >= floor || config.sl_value.is_zero() {
                (sl, tp)
            } else {
                // Keep the reward/risk ratio when the floor kicks in.
                (floor, floor * config.tp_value / config.sl_value)
            }
        }
        TpSlMode::Points => (config.sl_value * symbol.point, config.tp_value * symbol.point),
        TpSlMode::Pips => {
            let pip = symbol.pip_size();
            (config.sl_value * pip, config.tp_value * pip)
        }
        TpSlMode::Percent => {
            if symbol.trade_tick_value.is_zero() {
                return (Decimal::ZERO, Decimal::ZERO);
            }
            let to_distance = |percent: Decimal| {
                let money = balance * percent / dec!(100);
                money * symbol.trade_tick_size / symbol.trade_tick_value
            };
            (to_distance(config.sl_value), to_distance(config.tp_value))
        }
    }
}

/// Compute SL/TP prices for a market entry at `entry`.
pub fn protective_levels(
    side: Side,
    entry: Decimal,
    atr: Decimal,
    balance: Decimal,
    symbol: &SymbolInfo,
    config: &SizingConfig,
) -> ProtectiveLevels {
    let (sl_distance, tp_distance) = distances(atr, balance, symbol, config);
    let (sl, tp) = match side {
        Side::Buy => (entry - sl_distance, entry + tp_distance),
        Side::Sell => (entry + sl_distance, entry - tp_distance),
    };
    ProtectiveLevels {
        sl: symbol.normalize_price(sl),
        tp: symbol.normalize_price(tp),
        sl_distance,
        tp_distance,
    }
}

/// Lot size risking `risk_percent` of `balance` over `sl_distance`.
///
/// Falls back to the minimum volume when the distance is not positive.
pub fn lot_size(balance: Decimal, sl_distance: Decimal, symbol: &SymbolInfo, config: &SizingConfig) -> Decimal {
    if sl_distance <= Decimal::ZERO || symbol.point.is_zero() {
        return symbol.volume_min;
    }
    let risk_money = balance * config.risk_percent / dec!(100);
    let sl_points = sl_distance / symbol.point;
    let loss_per_lot = sl_points * symbol.point_value();
    if loss_per_lot <= Decimal::ZERO {
        return symbol.volume_min;
    }
    symbol.normalize_volume(risk_money / loss_per_lot)
}
