use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalpbot_core::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How strictly the M5 trend and the M1 entry are qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendFilter {
    /// Three stacked EMAs with price beyond the slow EMA; M1 close must lead the fast EMA.
    #[default]
    Strict,
    /// Fast vs medium EMA on both timeframes.
    Relaxed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalperConfig {
    pub trend_filter: TrendFilter,
    pub max_spread_points: u32,
    pub min_confidence: u32,
}

impl Default for ScalperConfig {
    fn default() -> Self {
        Self {
            trend_filter: TrendFilter::Strict,
            max_spread_points: 30,
            min_confidence: 70,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Bullish,
    Bearish,
}

const BASE_CONFIDENCE: u32 = 75;
const MOMENTUM_BONUS: u32 = 10;

/// M5 trend filter with an M1 pullback-completion entry.
#[derive(Debug, Clone)]
pub struct ScalperStrategy {
    id: String,
    config: ScalperConfig,
}

impl ScalperStrategy {
    pub fn new(config: ScalperConfig) -> Self {
        let id = match config.trend_filter {
            TrendFilter::Strict => "scalper_strict",
            TrendFilter::Relaxed => "scalper_relaxed",
        };
        Self {
            id: id.to_string(),
            config,
        }
    }

    pub fn config(&self) -> &ScalperConfig {
        &self.config
    }

    fn trend(&self, m5: &IndicatorSnapshot) -> Option<Trend> {
        match self.config.trend_filter {
            TrendFilter::Strict => {
                if m5.ema_fast > m5.ema_medium && m5.ema_medium > m5.ema_slow && m5.close > m5.ema_slow {
                    Some(Trend::Bullish)
                } else if m5.ema_fast < m5.ema_medium && m5.ema_medium < m5.ema_slow && m5.close < m5.ema_slow {
                    Some(Trend::Bearish)
                } else {
                    None
                }
            }
            TrendFilter::Relaxed => {
                if m5.ema_fast > m5.ema_medium {
                    Some(Trend::Bullish)
                } else if m5.ema_fast < m5.ema_medium {
                    Some(Trend::Bearish)
                } else {
                    None
                }
            }
        }
    }

    fn entry(&self, trend: Trend, m1: &IndicatorSnapshot) -> Option<Side> {
        let rsi = m1.rsi;
        match (self.config.trend_filter, trend) {
            (TrendFilter::Strict, Trend::Bullish) => (m1.close > m1.ema_fast
                && m1.ema_fast > m1.ema_medium
                && rsi > dec!(45)
                && rsi < dec!(70))
                .then_some(Side::Buy),
            (TrendFilter::Strict, Trend::Bearish) => (m1.close < m1.ema_fast
                && m1.ema_fast < m1.ema_medium
                && rsi > dec!(30)
                && rsi < dec!(55))
                .then_some(Side::Sell),
            (TrendFilter::Relaxed, Trend::Bullish) => {
                (m1.ema_fast > m1.ema_medium && rsi > dec!(40) && rsi < dec!(70)).then_some(Side::Buy)
            }
            (TrendFilter::Relaxed, Trend::Bearish) => {
                (m1.ema_fast < m1.ema_medium && rsi > dec!(30) && rsi < dec!(60)).then_some(Side::Sell)
            }
        }
    }

    fn confidence(side: Side, entry_price: Decimal, m1_fast: Decimal) -> u32 {
        let beyond_fast = match side {
            Side::Buy => entry_price > m1_fast,
            Side::Sell => entry_price < m1_fast,
        };
        if beyond_fast {
            BASE_CONFIDENCE + MOMENTUM_BONUS
        } else {
            BASE_CONFIDENCE
        }
    }
}

impl Default for ScalperStrategy {
    fn default() -> Self {
        Self::new(ScalperConfig::default())
    }
}

impl Strategy for ScalperStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "M5 Trend / M1 Entry Scalper"
    }

    fn evaluate(&self, ctx: &MarketContext) -> TradeSignal {
        let symbol = ctx.symbol.name.as_str();
        let now = ctx.tick.time;

        let spread_points = ctx.tick.spread_points(ctx.symbol.point);
        if spread_points > self.config.max_spread_points {
            return TradeSignal::none(symbol, now, "Spread too wide");
        }

        let Some(trend) = self.trend(&ctx.m5) else {
            return TradeSignal::none(symbol, now, "No clear trend");
        };

        let Some(side) = self.entry(trend, &ctx.m1) else {
            return TradeSignal::none(symbol, now, "No entry condition met");
        };

        let entry_price = ctx.tick.price_for(side);
        let confidence = Self::confidence(side, entry_price, ctx.m1.ema_fast);
        if confidence < self.config.min_confidence {
            return TradeSignal::none(symbol, now, format!("Confidence {confidence} below minimum"));
        }

        debug!(symbol, side = %side, confidence, spread_points, "Signal confirmed");

        TradeSignal {
            action: match side {
                Side::Buy => SignalAction::Buy,
                Side::Sell => SignalAction::Sell,
            },
            symbol: symbol.to_string(),
            entry_price,
            spread_points,
            atr: ctx.m1.atr,
            rsi: ctx.m1.rsi,
            confidence,
            reason: format!("{} signal confirmed", side.as_str()),
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn symbol() -> SymbolInfo {
        SymbolInfo {
            name: "XAUUSD".to_string(),
            point: dec!(0.01),
            digits: 2,
            volume_min: dec!(0.01),
            volume_max: dec!(100),
            volume_step: dec!(0.01),
            trade_tick_value: dec!(1),
            trade_tick_size: dec!(0.01),
            trade_contract_size: dec!(100),
            trade_mode: TradeMode::Full,
        }
    }

    fn snapshot(timeframe: Timeframe, close: Decimal, fast: Decimal, medium: Decimal, slow: Decimal, rsi: Decimal) -> IndicatorSnapshot {
        IndicatorSnapshot {
            timeframe,
            close,
            ema_fast: fast,
            ema_medium: medium,
            ema_slow: slow,
            rsi,
            atr: dec!(1.2),
            bars_count: 200,
        }
    }

    fn context(bid: Decimal, ask: Decimal, m1: IndicatorSnapshot, m5: IndicatorSnapshot) -> MarketContext {
        MarketContext {
            symbol: symbol(),
            tick: Tick {
                symbol: "XAUUSD".to_string(),
                time: Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
                bid,
                ask,
                volume: Decimal::ZERO,
            },
            m1,
            m5,
        }
    }

    fn bullish_m5() -> IndicatorSnapshot {
        snapshot(Timeframe::M5, dec!(2010), dec!(2008), dec!(2005), dec!(2000), dec!(60))
    }

    fn bearish_m5() -> IndicatorSnapshot {
        snapshot(Timeframe::M5, dec!(1990), dec!(1992), dec!(1995), dec!(2000), dec!(40))
    }

    #[test]
    fn test_strict_buy_signal() {
        let m1 = snapshot(Timeframe::M1, dec!(2010), dec!(2009), dec!(2008), dec!(2004), dec!(55));
        let ctx = context(dec!(2010), dec!(2010.20), m1, bullish_m5());
        let signal = ScalperStrategy::default().evaluate(&ctx);

        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.entry_price, dec!(2010.20));
        assert_eq!(signal.spread_points, 20);
        assert_eq!(signal.confidence, 85);
        assert_eq!(signal.atr, dec!(1.2));
        assert_eq!(signal.reason, "BUY signal confirmed");
    }

    #[test]
    fn test_strict_sell_signal_uses_bid() {
        let m1 = snapshot(Timeframe::M1, dec!(1990), dec!(1991), dec!(1992), dec!(1996), dec!(42));
        let ctx = context(dec!(1990), dec!(1990.10), m1, bearish_m5());
        let signal = ScalperStrategy::default().evaluate(&ctx);

        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.entry_price, dec!(1990));
        assert_eq!(signal.confidence, 85);
    }

    #[test]
    fn test_spread_filter() {
        let m1 = snapshot(Timeframe::M1, dec!(2010), dec!(2009), dec!(2008), dec!(2004), dec!(55));
        let ctx = context(dec!(2010), dec!(2010.31), m1, bullish_m5());
        let signal = ScalperStrategy::default().evaluate(&ctx);
        assert_eq!(signal.action, SignalAction::None);
        assert_eq!(signal.reason, "Spread too wide");
    }

    #[test]
    fn test_strict_requires_stacked_emas() {
        // fast > medium but medium < slow
        let m5 = snapshot(Timeframe::M5, dec!(2010), dec!(2008), dec!(1999), dec!(2000), dec!(60));
        let m1 = snapshot(Timeframe::M1, dec!(2010), dec!(2009), dec!(2008), dec!(2004), dec!(55));
        let ctx = context(dec!(2010), dec!(2010.10), m1.clone(), m5.clone());

        let strict = ScalperStrategy::default().evaluate(&ctx);
        assert_eq!(strict.reason, "No clear trend");

        let relaxed = ScalperStrategy::new(ScalperConfig {
            trend_filter: TrendFilter::Relaxed,
            ..Default::default()
        })
        .evaluate(&ctx);
        assert_eq!(relaxed.action, SignalAction::Buy);
    }

    #[test]
    fn test_rsi_band_blocks_entry() {
        let m1 = snapshot(Timeframe::M1, dec!(2010), dec!(2009), dec!(2008), dec!(2004), dec!(72));
        let ctx = context(dec!(2010), dec!(2010.10), m1, bullish_m5());
        let signal = ScalperStrategy::default().evaluate(&ctx);
        assert_eq!(signal.action, SignalAction::None);
        assert_eq!(signal.reason, "No entry condition met");
    }

    #[test]
    fn test_relaxed_rsi_bands_are_wider() {
        // RSI 42 fails the strict buy band (45..70) but passes the relaxed one (40..70)
        let m1 = snapshot(Timeframe::M1, dec!(2010), dec!(2009), dec!(2008), dec!(2004), dec!(42));
        let ctx = context(dec!(2010), dec!(2010.10), m1, bullish_m5());

        assert!(!ScalperStrategy::default().evaluate(&ctx).is_actionable());
        let relaxed = ScalperStrategy::new(ScalperConfig {
            trend_filter: TrendFilter::Relaxed,
            ..Default::default()
        });
        assert!(relaxed.evaluate(&ctx).is_actionable());
    }

    #[test]
    fn test_min_confidence_discards_signal() {
        // Relaxed buy where the ask sits below the fast EMA: confidence stays at 75
        let m1 = snapshot(Timeframe::M1, dec!(2008.5), dec!(2009), dec!(2008), dec!(2004), dec!(55));
        let ctx = context(dec!(2008.5), dec!(2008.6), m1, bullish_m5());
        let strategy = ScalperStrategy::new(ScalperConfig {
            trend_filter: TrendFilter::Relaxed,
            min_confidence: 80,
            ..Default::default()
        });
        let signal = strategy.evaluate(&ctx);
        assert_eq!(signal.action, SignalAction::None);
        assert!(signal.reason.starts_with("Confidence 75"));
    }
}
