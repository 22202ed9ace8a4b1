use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalpbot_core::{Bar, IndicatorSnapshot, Timeframe};
use scalpbot_indicators::atr::Atr;
use scalpbot_indicators::ema::Ema;
use scalpbot_indicators::rsi::Rsi;
use scalpbot_indicators::last_value;
use serde::{Deserialize, Serialize};

/// Indicator lengths used for every timeframe snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorPeriods {
    pub ema_fast: usize,
    pub ema_medium: usize,
    pub ema_slow: usize,
    pub rsi: usize,
    pub atr: usize,
    /// Bars required before a snapshot is produced at all.
    pub min_bars: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            ema_fast: 9,
            ema_medium: 21,
            ema_slow: 50,
            rsi: 14,
            atr: 14,
            min_bars: 50,
        }
    }
}

/// Run `bars` (oldest first) through fresh indicators and return the latest values.
///
/// Indicators that are not warm yet report neutral values: EMA 0, RSI 50, ATR 0.
pub fn compute(bars: &[Bar], timeframe: Timeframe, periods: &IndicatorPeriods) -> Option<IndicatorSnapshot> {
    if bars.is_empty() || bars.len() < periods.min_bars {
        return None;
    }

    let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
    let mut atr = Atr::new(periods.atr);
    for bar in bars {
        atr.next_hlc(bar.high, bar.low, bar.close);
    }

    let last = bars.last()?;
    Some(IndicatorSnapshot {
        timeframe,
        close: last.close,
        ema_fast: last_value(&mut Ema::new(periods.ema_fast), &closes).unwrap_or(Decimal::ZERO),
        ema_medium: last_value(&mut Ema::new(periods.ema_medium), &closes).unwrap_or(Decimal::ZERO),
        ema_slow: last_value(&mut Ema::new(periods.ema_slow), &closes).unwrap_or(Decimal::ZERO),
        rsi: last_value(&mut Rsi::new(periods.rsi), &closes).unwrap_or(dec!(50)),
        atr: atr.value().unwrap_or(Decimal::ZERO),
        bars_count: bars.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn rising_bars(count: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = dec!(2000) + Decimal::from(i);
                Bar {
                    time: start + Duration::minutes(i as i64),
                    open: close - dec!(0.5),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    tick_volume: dec!(100),
                }
            })
            .collect()
    }

    #[test]
    fn test_compute_requires_min_bars() {
        let periods = IndicatorPeriods::default();
        assert!(compute(&rising_bars(49), Timeframe::M1, &periods).is_none());
        assert!(compute(&[], Timeframe::M1, &periods).is_none());
    }

    #[test]
    fn test_compute_uptrend_orders_emas() {
        let snap = compute(&rising_bars(120), Timeframe::M5, &IndicatorPeriods::default()).unwrap();
        assert_eq!(snap.timeframe, Timeframe::M5);
        assert_eq!(snap.close, dec!(2119));
        assert_eq!(snap.bars_count, 120);
        assert!(snap.ema_fast > snap.ema_medium);
        assert!(snap.ema_medium > snap.ema_slow);
        assert_eq!(snap.rsi, dec!(100));
        // Every true range is |high - prev close| = 2
        assert_eq!(snap.atr, dec!(2));
    }

    #[test]
    fn test_compute_falls_back_when_not_warm() {
        let periods = IndicatorPeriods {
            ema_slow: 200,
            min_bars: 10,
            ..Default::default()
        };
        let snap = compute(&rising_bars(12), Timeframe::M1, &periods).unwrap();
        assert_eq!(snap.ema_slow, Decimal::ZERO);
        assert_eq!(snap.ema_medium, Decimal::ZERO);
        assert_eq!(snap.rsi, dec!(50));
        assert_eq!(snap.atr, Decimal::ZERO);
        assert!(snap.ema_fast > Decimal::ZERO);
    }
}
