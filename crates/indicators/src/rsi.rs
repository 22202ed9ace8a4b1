use crate::Indicator;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Average losses below this are treated as zero (RSI pinned at 100).
const LOSS_EPSILON: Decimal = dec!(0.0000000001);

/// Relative Strength Index (RSI) with Wilder's smoothing.
///
/// The first averages are plain means over `period` price changes, so the
/// first output needs `period + 1` values.
#[derive(Debug, Clone)]
pub struct Rsi {
    len: usize,
    prev_value: Option<Decimal>,
    changes: usize,
    gain_sum: Decimal,
    loss_sum: Decimal,
    averages: Option<(Decimal, Decimal)>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "RSI period must be > 0");
        Self {
            len: period,
            prev_value: None,
            changes: 0,
            gain_sum: Decimal::ZERO,
            loss_sum: Decimal::ZERO,
            averages: None,
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        let (avg_gain, avg_loss) = self.averages?;
        if avg_loss <= LOSS_EPSILON {
            return Some(dec!(100));
        }
        let rs = avg_gain / avg_loss;
        Some(dec!(100) - dec!(100) / (Decimal::ONE + rs))
    }
}

impl Indicator for Rsi {
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        let prev = self.prev_value.replace(value)?;
        let change = value - prev;
        let gain = change.max(Decimal::ZERO);
        let loss = (-change).max(Decimal::ZERO);
        let n = Decimal::from(self.len);

        self.averages = match self.averages {
            Some((avg_gain, avg_loss)) => Some((
                (avg_gain * (n - Decimal::ONE) + gain) / n,
                (avg_loss * (n - Decimal::ONE) + loss) / n,
            )),
            None => {
                self.changes += 1;
                self.gain_sum += gain;
                self.loss_sum += loss;
                (self.changes == self.len).then(|| (self.gain_sum / n, self.loss_sum / n))
            }
        };

        self.value()
    }

    fn reset(&mut self) {
        self.prev_value = None;
        self.changes = 0;
        self.gain_sum = Decimal::ZERO;
        self.loss_sum = Decimal::ZERO;
        self.averages = None;
    }

    fn period(&self) -> usize {
        self.len + 1
    }

    fn is_ready(&self) -> bool {
        self.averages.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_needs_period_plus_one_values() {
        let mut rsi = Rsi::new(3);
        assert_eq!(rsi.next(dec!(10)), None);
        assert_eq!(rsi.next(dec!(11)), None);
        assert_eq!(rsi.next(dec!(10)), None);
        // gains 1,0,2 -> 1 ; losses 0,1,0 -> 1/3 ; rs = 3 ; rsi = 75
        let value = rsi.next(dec!(12)).unwrap();
        assert!((value - dec!(75)).abs() < dec!(0.0001));
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        let mut rsi = Rsi::new(2);
        rsi.next(dec!(10));
        rsi.next(dec!(12)); // gain 2
        rsi.next(dec!(10)); // loss 2 -> avg gain 1, avg loss 1 -> 50
        // next change -1: avg gain (1*1+0)/2 = 0.5, avg loss (1*1+1)/2 = 1
        // rs = 0.5 ; rsi = 100 - 100/1.5
        let value = rsi.next(dec!(9)).unwrap();
        assert!((value - dec!(33.3333)).abs() < dec!(0.001));
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let mut rsi = Rsi::new(3);
        let mut out = None;
        for v in [dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)] {
            out = rsi.next(v);
        }
        assert_eq!(out, Some(dec!(100)));
    }

    #[test]
    fn test_rsi_stays_in_range() {
        let mut rsi = Rsi::new(14);
        let values = [
            dec!(44), dec!(44.34), dec!(44.09), dec!(43.61), dec!(44.33),
            dec!(44.83), dec!(45.10), dec!(45.42), dec!(45.84), dec!(46.08),
            dec!(45.89), dec!(46.03), dec!(45.61), dec!(46.28), dec!(46.28),
            dec!(46.00), dec!(46.03), dec!(46.41), dec!(46.22), dec!(45.64),
        ];
        for v in values {
            if let Some(r) = rsi.next(v) {
                assert!(r > Decimal::ZERO && r < dec!(100));
            }
        }
        assert!(rsi.is_ready());
    }
}
