use crate::Indicator;
use rust_decimal::Decimal;

/// Exponential Moving Average (EMA).
///
/// The first output is the simple average of the first `period` values;
/// after that `ema = alpha * value + (1 - alpha) * prev` with
/// `alpha = 2 / (period + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    len: usize,
    alpha: Decimal,
    seen: usize,
    warmup_sum: Decimal,
    current: Option<Decimal>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "EMA period must be > 0");
        Self {
            len: period,
            alpha: Decimal::TWO / Decimal::from(period + 1),
            seen: 0,
            warmup_sum: Decimal::ZERO,
            current: None,
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        self.current
    }
}

impl Indicator for Ema {
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        self.current = match self.current {
            Some(prev) => Some(self.alpha * value + (Decimal::ONE - self.alpha) * prev),
            None => {
                self.seen += 1;
                self.warmup_sum += value;
                (self.seen == self.len).then(|| self.warmup_sum / Decimal::from(self.len))
            }
        };
        self.current
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.warmup_sum = Decimal::ZERO;
        self.current = None;
    }

    fn period(&self) -> usize {
        self.len
    }

    fn is_ready(&self) -> bool {
        self.current.is_some()
    }
}
