use crate::Indicator;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Momentum: difference between the current value and the value `period` steps back.
#[derive(Debug, Clone)]
pub struct Momentum {
    len: usize,
    window: VecDeque<Decimal>,
}

impl Momentum {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "Momentum period must be > 0");
        Self {
            len: period,
            window: VecDeque::with_capacity(period + 1),
        }
    }
}

impl Indicator for Momentum {
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        self.window.push_back(value);
        if self.window.len() > self.len + 1 {
            self.window.pop_front();
        }
        if !self.is_ready() {
            return None;
        }
        self.window.front().map(|base| value - base)
    }

    fn reset(&mut self) {
        self.window.clear();
    }

    fn period(&self) -> usize {
        self.len + 1
    }

    fn is_ready(&self) -> bool {
        self.window.len() == self.len + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_momentum_lags_by_period() {
        let mut mom = Momentum::new(2);
        assert_eq!(mom.next(dec!(10)), None);
        assert_eq!(mom.next(dec!(11)), None);
        assert_eq!(mom.next(dec!(13)), Some(dec!(3)));
        assert_eq!(mom.next(dec!(12)), Some(dec!(1)));
    }

    #[test]
    fn test_momentum_negative() {
        let mut mom = Momentum::new(1);
        mom.next(dec!(5));
        assert_eq!(mom.next(dec!(4.5)), Some(dec!(-0.5)));
    }
}
