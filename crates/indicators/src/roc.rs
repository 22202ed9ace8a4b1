use crate::Indicator;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

/// Rate of Change, in percent, against the value `period` steps back.
///
/// A non-positive base yields 0 instead of dividing.
#[derive(Debug, Clone)]
pub struct Roc {
    len: usize,
    window: VecDeque<Decimal>,
}

impl Roc {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "ROC period must be > 0");
        Self {
            len: period,
            window: VecDeque::with_capacity(period + 1),
        }
    }
}

impl Indicator for Roc {
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        self.window.push_back(value);
        if self.window.len() > self.len + 1 {
            self.window.pop_front();
        }
        if !self.is_ready() {
            return None;
        }
        let base = *self.window.front()?;
        if base <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        Some((value - base) / base * dec!(100))
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

    #[test]
    fn test_roc_percent_change() {
        let mut roc = Roc::new(2);
        assert_eq!(roc.next(dec!(100)), None);
        assert_eq!(roc.next(dec!(105)), None);
        assert_eq!(roc.next(dec!(110)), Some(dec!(10)));
        // base 105 -> (99 - 105) / 105 * 100
        let value = roc.next(dec!(99)).unwrap();
        assert!((value - dec!(-5.7143)).abs() < dec!(0.001));
    }

    #[test]
    fn test_roc_zero_base() {
        let mut roc = Roc::new(1);
        roc.next(Decimal::ZERO);
        assert_eq!(roc.next(dec!(3)), Some(Decimal::ZERO));
    }
}
