use crate::Indicator;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

/// Williams %R over the last `period` bars, in the range [-100, 0].
///
/// Returns -50 when the highest high equals the lowest low.
#[derive(Debug, Clone)]
pub struct WilliamsR {
    len: usize,
    highs: VecDeque<Decimal>,
    lows: VecDeque<Decimal>,
}

impl WilliamsR {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "Williams %R period must be > 0");
        Self {
            len: period,
            highs: VecDeque::with_capacity(period),
            lows: VecDeque::with_capacity(period),
        }
    }

    pub fn next_hlc(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        self.highs.push_back(high);
        self.lows.push_back(low);
        if self.highs.len() > self.len {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        if !self.is_ready() {
            return None;
        }

        let highest = self.highs.iter().max().copied()?;
        let lowest = self.lows.iter().min().copied()?;
        let range = highest - lowest;
        if range <= Decimal::ZERO {
            return Some(dec!(-50));
        }
        Some((highest - close) / range * dec!(-100))
    }
}

impl Indicator for WilliamsR {
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        self.next_hlc(value, value, value)
    }

    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
    }

    fn period(&self) -> usize {
        self.len
    }

    fn is_ready(&self) -> bool {
        self.highs.len() == self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_williams_r_range() {
        let mut wr = WilliamsR::new(3);
        assert_eq!(wr.next_hlc(dec!(10), dec!(8), dec!(9)), None);
        assert_eq!(wr.next_hlc(dec!(12), dec!(9), dec!(11)), None);
        // highest 12, lowest 8, close 11 -> (12 - 11) / 4 * -100 = -25
        assert_eq!(wr.next_hlc(dec!(11), dec!(10), dec!(11)), Some(dec!(-25)));
        // window drops the first bar: highest 12, lowest 9, close 12 -> 0
        assert_eq!(wr.next_hlc(dec!(12), dec!(11), dec!(12)), Some(Decimal::ZERO));
    }

    #[test]
    fn test_williams_r_flat_range() {
        let mut wr = WilliamsR::new(2);
        wr.next(dec!(5));
        assert_eq!(wr.next(dec!(5)), Some(dec!(-50)));
    }
}
