use crate::Indicator;
use rust_decimal::Decimal;

/// Average True Range (ATR) with Wilder's smoothing.
///
/// The first bar only provides the previous close; true ranges start on the
/// second bar. The first ATR is the mean of the first `period` true ranges,
/// so output starts after `period + 1` bars.
#[derive(Debug, Clone)]
pub struct Atr {
    len: usize,
    prev_close: Option<Decimal>,
    ranges_seen: usize,
    range_sum: Decimal,
    current: Option<Decimal>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "ATR period must be > 0");
        Self {
            len: period,
            prev_close: None,
            ranges_seen: 0,
            range_sum: Decimal::ZERO,
            current: None,
        }
    }

    /// Feed one bar's high, low and close.
    pub fn next_hlc(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        let prev_close = self.prev_close.replace(close)?;
        let true_range = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        self.push_range(true_range)
    }

    pub fn value(&self) -> Option<Decimal> {
        self.current
    }

    fn push_range(&mut self, true_range: Decimal) -> Option<Decimal> {
        let n = Decimal::from(self.len);
        self.current = match self.current {
            Some(prev) => Some((prev * (n - Decimal::ONE) + true_range) / n),
            None => {
                self.ranges_seen += 1;
                self.range_sum += true_range;
                (self.ranges_seen == self.len).then(|| self.range_sum / n)
            }
        };
        self.current
    }
}

impl Indicator for Atr {
    /// Close-only feed: the true range degrades to the absolute close-to-close change.
    fn next(&mut self, value: Decimal) -> Option<Decimal> {
        self.next_hlc(value, value, value)
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.ranges_seen = 0;
        self.range_sum = Decimal::ZERO;
        self.current = None;
    }

    fn period(&self) -> usize {
        self.len + 1
    }

    fn is_ready(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_atr_first_bar_only_seeds_close() {
        let mut atr = Atr::new(2);
        assert_eq!(atr.next_hlc(dec!(11), dec!(9), dec!(10)), None);
        // TR = max(2, |12-10|, |10-10|) = 2
        assert_eq!(atr.next_hlc(dec!(12), dec!(10), dec!(11)), None);
        // TR = max(1, |11.5-11|, |10.5-11|) = 1 -> mean(2, 1) = 1.5
        assert_eq!(atr.next_hlc(dec!(11.5), dec!(10.5), dec!(11)), Some(dec!(1.5)));
    }

    #[test]
    fn test_atr_gap_uses_previous_close() {
        let mut atr = Atr::new(1);
        atr.next_hlc(dec!(101), dec!(99), dec!(100));
        // Gap up: h-l = 1 but |h - prev_close| = 6
        assert_eq!(atr.next_hlc(dec!(106), dec!(105), dec!(105.5)), Some(dec!(6)));
    }

    #[test]
    fn test_atr_wilder_smoothing() {
        let mut atr = Atr::new(2);
        atr.next_hlc(dec!(11), dec!(9), dec!(10));
        atr.next_hlc(dec!(12), dec!(10), dec!(11));
        atr.next_hlc(dec!(11.5), dec!(10.5), dec!(11)); // 1.5
        // TR = 4.5 -> (1.5 * 1 + 4.5) / 2 = 3
        assert_eq!(atr.next_hlc(dec!(15.5), dec!(11), dec!(15)), Some(dec!(3)));
    }
}
