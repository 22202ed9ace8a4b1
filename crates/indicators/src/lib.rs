pub mod atr;
pub mod ema;
pub mod momentum;
pub mod roc;
pub mod rsi;
pub mod williams_r;

use rust_decimal::Decimal;

/// Trait for streaming (incremental) indicators.
/// Feed one value at a time; the indicator maintains internal state.
pub trait Indicator: Send + Sync {
    /// Process the next value and return the indicator output (if ready).
    fn next(&mut self, value: Decimal) -> Option<Decimal>;

    /// Reset the indicator to its initial state.
    fn reset(&mut self);

    /// The minimum number of data points needed before the indicator produces output.
    fn period(&self) -> usize;

    /// Whether the indicator has enough data to produce output.
    fn is_ready(&self) -> bool;
}

/// Feed a whole series through `indicator` and return the last output.
pub fn last_value<I: Indicator + ?Sized>(indicator: &mut I, values: &[Decimal]) -> Option<Decimal> {
    values.iter().fold(None, |_, v| indicator.next(*v))
}
