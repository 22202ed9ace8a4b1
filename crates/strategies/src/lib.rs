pub mod scalper;
pub mod snapshot;

pub use scalper::{ScalperConfig, ScalperStrategy, TrendFilter};
pub use snapshot::IndicatorPeriods;
