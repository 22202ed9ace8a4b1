pub mod config;
pub mod guard_rails;
pub mod sizing;

pub use config::{validate_config, GuardRailConfig, SessionWindow};
pub use guard_rails::GuardRails;
pub use sizing::{lot_size, protective_levels, ProtectiveLevels, SizingConfig, TpSlMode};
