pub mod config;
pub mod controller;
pub mod diagnostic;
pub mod execution;
pub mod metrics;
pub mod replay;

pub use config::{BotConfig, ConfigError, ConfigPatch, TradingConfig};
pub use controller::{BotCommand, BotController, ControllerError, CycleOutcome};
pub use diagnostic::{CheckStatus, DiagnosticCheck, DiagnosticReport};
pub use execution::{ExecutionError, OrderExecutor};
pub use metrics::{summarize, EquityPoint, PerformanceSummary};
pub use replay::{run_replay, ReplayConfig, ReplayReport};
