use crate::models::*;
use serde::{Deserialize, Serialize};

/// Top-level event published by the bot controller.
///
/// Front ends (the CLI today) subscribe to these instead of polling the
/// controller's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BotEvent {
    Log { level: LogLevel, message: String },
    Connection(bool),
    Status(BotStatus),
    Tick(Tick),
    Indicators {
        m1: IndicatorSnapshot,
        m5: IndicatorSnapshot,
    },
    Signal(TradeSignal),
    Execution(ExecutionReport),
    Account(AccountInfo),
    Positions(Vec<Position>),
    Risk(RiskEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Lifecycle state of the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Disconnected,
    Connected,
    Running,
    Stopped,
    /// A circuit breaker tripped; no new entries until the next trading day.
    Halted,
}

/// Risk management events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskEvent {
    /// A signal was not executed.
    Blocked { reason: String },
    /// A circuit breaker tripped.
    Halted { reason: String },
    /// Daily counters were reset at the start of a new day.
    DailyReset,
}

/// Details about a guard-rail violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskViolation {
    pub rule: String,
    pub message: String,
    pub current_value: String,
    pub threshold: String,
    pub severity: RiskSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Warning,
    /// Blocks the current signal.
    Critical,
    /// Halts trading for the rest of the day.
    Breach,
}
