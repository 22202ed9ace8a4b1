use crate::events::*;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Terminal Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to a trading terminal.
#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Terminal not connected")]
    NotConnected,
    #[error("Terminal initialization failed: {code} - {message}")]
    InitFailed { code: i32, message: String },
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("No data available: {0}")]
    NoData(String),
    #[error("Bridge error {code}: {message}")]
    Bridge { code: i32, message: String },
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The vendor terminal API surface the bot depends on.
///
/// Mirrors the MetaTrader 5 client calls one to one so a bridge can forward
/// them verbatim.
#[async_trait]
pub trait Terminal: Send {
    /// Attach to the terminal.
    async fn initialize(&mut self) -> Result<(), TerminalError>;

    /// Detach from the terminal.
    async fn shutdown(&mut self) -> Result<(), TerminalError>;

    fn is_connected(&self) -> bool;

    async fn terminal_info(&mut self) -> Result<TerminalInfo, TerminalError>;

    async fn account_info(&mut self) -> Result<AccountInfo, TerminalError>;

    /// Show (or hide) the symbol in Market Watch. Returns false when the
    /// terminal refuses.
    async fn symbol_select(&mut self, symbol: &str, enable: bool) -> Result<bool, TerminalError>;

    async fn symbol_info(&mut self, symbol: &str) -> Result<SymbolInfo, TerminalError>;

    /// The latest quote.
    async fn symbol_info_tick(&mut self, symbol: &str) -> Result<Tick, TerminalError>;

    /// Up to `count` bars ending `start` bars back from the current one,
    /// oldest first.
    async fn copy_rates_from_pos(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        start: usize,
        count: usize,
    ) -> Result<Vec<Bar>, TerminalError>;

    /// Open positions on `symbol`.
    async fn positions_get(&mut self, symbol: &str) -> Result<Vec<Position>, TerminalError>;

    /// Send a trade request. A trade-server rejection is an `Ok` with a
    /// failing `retcode`; `Err` means the request never reached the server.
    async fn order_send(&mut self, request: &OrderRequest) -> Result<OrderResult, TerminalError>;
}

// ---------------------------------------------------------------------------
// Strategy Trait
// ---------------------------------------------------------------------------

/// A signal generator evaluated on every analysis cycle.
pub trait Strategy: Send + Sync {
    /// Unique identifier for this strategy.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Evaluate the current market state. Returns a `SignalAction::None`
    /// signal (with a reason) when there is nothing to do.
    fn evaluate(&self, ctx: &MarketContext) -> TradeSignal;

    /// Reset internal state.
    fn reset(&mut self) {}
}

// ---------------------------------------------------------------------------
// Risk Manager Trait
// ---------------------------------------------------------------------------

/// Decision returned by the risk manager for a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved,
    Rejected(String),
}

/// Guards order flow with daily circuit breakers.
pub trait RiskManager: Send + Sync {
    /// Check whether a signal may be executed at `now`.
    fn evaluate_signal(
        &mut self,
        signal: &TradeSignal,
        account: &AccountInfo,
        now: DateTime<Utc>,
    ) -> RiskDecision;

    /// A new position was opened.
    fn record_execution(&mut self);

    /// A position was closed with `profit` (net, account currency).
    fn record_closed_trade(&mut self, profit: Decimal);

    /// Floating profit of the bot's open positions.
    fn update_open_profit(&mut self, profit: Decimal);

    /// Called at the start of each trading day to reset daily counters.
    fn reset_daily(&mut self, balance: Decimal);

    /// Whether a circuit breaker has halted trading.
    fn should_halt(&self) -> bool;

    /// Current violations and warnings.
    fn active_violations(&self) -> Vec<RiskViolation>;
}
