use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sides & Timeframes
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar timeframe as understood by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
}

impl Timeframe {
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::H1 => 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::H1 => "H1",
        }
    }
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// Latest bid/ask quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub time: DateTime<Utc>,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: Decimal,
}

impl Tick {
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Spread expressed in symbol points, rounded to the nearest point.
    pub fn spread_points(&self, point: Decimal) -> u32 {
        if point <= Decimal::ZERO {
            return 0;
        }
        (self.spread() / point).round().to_u32().unwrap_or(0)
    }

    /// The price an order on `side` would fill at.
    pub fn price_for(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

/// A single OHLC bar. MT5 reports tick volume for CFD/FX symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub tick_volume: Decimal,
}

// ---------------------------------------------------------------------------
// Symbol, Account & Terminal
// ---------------------------------------------------------------------------

/// What kind of trading the broker allows on a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeMode {
    Disabled,
    LongOnly,
    ShortOnly,
    CloseOnly,
    Full,
}

/// Contract specification of a tradeable symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    /// Smallest price increment (e.g. 0.01 for XAUUSD on most brokers).
    pub point: Decimal,
    /// Number of decimal places in quotes.
    pub digits: u32,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    /// Account-currency value of one tick move for one lot.
    pub trade_tick_value: Decimal,
    pub trade_tick_size: Decimal,
    pub trade_contract_size: Decimal,
    pub trade_mode: TradeMode,
}

impl SymbolInfo {
    /// One pip: ten points on fractional (3/5 digit) quotes, one point otherwise.
    pub fn pip_size(&self) -> Decimal {
        if self.digits == 3 || self.digits == 5 {
            self.point * Decimal::TEN
        } else {
            self.point
        }
    }

    /// Account-currency value of a one-point move for one lot.
    pub fn point_value(&self) -> Decimal {
        if self.trade_tick_size.is_zero() {
            self.trade_tick_value
        } else {
            self.trade_tick_value * self.point / self.trade_tick_size
        }
    }

    pub fn normalize_price(&self, price: Decimal) -> Decimal {
        price.round_dp(self.digits)
    }

    /// Round a raw lot size to the volume step and clamp it to the allowed range.
    pub fn normalize_volume(&self, volume: Decimal) -> Decimal {
        let stepped = if self.volume_step.is_zero() {
            volume
        } else {
            (volume / self.volume_step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                * self.volume_step
        };
        stepped.max(self.volume_min).min(self.volume_max).normalize()
    }

    /// Whether `volume` is within range and a whole multiple of the step.
    pub fn is_valid_volume(&self, volume: Decimal) -> bool {
        if volume < self.volume_min || volume > self.volume_max {
            return false;
        }
        self.volume_step.is_zero() || (volume % self.volume_step).is_zero()
    }
}

/// Trading account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub server: String,
    pub currency: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub margin_free: Decimal,
    /// Floating profit of all open positions.
    pub profit: Decimal,
}

/// Terminal status as reported by the vendor API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub connected: bool,
    /// "Allow algorithmic trading" is switched on in the terminal.
    pub trade_allowed: bool,
    pub build: u32,
    pub company: String,
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// An open position held by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub profit: Decimal,
    pub magic: u64,
    pub comment: String,
    pub opened_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order filling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillingMode {
    /// Fill or kill: the whole volume or nothing.
    Fok,
    /// Immediate or cancel: fill what is available, cancel the rest.
    Ioc,
    /// Leave the remainder working.
    Return,
}

impl FillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillingMode::Fok => "FOK",
            FillingMode::Ioc => "IOC",
            FillingMode::Return => "RETURN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTime {
    Gtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    /// Market execution.
    Deal,
}

/// A trade request in the shape the terminal's `order_send` expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub action: TradeAction,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    /// Maximum accepted slippage in points.
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
    pub type_time: OrderTime,
    pub type_filling: FillingMode,
    /// Ticket of the position this deal closes, if any.
    pub position: Option<u64>,
}

impl OrderRequest {
    /// A market deal opening a new position.
    pub fn market(symbol: &str, side: Side, volume: Decimal, price: Decimal) -> Self {
        Self {
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            side,
            volume,
            price,
            sl: None,
            tp: None,
            deviation: 20,
            magic: 0,
            comment: String::new(),
            type_time: OrderTime::Gtc,
            type_filling: FillingMode::Ioc,
            position: None,
        }
    }

    /// A market deal closing `position` at `price`.
    pub fn close(position: &Position, price: Decimal) -> Self {
        let mut request = Self::market(
            &position.symbol,
            position.side.opposite(),
            position.volume,
            price,
        );
        request.magic = position.magic;
        request.position = Some(position.ticket);
        request
    }
}

/// Trade server return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum RetCode {
    Requote,
    Reject,
    Cancel,
    Placed,
    Done,
    DonePartial,
    Error,
    Timeout,
    Invalid,
    InvalidVolume,
    InvalidPrice,
    InvalidStops,
    TradeDisabled,
    MarketClosed,
    NoMoney,
    PriceChanged,
    PriceOff,
    TooManyRequests,
    InvalidFill,
    Connection,
    Other(u32),
}

impl RetCode {
    pub fn code(&self) -> u32 {
        u32::from(*self)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetCode::Done | RetCode::DonePartial | RetCode::Placed)
    }

    /// Failures that are worth retrying with a refreshed price.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RetCode::Requote
                | RetCode::PriceChanged
                | RetCode::PriceOff
                | RetCode::Timeout
                | RetCode::TooManyRequests
                | RetCode::Connection
        )
    }
}

impl From<u32> for RetCode {
    fn from(code: u32) -> Self {
        match code {
            10004 => RetCode::Requote,
            10006 => RetCode::Reject,
            10007 => RetCode::Cancel,
            10008 => RetCode::Placed,
            10009 => RetCode::Done,
            10010 => RetCode::DonePartial,
            10011 => RetCode::Error,
            10012 => RetCode::Timeout,
            10013 => RetCode::Invalid,
            10014 => RetCode::InvalidVolume,
            10015 => RetCode::InvalidPrice,
            10016 => RetCode::InvalidStops,
            10017 => RetCode::TradeDisabled,
            10018 => RetCode::MarketClosed,
            10019 => RetCode::NoMoney,
            10020 => RetCode::PriceChanged,
            10021 => RetCode::PriceOff,
            10024 => RetCode::TooManyRequests,
            10030 => RetCode::InvalidFill,
            10031 => RetCode::Connection,
            other => RetCode::Other(other),
        }
    }
}

impl From<RetCode> for u32 {
    fn from(code: RetCode) -> Self {
        match code {
            RetCode::Requote => 10004,
            RetCode::Reject => 10006,
            RetCode::Cancel => 10007,
            RetCode::Placed => 10008,
            RetCode::Done => 10009,
            RetCode::DonePartial => 10010,
            RetCode::Error => 10011,
            RetCode::Timeout => 10012,
            RetCode::Invalid => 10013,
            RetCode::InvalidVolume => 10014,
            RetCode::InvalidPrice => 10015,
            RetCode::InvalidStops => 10016,
            RetCode::TradeDisabled => 10017,
            RetCode::MarketClosed => 10018,
            RetCode::NoMoney => 10019,
            RetCode::PriceChanged => 10020,
            RetCode::PriceOff => 10021,
            RetCode::TooManyRequests => 10024,
            RetCode::InvalidFill => 10030,
            RetCode::Connection => 10031,
            RetCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for RetCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The terminal's answer to an `order_send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: RetCode,
    /// Order ticket (zero when nothing was placed).
    pub order: u64,
    pub deal: u64,
    pub volume: Decimal,
    pub price: Decimal,
    pub comment: String,
}

impl OrderResult {
    pub fn rejected(retcode: RetCode, comment: impl Into<String>) -> Self {
        Self {
            retcode,
            order: 0,
            deal: 0,
            volume: Decimal::ZERO,
            price: Decimal::ZERO,
            comment: comment.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals & Indicators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    None,
}

impl SignalAction {
    pub fn side(&self) -> Option<Side> {
        match self {
            SignalAction::Buy => Some(Side::Buy),
            SignalAction::Sell => Some(Side::Sell),
            SignalAction::None => None,
        }
    }
}

/// Output of one strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub action: SignalAction,
    pub symbol: String,
    pub entry_price: Decimal,
    pub spread_points: u32,
    pub atr: Decimal,
    pub rsi: Decimal,
    pub confidence: u32,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeSignal {
    /// A non-actionable evaluation result.
    pub fn none(symbol: &str, timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::None,
            symbol: symbol.to_string(),
            entry_price: Decimal::ZERO,
            spread_points: 0,
            atr: Decimal::ZERO,
            rsi: Decimal::ZERO,
            confidence: 0,
            reason: reason.into(),
            timestamp,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::None
    }
}

/// Latest indicator values for one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timeframe: Timeframe,
    pub close: Decimal,
    pub ema_fast: Decimal,
    pub ema_medium: Decimal,
    pub ema_slow: Decimal,
    pub rsi: Decimal,
    pub atr: Decimal,
    pub bars_count: usize,
}

/// Everything a strategy sees on one analysis cycle.
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub symbol: SymbolInfo,
    pub tick: Tick,
    pub m1: IndicatorSnapshot,
    pub m5: IndicatorSnapshot,
}

// ---------------------------------------------------------------------------
// Execution & Journal
// ---------------------------------------------------------------------------

/// Outcome of an attempt to execute a signal or close a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub ticket: Option<u64>,
    pub side: Side,
    pub volume: Decimal,
    pub price: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub filling: FillingMode,
    pub attempts: u32,
    pub retcode: Option<RetCode>,
    pub message: String,
}

/// How a journal row came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeOutcome {
    Executed,
    Failed,
    Shadow,
    Blocked,
    Closed,
}

/// One row of the CSV trade journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: Side,
    pub volume: Decimal,
    pub entry: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub spread_points: u32,
    pub result: TradeOutcome,
    pub reason: String,
    pub ticket: Option<u64>,
    pub profit: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn xauusd() -> SymbolInfo {
        SymbolInfo {
            name: "XAUUSD".to_string(),
            point: dec!(0.01),
            digits: 2,
            volume_min: dec!(0.01),
            volume_max: dec!(1.0),
            volume_step: dec!(0.01),
            trade_tick_value: dec!(1),
            trade_tick_size: dec!(0.01),
            trade_contract_size: dec!(100),
            trade_mode: TradeMode::Full,
        }
    }

    #[test]
    fn test_spread_points() {
        let tick = Tick {
            symbol: "XAUUSD".to_string(),
            time: Utc::now(),
            bid: dec!(2350.10),
            ask: dec!(2350.35),
            volume: Decimal::ZERO,
        };
        assert_eq!(tick.spread_points(dec!(0.01)), 25);
        assert_eq!(tick.spread_points(Decimal::ZERO), 0);
    }

    #[test]
    fn test_pip_size_by_digits() {
        let mut info = xauusd();
        assert_eq!(info.pip_size(), dec!(0.01));
        info.digits = 5;
        info.point = dec!(0.00001);
        assert_eq!(info.pip_size(), dec!(0.0001));
    }

    #[test]
    fn test_normalize_volume_rounds_and_clamps() {
        let info = xauusd();
        assert_eq!(info.normalize_volume(dec!(0.236)), dec!(0.24));
        assert_eq!(info.normalize_volume(dec!(0.001)), dec!(0.01));
        assert_eq!(info.normalize_volume(dec!(7.5)), dec!(1));
        // Halfway between steps goes up, not to the even step.
        assert_eq!(info.normalize_volume(dec!(0.125)), dec!(0.13));
        assert_eq!(info.normalize_volume(dec!(0.145)), dec!(0.15));
        assert!(info.is_valid_volume(dec!(0.05)));
        assert!(!info.is_valid_volume(dec!(0.055)));
    }

    #[test]
    fn test_retcode_serializes_as_numeric_code() {
        let json = serde_json::to_string(&RetCode::InvalidFill).unwrap();
        assert_eq!(json, "10030");
        let code: RetCode = serde_json::from_str("10009").unwrap();
        assert!(code.is_success());
        let unknown: RetCode = serde_json::from_str("12345").unwrap();
        assert_eq!(unknown, RetCode::Other(12345));
        assert!(RetCode::Requote.is_transient());
        assert!(!RetCode::NoMoney.is_transient());
    }
}
