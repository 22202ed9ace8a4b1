use crate::config::{BotConfig, ConfigError, ConfigPatch};
use crate::diagnostic::{CheckStatus, DiagnosticReport};
use crate::execution::{ExecutionError, OrderExecutor};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use scalpbot_core::*;
use scalpbot_data::TradeJournal;
use scalpbot_risk::{lot_size, protective_levels, GuardRails};
use scalpbot_strategies::{snapshot, ScalperStrategy};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Pause after a failed loop cycle before the next one.
const ERROR_BACKOFF: Duration = Duration::from_secs(2);
const EVENT_CAPACITY: usize = 1024;
/// Journal rows kept in memory; the CSV journal holds the full history.
const RECENT_RECORDS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Not connected to the terminal")]
    NotConnected,
    #[error("Algorithmic trading is disabled in the terminal")]
    TradingNotAllowed,
    #[error("Symbol {symbol} unavailable: {reason}")]
    SymbolUnavailable { symbol: String, reason: String },
    #[error("Position {0} not found")]
    PositionNotFound(u64),
}

/// Requests accepted by [`BotController::run`].
#[derive(Debug)]
pub enum BotCommand {
    Connect,
    Disconnect,
    Start,
    Stop,
    SetShadowMode(bool),
    SetAutoTrading(bool),
    UpdateConfig(ConfigPatch),
    ClosePosition(u64),
    CloseAll,
    Diagnose(oneshot::Sender<DiagnosticReport>),
    Shutdown,
}

/// What one analysis cycle ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Not enough history for the indicator snapshots yet.
    Warmup,
    NoSignal(String),
    Cooldown,
    Blocked(String),
    Shadow(TradeSignal),
    Executed(ExecutionReport),
    Failed(ExecutionReport),
}

/// Drives one symbol on one terminal: polls market data, evaluates the
/// strategy, gates signals through the guard rails and executes or
/// shadow-logs them.
///
/// Every state change is published on a broadcast bus (see
/// [`BotController::subscribe`]).
pub struct BotController<T: Terminal> {
    terminal: T,
    config: BotConfig,
    strategy: Box<dyn Strategy>,
    risk: GuardRails,
    executor: OrderExecutor,
    journal: TradeJournal,
    events: broadcast::Sender<BotEvent>,
    connect_retry_delay: Duration,

    connected: bool,
    running: bool,
    status: BotStatus,
    symbol: Option<SymbolInfo>,
    account: Option<AccountInfo>,
    last_tick: Option<Tick>,
    last_signal_at: Option<DateTime<Utc>>,
    /// Own positions as of the last refresh, by ticket.
    positions: HashMap<u64, Position>,
    records: Vec<TradeRecord>,
    record_limit: Option<usize>,
}

impl<T: Terminal> BotController<T> {
    pub fn new(terminal: T, config: BotConfig) -> Result<Self, ControllerError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            terminal,
            strategy: Box::new(ScalperStrategy::new(config.strategy.clone())),
            risk: GuardRails::new(config.guard_rails.clone()),
            executor: OrderExecutor::new(config.trading.magic, config.trading.deviation),
            journal: TradeJournal::new(&config.trading.journal_dir),
            config,
            events,
            connect_retry_delay: CONNECT_RETRY_DELAY,
            connected: false,
            running: false,
            status: BotStatus::Disconnected,
            symbol: None,
            account: None,
            last_tick: None,
            last_signal_at: None,
            positions: HashMap::new(),
            records: Vec::new(),
            record_limit: Some(RECENT_RECORDS),
        })
    }

    /// Override the connect and order retry pauses (replay runs without them).
    pub fn with_retry_delays(mut self, connect: Duration, order: Duration) -> Self {
        self.connect_retry_delay = connect;
        self.executor = self.executor.with_retry_delay(order);
        self
    }

    /// How many journal rows `records` keeps; `None` keeps all of them.
    pub fn with_record_limit(mut self, limit: Option<usize>) -> Self {
        self.record_limit = limit;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn status(&self) -> BotStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn symbol_info(&self) -> Option<&SymbolInfo> {
        self.symbol.as_ref()
    }

    pub fn account(&self) -> Option<&AccountInfo> {
        self.account.as_ref()
    }

    pub fn risk(&self) -> &GuardRails {
        &self.risk
    }

    /// The most recent journal rows of this session, oldest first.
    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Attach to the terminal and check that the configured symbol can be
    /// traded. Tick and history probes only warn.
    pub async fn connect(&mut self) -> Result<(), ControllerError> {
        if self.connected {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.terminal.initialize().await {
                Ok(()) => break,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    self.log(
                        LogLevel::Warning,
                        format!("Terminal initialize attempt {attempt}/{CONNECT_ATTEMPTS} failed: {e}"),
                    );
                    tokio::time::sleep(self.connect_retry_delay).await;
                }
                Err(e) => {
                    self.log(LogLevel::Error, format!("Terminal initialize failed: {e}"));
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self.verify_connection().await {
            self.log(LogLevel::Error, format!("Connection check failed: {e}"));
            if let Err(shutdown_err) = self.terminal.shutdown().await {
                warn!(error = %shutdown_err, "Terminal shutdown failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn verify_connection(&mut self) -> Result<(), ControllerError> {
        let info = self.terminal.terminal_info().await?;
        if !info.trade_allowed {
            return Err(ControllerError::TradingNotAllowed);
        }
        let account = self.terminal.account_info().await?;
        let symbol = self.validate_symbol().await?;

        match self.terminal.symbol_info_tick(&symbol.name).await {
            Ok(tick) => self.last_tick = Some(tick),
            Err(e) => self.log(LogLevel::Warning, format!("No quote for {} yet: {e}", symbol.name)),
        }
        let wanted = self.config.trading.history_bars;
        match self
            .terminal
            .copy_rates_from_pos(&symbol.name, Timeframe::M1, 0, wanted)
            .await
        {
            Ok(bars) if bars.len() < self.config.indicators.min_bars => self.log(
                LogLevel::Warning,
                format!("Only {} M1 bars available for {}", bars.len(), symbol.name),
            ),
            Ok(_) => {}
            Err(e) => self.log(LogLevel::Warning, format!("M1 history unavailable: {e}")),
        }

        self.log(
            LogLevel::Info,
            format!(
                "Connected to {} (build {}), account {} on {}, balance {} {}",
                info.company, info.build, account.login, account.server, account.balance, account.currency
            ),
        );
        self.connected = true;
        self.symbol = Some(symbol);
        self.account = Some(account.clone());
        self.emit(BotEvent::Connection(true));
        self.emit(BotEvent::Account(account));
        self.set_status(BotStatus::Connected);
        Ok(())
    }

    async fn validate_symbol(&mut self) -> Result<SymbolInfo, ControllerError> {
        let name = self.config.trading.symbol.clone();
        let unavailable = |reason: String| ControllerError::SymbolUnavailable {
            symbol: name.clone(),
            reason,
        };

        if !self.terminal.symbol_select(&name, true).await? {
            return Err(unavailable("not offered by the broker".to_string()));
        }
        let info = self.terminal.symbol_info(&name).await?;
        if info.trade_mode != TradeMode::Full {
            return Err(unavailable(format!("trade mode is {:?}", info.trade_mode)));
        }
        if info.volume_min <= Decimal::ZERO {
            return Err(unavailable(format!("invalid minimum volume {}", info.volume_min)));
        }
        Ok(info)
    }

    pub async fn disconnect(&mut self) {
        if self.running {
            self.stop();
        }
        if self.connected {
            if let Err(e) = self.terminal.shutdown().await {
                warn!(error = %e, "Terminal shutdown failed");
            }
            self.log(LogLevel::Info, "Disconnected from terminal");
        }
        self.connected = false;
        self.symbol = None;
        self.emit(BotEvent::Connection(false));
        self.set_status(BotStatus::Disconnected);
    }

    /// Begin evaluating signals. Rolls the risk day on the server clock.
    pub async fn start(&mut self) -> Result<(), ControllerError> {
        if !self.connected {
            return Err(ControllerError::NotConnected);
        }
        if self.running {
            return Ok(());
        }

        let account = self.refresh_account().await?;
        let now = self.server_time().await;
        self.roll_risk_day(now, account.balance);
        self.refresh_positions().await?;

        self.running = true;
        self.set_status(if self.risk.should_halt() {
            BotStatus::Halted
        } else {
            BotStatus::Running
        });
        self.log(
            LogLevel::Info,
            format!(
                "Bot started on {} (shadow mode: {}, auto trading: {})",
                self.config.trading.symbol, self.config.trading.shadow_mode, self.config.trading.auto_trading
            ),
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.set_status(if self.connected {
            BotStatus::Stopped
        } else {
            BotStatus::Disconnected
        });
        self.log(LogLevel::Info, "Bot stopped");
    }

    pub fn set_shadow_mode(&mut self, enabled: bool) {
        self.config.trading.shadow_mode = enabled;
        self.log(
            LogLevel::Info,
            format!("Shadow mode {}", if enabled { "enabled" } else { "disabled" }),
        );
    }

    pub fn set_auto_trading(&mut self, enabled: bool) {
        self.config.trading.auto_trading = enabled;
        self.log(
            LogLevel::Info,
            format!("Auto trading {}", if enabled { "enabled" } else { "disabled" }),
        );
    }

    /// Apply `patch` if the resulting configuration is valid; otherwise
    /// nothing changes.
    pub fn update_config(&mut self, patch: ConfigPatch) -> Result<(), ControllerError> {
        let candidate = patch.apply_to(&self.config);
        if let Err(e) = candidate.validate() {
            self.log(LogLevel::Warning, format!("Settings rejected: {e}"));
            return Err(e.into());
        }

        self.strategy = Box::new(ScalperStrategy::new(candidate.strategy.clone()));
        self.risk.set_config(candidate.guard_rails.clone());
        self.config = candidate;
        self.log(LogLevel::Info, "Settings updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cycles
    // -----------------------------------------------------------------------

    /// One pass of tick → indicators → signal → cooldown → risk → execute.
    pub async fn analysis_cycle(&mut self) -> Result<CycleOutcome, ControllerError> {
        let symbol = self.symbol.clone().ok_or(ControllerError::NotConnected)?;
        let name = symbol.name.clone();

        let tick = self.terminal.symbol_info_tick(&name).await?;
        self.last_tick = Some(tick.clone());
        self.emit(BotEvent::Tick(tick.clone()));

        // The risk day rolls on every cycle, signal or not.
        let account = self.terminal.account_info().await?;
        self.account = Some(account.clone());
        self.roll_risk_day(tick.time, account.balance);

        let count = self.config.trading.history_bars;
        let m1_bars = self.terminal.copy_rates_from_pos(&name, Timeframe::M1, 0, count).await?;
        let m5_bars = self.terminal.copy_rates_from_pos(&name, Timeframe::M5, 0, count).await?;

        let periods = &self.config.indicators;
        let (Some(m1), Some(m5)) = (
            snapshot::compute(&m1_bars, Timeframe::M1, periods),
            snapshot::compute(&m5_bars, Timeframe::M5, periods),
        ) else {
            debug!(symbol = %name, m1 = m1_bars.len(), m5 = m5_bars.len(), "Not enough bars for indicators");
            return Ok(CycleOutcome::Warmup);
        };
        self.emit(BotEvent::Indicators {
            m1: m1.clone(),
            m5: m5.clone(),
        });

        let ctx = MarketContext {
            symbol: symbol.clone(),
            tick: tick.clone(),
            m1,
            m5,
        };
        let signal = self.strategy.evaluate(&ctx);
        let Some(side) = signal.action.side() else {
            debug!(symbol = %name, reason = %signal.reason, "No signal");
            return Ok(CycleOutcome::NoSignal(signal.reason));
        };

        if let Some(last) = self.last_signal_at {
            if tick.time - last < self.config.trading.cooldown() {
                debug!(symbol = %name, "Signal inside cooldown, skipped");
                return Ok(CycleOutcome::Cooldown);
            }
        }
        self.last_signal_at = Some(tick.time);
        self.emit(BotEvent::Signal(signal.clone()));
        self.log(
            LogLevel::Info,
            format!(
                "{} signal on {} at {} (confidence {}%, RSI {:.1}, spread {} pts)",
                side, name, signal.entry_price, signal.confidence, signal.rsi, signal.spread_points
            ),
        );

        let levels = protective_levels(
            side,
            signal.entry_price,
            signal.atr,
            account.balance,
            &symbol,
            &self.config.sizing,
        );
        let volume = lot_size(account.balance, levels.sl_distance, &symbol, &self.config.sizing);
        let mut record = TradeRecord {
            timestamp: tick.time,
            symbol: name.clone(),
            action: side,
            volume,
            entry: signal.entry_price,
            sl: Some(levels.sl),
            tp: Some(levels.tp),
            spread_points: signal.spread_points,
            result: TradeOutcome::Shadow,
            reason: signal.reason.clone(),
            ticket: None,
            profit: Decimal::ZERO,
        };

        let was_halted = self.risk.should_halt();
        if let RiskDecision::Rejected(reason) = self.risk.evaluate_signal(&signal, &account, tick.time) {
            self.log(LogLevel::Warning, format!("Signal blocked: {reason}"));
            self.emit(BotEvent::Risk(RiskEvent::Blocked { reason: reason.clone() }));
            if !was_halted && self.risk.should_halt() {
                self.on_halt();
            }
            record.result = TradeOutcome::Blocked;
            record.reason = reason.clone();
            self.record_trade(record);
            return Ok(CycleOutcome::Blocked(reason));
        }

        let trading = &self.config.trading;
        if !self.running || trading.shadow_mode || !trading.auto_trading {
            self.log(
                LogLevel::Info,
                format!(
                    "Shadow: {} {} {} @ {} SL {} TP {}",
                    side, volume, name, signal.entry_price, levels.sl, levels.tp
                ),
            );
            self.record_trade(record);
            return Ok(CycleOutcome::Shadow(signal));
        }

        let report = self
            .executor
            .execute(
                &mut self.terminal,
                &symbol,
                side,
                volume,
                Some(levels.sl),
                Some(levels.tp),
                &self.config.trading.order_comment,
            )
            .await?;
        self.emit(BotEvent::Execution(report.clone()));

        record.entry = report.price;
        record.volume = report.volume;
        record.ticket = report.ticket;
        if report.success {
            self.risk.record_execution();
            record.result = TradeOutcome::Executed;
            self.record_trade(record);
            // Track the new ticket now so an early SL/TP is still seen as a close.
            if let Err(e) = self.refresh_positions().await {
                warn!(error = %e, "Position refresh after execution failed");
            }
            Ok(CycleOutcome::Executed(report))
        } else {
            self.log(LogLevel::Error, format!("Order failed: {}", report.message));
            record.result = TradeOutcome::Failed;
            record.reason = report.message.clone();
            self.record_trade(record);
            Ok(CycleOutcome::Failed(report))
        }
    }

    pub async fn refresh_account(&mut self) -> Result<AccountInfo, ControllerError> {
        if !self.connected {
            return Err(ControllerError::NotConnected);
        }
        let account = self.terminal.account_info().await?;
        self.account = Some(account.clone());
        self.emit(BotEvent::Account(account.clone()));
        Ok(account)
    }

    /// Fetch the bot's own positions. Tickets that disappeared since the last
    /// refresh are booked as closed with their last known profit.
    pub async fn refresh_positions(&mut self) -> Result<Vec<Position>, ControllerError> {
        if !self.connected {
            return Err(ControllerError::NotConnected);
        }
        let current = self.own_positions().await?;

        let mut closed: Vec<Position> = self
            .positions
            .values()
            .filter(|known| !current.iter().any(|p| p.ticket == known.ticket))
            .cloned()
            .collect();
        closed.sort_by_key(|p| p.ticket);
        for position in closed {
            self.on_position_closed(&position, "Closed by terminal (SL/TP or manual)");
        }

        let open_profit = current.iter().map(|p| p.profit).sum();
        self.risk.update_open_profit(open_profit);
        self.positions = current.iter().map(|p| (p.ticket, p.clone())).collect();
        self.emit(BotEvent::Positions(current.clone()));
        Ok(current)
    }

    pub async fn close_position(&mut self, ticket: u64) -> Result<ExecutionReport, ControllerError> {
        let symbol = self.symbol.clone().ok_or(ControllerError::NotConnected)?;
        let position = self
            .own_positions()
            .await?
            .into_iter()
            .find(|p| p.ticket == ticket)
            .ok_or(ControllerError::PositionNotFound(ticket))?;

        let report = self
            .executor
            .close_position(&mut self.terminal, &symbol, &position)
            .await?;
        self.emit(BotEvent::Execution(report.clone()));

        if report.success {
            self.positions.remove(&ticket);
            self.on_position_closed(&position, "Closed by request");
        } else {
            self.log(
                LogLevel::Error,
                format!("Failed to close position {ticket}: {}", report.message),
            );
        }
        Ok(report)
    }

    /// Stop the bot and close every own position. Individual failures are
    /// logged and do not stop the remaining closes.
    pub async fn close_all_positions(&mut self) -> Result<Vec<ExecutionReport>, ControllerError> {
        self.stop();
        let tickets: Vec<u64> = self.own_positions().await?.iter().map(|p| p.ticket).collect();

        let mut reports = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            match self.close_position(ticket).await {
                Ok(report) => reports.push(report),
                Err(e) => self.log(LogLevel::Error, format!("Failed to close position {ticket}: {e}")),
            }
        }
        Ok(reports)
    }

    /// Check the terminal, account, symbol, quote and history without
    /// sending orders. Initializes the terminal if needed.
    pub async fn diagnostic(&mut self) -> DiagnosticReport {
        let mut report = DiagnosticReport::default();

        match self.config.validate() {
            Ok(()) => report.pass("config", "valid"),
            Err(e) => report.fail("config", e.to_string()),
        }

        if self.terminal.is_connected() {
            report.pass("connection", "terminal attached");
        } else {
            match self.terminal.initialize().await {
                Ok(()) => report.pass("connection", "terminal initialized"),
                Err(e) => {
                    report.fail("connection", e.to_string());
                    return report;
                }
            }
        }

        match self.terminal.terminal_info().await {
            Ok(info) => {
                report.pass("terminal", format!("{} build {}", info.company, info.build));
                if info.trade_allowed {
                    report.pass("algo trading", "enabled");
                } else {
                    report.fail("algo trading", "disabled in the terminal");
                }
            }
            Err(e) => report.fail("terminal", e.to_string()),
        }

        match self.terminal.account_info().await {
            Ok(account) if account.balance > Decimal::ZERO => report.pass(
                "account",
                format!("{} on {}, balance {} {}", account.login, account.server, account.balance, account.currency),
            ),
            Ok(account) => report.warn("account", format!("balance is {}", account.balance)),
            Err(e) => report.fail("account", e.to_string()),
        }

        let name = self.config.trading.symbol.clone();
        let symbol = match self.validate_symbol().await {
            Ok(info) => {
                report.pass(
                    "symbol",
                    format!(
                        "{}: point {}, digits {}, volume {}..{} step {}",
                        info.name, info.point, info.digits, info.volume_min, info.volume_max, info.volume_step
                    ),
                );
                Some(info)
            }
            Err(e) => {
                report.fail("symbol", e.to_string());
                None
            }
        };

        match self.terminal.symbol_info_tick(&name).await {
            Ok(tick) => {
                if let Some(info) = &symbol {
                    let spread = tick.spread_points(info.point);
                    let max = self.config.guard_rails.max_spread_points;
                    if spread > max {
                        report.warn("spread", format!("{spread} points exceeds limit {max}"));
                    } else {
                        report.pass("spread", format!("{spread} points"));
                    }
                }
                let sessions = &self.config.guard_rails.sessions;
                let time = tick.time.time();
                if sessions.is_empty() || sessions.iter().any(|w| w.contains(time)) {
                    report.pass("session", format!("open at {}", time.format("%H:%M")));
                } else {
                    report.warn("session", format!("closed at {}", time.format("%H:%M")));
                }
            }
            Err(e) => report.fail("quote", e.to_string()),
        }

        let wanted = self.config.trading.history_bars;
        let needed = self.config.indicators.min_bars;
        for (label, timeframe) in [("M1 history", Timeframe::M1), ("M5 history", Timeframe::M5)] {
            match self.terminal.copy_rates_from_pos(&name, timeframe, 0, wanted).await {
                Ok(bars) if bars.len() >= needed => report.pass(label, format!("{} bars", bars.len())),
                Ok(bars) => report.warn(label, format!("{} bars, {needed} needed", bars.len())),
                Err(e) => report.fail(label, e.to_string()),
            }
        }

        info!(
            passed = report.count(CheckStatus::Pass),
            failed = report.count(CheckStatus::Fail),
            "Diagnostic finished"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Serve commands and poll the terminal until `shutdown` flips to true,
    /// the command channel closes, or [`BotCommand::Shutdown`] arrives.
    ///
    /// Analysis runs only while the bot is started; position and account
    /// refreshes run while connected. A failing cycle is logged and followed
    /// by a short back-off; it never ends the loop.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<BotCommand>, mut shutdown: watch::Receiver<bool>) {
        let trading = self.config.trading.clone();
        let mut analysis = interval(trading.analysis_interval());
        let mut positions = interval(trading.positions_interval());
        let mut account = interval(trading.account_interval());
        for timer in [&mut analysis, &mut positions, &mut account] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!(symbol = %trading.symbol, "Controller loop started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(BotCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = analysis.tick(), if self.running => {
                    if let Err(e) = self.analysis_cycle().await {
                        self.cycle_failed("analysis", e).await;
                    }
                }
                _ = positions.tick(), if self.connected => {
                    if let Err(e) = self.refresh_positions().await {
                        self.cycle_failed("positions", e).await;
                    }
                }
                _ = account.tick(), if self.connected => {
                    if let Err(e) = self.refresh_account().await {
                        self.cycle_failed("account", e).await;
                    }
                }
            }
        }

        self.disconnect().await;
        info!("Controller loop finished");
    }

    async fn handle_command(&mut self, command: BotCommand) {
        debug!(command = ?command, "Command received");
        let result = match command {
            BotCommand::Connect => self.connect().await,
            BotCommand::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
            BotCommand::Start => self.start().await,
            BotCommand::Stop => {
                self.stop();
                Ok(())
            }
            BotCommand::SetShadowMode(enabled) => {
                self.set_shadow_mode(enabled);
                Ok(())
            }
            BotCommand::SetAutoTrading(enabled) => {
                self.set_auto_trading(enabled);
                Ok(())
            }
            BotCommand::UpdateConfig(patch) => self.update_config(patch),
            BotCommand::ClosePosition(ticket) => self.close_position(ticket).await.map(|_| ()),
            BotCommand::CloseAll => self.close_all_positions().await.map(|_| ()),
            BotCommand::Diagnose(reply) => {
                let report = self.diagnostic().await;
                if reply.send(report).is_err() {
                    debug!("Diagnostic requester went away");
                }
                Ok(())
            }
            BotCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            self.log(LogLevel::Error, format!("Command failed: {e}"));
        }
    }

    async fn cycle_failed(&mut self, cycle: &str, err: ControllerError) {
        self.log(LogLevel::Error, format!("{cycle} cycle failed: {err}"));
        tokio::time::sleep(ERROR_BACKOFF).await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn own_positions(&mut self) -> Result<Vec<Position>, ControllerError> {
        let magic = self.config.trading.magic;
        let positions = self.terminal.positions_get(&self.config.trading.symbol).await?;
        Ok(positions.into_iter().filter(|p| p.magic == magic).collect())
    }

    fn on_position_closed(&mut self, position: &Position, reason: &str) {
        let was_halted = self.risk.should_halt();
        self.risk.record_closed_trade(position.profit);
        self.positions.remove(&position.ticket);

        self.log(
            LogLevel::Info,
            format!("Position {} closed, profit {}", position.ticket, position.profit),
        );
        self.record_trade(TradeRecord {
            timestamp: self.clock(),
            symbol: position.symbol.clone(),
            action: position.side,
            volume: position.volume,
            entry: position.price_open,
            sl: position.sl,
            tp: position.tp,
            spread_points: 0,
            result: TradeOutcome::Closed,
            reason: reason.to_string(),
            ticket: Some(position.ticket),
            profit: position.profit,
        });

        if !was_halted && self.risk.should_halt() {
            self.on_halt();
        }
    }

    /// Reset the risk day when `now` falls on a new server day. A halt
    /// lifted by the reset puts a running bot back to `Running`.
    fn roll_risk_day(&mut self, now: DateTime<Utc>, balance: Decimal) {
        if !self.risk.roll_day(now, balance) {
            return;
        }
        self.emit(BotEvent::Risk(RiskEvent::DailyReset));
        if self.running && !self.risk.should_halt() && self.status == BotStatus::Halted {
            self.log(LogLevel::Info, "New trading day, halt lifted");
            self.set_status(BotStatus::Running);
        }
    }

    fn on_halt(&mut self) {
        let reason = self.risk.halt_reason().unwrap_or("risk breach").to_string();
        self.log(LogLevel::Error, format!("Trading halted: {reason}"));
        self.emit(BotEvent::Risk(RiskEvent::Halted { reason }));
        self.set_status(BotStatus::Halted);
    }

    fn record_trade(&mut self, record: TradeRecord) {
        if let Err(e) = self.journal.append(&record) {
            error!(error = %e, ticket = ?record.ticket, "Failed to write journal row");
        }
        self.records.push(record);
        if let Some(limit) = self.record_limit {
            let excess = self.records.len().saturating_sub(limit);
            self.records.drain(..excess);
        }
    }

    /// Server time of the latest quote, or the local clock before any quote.
    fn clock(&self) -> DateTime<Utc> {
        self.last_tick.as_ref().map(|t| t.time).unwrap_or_else(Utc::now)
    }

    async fn server_time(&mut self) -> DateTime<Utc> {
        match self.terminal.symbol_info_tick(&self.config.trading.symbol).await {
            Ok(tick) => {
                let time = tick.time;
                self.last_tick = Some(tick);
                time
            }
            Err(_) => self.clock(),
        }
    }

    fn set_status(&mut self, status: BotStatus) {
        if self.status != status {
            self.status = status;
            self.emit(BotEvent::Status(status));
        }
    }

    fn emit(&self, event: BotEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.emit(BotEvent::Log { level, message });
    }
}
