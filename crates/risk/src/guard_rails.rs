use crate::config::GuardRailConfig;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalpbot_core::*;
use tracing::{info, warn};

/// Fraction of the daily loss limit at which a warning is raised.
const DAILY_LOSS_WARNING: Decimal = dec!(0.8);

/// Daily circuit breakers for the scalper.
///
/// Counters are per server-calendar day and roll over on the first
/// evaluation of a new day.
#[derive(Debug, Clone)]
pub struct GuardRails {
    config: GuardRailConfig,
    halted: bool,
    halt_reason: Option<String>,
    violations: Vec<RiskViolation>,
    current_day: Option<NaiveDate>,
    day_start_balance: Decimal,
    trades_today: u32,
    consecutive_losses: u32,
    realized_today: Decimal,
    open_profit: Decimal,
}

impl GuardRails {
    pub fn new(config: GuardRailConfig) -> Self {
        Self {
            config,
            halted: false,
            halt_reason: None,
            violations: Vec::new(),
            current_day: None,
            day_start_balance: Decimal::ZERO,
            trades_today: 0,
            consecutive_losses: 0,
            realized_today: Decimal::ZERO,
            open_profit: Decimal::ZERO,
        }
    }

    pub fn config(&self) -> &GuardRailConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GuardRailConfig) {
        self.config = config;
        self.refresh_violations();
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    /// Realized plus floating P&L since the start of the day.
    pub fn daily_pnl(&self) -> Decimal {
        self.realized_today + self.open_profit
    }

    fn daily_loss_limit(&self) -> Decimal {
        self.day_start_balance * self.config.max_daily_loss_percent / dec!(100)
    }

    /// Reset the daily counters if `now` is on a different day than the last
    /// evaluation. Returns true when a reset happened.
    pub fn roll_day(&mut self, now: DateTime<Utc>, balance: Decimal) -> bool {
        let today = now.date_naive();
        if self.current_day == Some(today) {
            return false;
        }
        self.current_day = Some(today);
        self.reset_daily(balance);
        true
    }

    fn check_daily_loss(&self) -> Option<RiskViolation> {
        let limit = self.daily_loss_limit();
        if limit <= Decimal::ZERO {
            return None;
        }
        let loss = -self.daily_pnl();
        let severity = if loss >= limit {
            RiskSeverity::Breach
        } else if loss >= limit * DAILY_LOSS_WARNING {
            RiskSeverity::Warning
        } else {
            return None;
        };
        let message = match severity {
            RiskSeverity::Breach => format!("Daily loss limit reached: {:.2} loss >= {:.2} limit", loss, limit),
            _ => format!("Approaching daily loss limit: {:.2} loss / {:.2} limit", loss, limit),
        };
        Some(RiskViolation {
            rule: "daily_loss_limit".to_string(),
            message,
            current_value: loss.to_string(),
            threshold: limit.to_string(),
            severity,
        })
    }

    fn check_trade_count(&self) -> Option<RiskViolation> {
        (self.trades_today >= self.config.max_trades_per_day).then(|| RiskViolation {
            rule: "max_trades_per_day".to_string(),
            message: format!(
                "Daily trade limit reached: {} / {}",
                self.trades_today, self.config.max_trades_per_day
            ),
            current_value: self.trades_today.to_string(),
            threshold: self.config.max_trades_per_day.to_string(),
            severity: RiskSeverity::Critical,
        })
    }

    fn check_consecutive_losses(&self) -> Option<RiskViolation> {
        (self.consecutive_losses >= self.config.max_consecutive_losses).then(|| RiskViolation {
            rule: "max_consecutive_losses".to_string(),
            message: format!("Too many consecutive losses: {}", self.consecutive_losses),
            current_value: self.consecutive_losses.to_string(),
            threshold: self.config.max_consecutive_losses.to_string(),
            severity: RiskSeverity::Critical,
        })
    }

    fn in_session(&self, now: DateTime<Utc>) -> bool {
        let time = now.time();
        self.config.sessions.is_empty() || self.config.sessions.iter().any(|w| w.contains(time))
    }

    fn halt(&mut self, reason: String) {
        if !self.halted {
            warn!(reason = %reason, "Trading halted for the day");
        }
        self.halted = true;
        self.halt_reason = Some(reason);
    }

    fn refresh_violations(&mut self) {
        self.violations = [
            self.check_daily_loss(),
            self.check_trade_count(),
            self.check_consecutive_losses(),
        ]
        .into_iter()
        .flatten()
        .collect();
    }
}

impl RiskManager for GuardRails {
    fn evaluate_signal(&mut self, signal: &TradeSignal, account: &AccountInfo, now: DateTime<Utc>) -> RiskDecision {
        self.roll_day(now, account.balance);

        if self.halted {
            let reason = self.halt_reason.as_deref().unwrap_or("risk breach");
            return RiskDecision::Rejected(format!("Trading is halted: {reason}"));
        }

        if let Some(violation) = self.check_trade_count() {
            return RiskDecision::Rejected(violation.message);
        }

        if signal.spread_points > self.config.max_spread_points {
            return RiskDecision::Rejected(format!(
                "Spread too wide for execution: {} > {} points",
                signal.spread_points, self.config.max_spread_points
            ));
        }

        if account.balance <= Decimal::ZERO {
            return RiskDecision::Rejected("Invalid account balance".to_string());
        }

        if let Some(violation) = self.check_consecutive_losses() {
            return RiskDecision::Rejected(violation.message);
        }

        if !self.in_session(now) {
            return RiskDecision::Rejected(format!("Outside trading session at {}", now.format("%H:%M")));
        }

        if let Some(violation) = self.check_daily_loss() {
            if violation.severity == RiskSeverity::Breach {
                let message = violation.message.clone();
                self.halt(message.clone());
                self.refresh_violations();
                return RiskDecision::Rejected(message);
            }
        }

        RiskDecision::Approved
    }

    fn record_execution(&mut self) {
        self.trades_today += 1;
        self.refresh_violations();
    }

    fn record_closed_trade(&mut self, profit: Decimal) {
        self.realized_today += profit;
        if profit < Decimal::ZERO {
            self.consecutive_losses += 1;
        } else if profit > Decimal::ZERO {
            self.consecutive_losses = 0;
        }

        if let Some(v) = self.check_daily_loss() {
            if v.severity == RiskSeverity::Breach {
                self.halt(v.message);
            }
        }
        self.refresh_violations();
    }

    fn update_open_profit(&mut self, profit: Decimal) {
        self.open_profit = profit;
        self.refresh_violations();
    }

    fn reset_daily(&mut self, balance: Decimal) {
        self.day_start_balance = balance;
        self.trades_today = 0;
        self.consecutive_losses = 0;
        self.realized_today = Decimal::ZERO;
        self.open_profit = Decimal::ZERO;
        self.halted = false;
        self.halt_reason = None;
        self.violations.clear();
        info!(balance = %balance, "Daily risk counters reset");
    }

    fn should_halt(&self) -> bool {
        self.halted
    }

    fn active_violations(&self) -> Vec<RiskViolation> {
        self.violations.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    fn account(balance: Decimal) -> AccountInfo {
        AccountInfo {
            login: 1,
            server: "Demo".to_string(),
            currency: "USD".to_string(),
            balance,
            equity: balance,
            margin: Decimal::ZERO,
            margin_free: balance,
            profit: Decimal::ZERO,
        }
    }

    fn buy_signal(spread_points: u32) -> TradeSignal {
        TradeSignal {
            action: SignalAction::Buy,
            symbol: "XAUUSD".to_string(),
            entry_price: dec!(2000),
            spread_points,
            atr: dec!(1),
            rsi: dec!(55),
            confidence: 85,
            reason: "BUY signal confirmed".to_string(),
            timestamp: at(10, 0),
        }
    }

    fn rejected(decision: RiskDecision) -> String {
        match decision {
            RiskDecision::Rejected(msg) => msg,
            RiskDecision::Approved => panic!("Expected rejection"),
        }
    }

    #[test]
    fn test_approves_within_limits() {
        let mut rails = GuardRails::new(GuardRailConfig::default());
        let decision = rails.evaluate_signal(&buy_signal(20), &account(dec!(10000)), at(10, 0));
        assert_eq!(decision, RiskDecision::Approved);
    }

    #[test]
    fn test_trade_count_limit() {
        let mut rails = GuardRails::new(GuardRailConfig {
            max_trades_per_day: 2,
            ..Default::default()
        });
        let acct = account(dec!(10000));
        rails.evaluate_signal(&buy_signal(10), &acct, at(9, 0));
        rails.record_execution();
        rails.record_execution();
        let msg = rejected(rails.evaluate_signal(&buy_signal(10), &acct, at(9, 30)));
        assert!(msg.contains("trade limit"));
    }

    #[test]
    fn test_spread_and_balance_checks() {
        let mut rails = GuardRails::new(GuardRailConfig::default());
        let msg = rejected(rails.evaluate_signal(&buy_signal(31), &account(dec!(10000)), at(10, 0)));
        assert!(msg.contains("Spread"));

        let msg = rejected(rails.evaluate_signal(&buy_signal(10), &account(Decimal::ZERO), at(10, 0)));
        assert!(msg.contains("balance"));
    }

    #[test]
    fn test_consecutive_losses_block_and_win_resets() {
        let mut rails = GuardRails::new(GuardRailConfig::default());
        let acct = account(dec!(100000));
        rails.evaluate_signal(&buy_signal(10), &acct, at(9, 0));
        rails.record_closed_trade(dec!(-10));
        rails.record_closed_trade(dec!(-10));
        rails.record_closed_trade(dec!(25));
        assert_eq!(rails.consecutive_losses(), 0);

        for _ in 0..3 {
            rails.record_closed_trade(dec!(-10));
        }
        let msg = rejected(rails.evaluate_signal(&buy_signal(10), &acct, at(9, 5)));
        assert!(msg.contains("consecutive"));
        assert!(!rails.should_halt());
    }

    #[test]
    fn test_outside_session() {
        let mut rails = GuardRails::new(GuardRailConfig::default());
        let msg = rejected(rails.evaluate_signal(&buy_signal(10), &account(dec!(10000)), at(23, 15)));
        assert!(msg.contains("session"));

        let mut always_open = GuardRails::new(GuardRailConfig {
            sessions: Vec::new(),
            ..Default::default()
        });
        let decision = always_open.evaluate_signal(&buy_signal(10), &account(dec!(10000)), at(23, 15));
        assert_eq!(decision, RiskDecision::Approved);
    }

    #[test]
    fn test_daily_loss_halts_until_next_day() {
        let mut rails = GuardRails::new(GuardRailConfig::default());
        let acct = account(dec!(10000));
        rails.evaluate_signal(&buy_signal(10), &acct, at(9, 0));

        // Limit is 2% of 10000 = 200: 150 realized + 60 floating
        rails.record_closed_trade(dec!(-150));
        rails.update_open_profit(dec!(-60));
        let msg = rejected(rails.evaluate_signal(&buy_signal(10), &acct, at(9, 30)));
        assert!(msg.contains("Daily loss"));
        assert!(rails.should_halt());
        assert!(rails
            .active_violations()
            .iter()
            .any(|v| v.severity == RiskSeverity::Breach));

        // Still halted later the same day even after the float recovers.
        rails.update_open_profit(Decimal::ZERO);
        assert!(rails.evaluate_signal(&buy_signal(10), &acct, at(12, 0)) != RiskDecision::Approved);

        let next_day = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        assert_eq!(rails.evaluate_signal(&buy_signal(10), &acct, next_day), RiskDecision::Approved);
        assert!(!rails.should_halt());
        assert_eq!(rails.trades_today(), 0);
    }

    #[test]
    fn test_daily_loss_warning() {
        let mut rails = GuardRails::new(GuardRailConfig::default());
        rails.roll_day(at(9, 0), dec!(10000));
        rails.update_open_profit(dec!(-170));
        let violations = rails.active_violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, RiskSeverity::Warning);
    }

    #[test]
    fn test_roll_day_only_once_per_day() {
        let mut rails = GuardRails::new(GuardRailConfig::default());
        assert!(rails.roll_day(at(9, 0), dec!(10000)));
        assert!(!rails.roll_day(at(18, 0), dec!(9000)));
    }
}
