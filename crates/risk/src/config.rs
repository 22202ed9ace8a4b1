use crate::sizing::SizingConfig;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A daily trading window in server time. `end < start` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl SessionWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether `time` falls inside the window (both ends inclusive).
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

impl std::fmt::Display for SessionWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Circuit breaker limits applied to every signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardRailConfig {
    pub max_trades_per_day: u32,
    /// Percent of the balance at the start of the day.
    pub max_daily_loss_percent: Decimal,
    pub max_consecutive_losses: u32,
    pub max_spread_points: u32,
    /// Allowed trading windows; empty means always open.
    pub sessions: Vec<SessionWindow>,
}

impl Default for GuardRailConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day: 15,
            max_daily_loss_percent: dec!(2.0),
            max_consecutive_losses: 3,
            max_spread_points: 30,
            sessions: vec![SessionWindow::new(
                NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
                NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            )],
        }
    }
}

/// Check sizing and guard rail settings, returning every problem found.
pub fn validate_config(sizing: &SizingConfig, rails: &GuardRailConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if sizing.risk_percent <= Decimal::ZERO || sizing.risk_percent > dec!(10) {
        errors.push(format!(
            "sizing.risk_percent must be in (0, 10], got {}",
            sizing.risk_percent
        ));
    }
    if sizing.sl_value <= Decimal::ZERO {
        errors.push(format!("sizing.sl_value must be positive, got {}", sizing.sl_value));
    }
    if sizing.tp_value <= Decimal::ZERO {
        errors.push(format!("sizing.tp_value must be positive, got {}", sizing.tp_value));
    }

    if rails.max_spread_points == 0 {
        errors.push("guard_rails.max_spread_points must be positive".to_string());
    }
    if rails.max_trades_per_day == 0 {
        errors.push("guard_rails.max_trades_per_day must be positive".to_string());
    }
    if rails.max_consecutive_losses == 0 {
        errors.push("guard_rails.max_consecutive_losses must be positive".to_string());
    }
    if rails.max_daily_loss_percent <= Decimal::ZERO || rails.max_daily_loss_percent > dec!(100) {
        errors.push(format!(
            "guard_rails.max_daily_loss_percent must be in (0, 100], got {}",
            rails.max_daily_loss_percent
        ));
    }
    for window in &rails.sessions {
        if window.start == window.end {
            errors.push(format!("guard_rails.sessions: empty window {window}"));
        }
    }

    errors
}

/// `HH:MM` (or `HH:MM:SS`) serde format for session bounds.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{raw}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_session_window_contains() {
        let day = SessionWindow::new(t(8, 0), t(22, 0));
        assert!(day.contains(t(8, 0)));
        assert!(day.contains(t(15, 30)));
        assert!(day.contains(t(22, 0)));
        assert!(!day.contains(t(22, 1)));
        assert!(!day.contains(t(7, 59)));
    }

    #[test]
    fn test_session_window_wraps_midnight() {
        let night = SessionWindow::new(t(22, 0), t(2, 0));
        assert!(night.contains(t(23, 0)));
        assert!(night.contains(t(1, 0)));
        assert!(!night.contains(t(12, 0)));
    }

    #[test]
    fn test_sessions_parse_from_toml() {
        let rails: GuardRailConfig = toml::from_str(
            r#"
            max_trades_per_day = 5
            sessions = [
                { start = "07:00", end = "11:30" },
                { start = "13:00:00", end = "17:00" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(rails.max_trades_per_day, 5);
        assert_eq!(rails.max_spread_points, 30);
        assert_eq!(rails.sessions.len(), 2);
        assert_eq!(rails.sessions[0].end, t(11, 30));
        assert_eq!(rails.sessions[1].start, t(13, 0));
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&SizingConfig::default(), &GuardRailConfig::default()).is_empty());

        let sizing = SizingConfig {
            risk_percent: dec!(12),
            ..Default::default()
        };
        let rails = GuardRailConfig {
            max_spread_points: 0,
            max_trades_per_day: 0,
            ..Default::default()
        };
        let errors = validate_config(&sizing, &rails);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("risk_percent"));
    }
}
