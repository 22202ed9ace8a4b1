use rust_decimal::Decimal;
use scalpbot_brokers_metatrader::MetaTraderConfig;
use scalpbot_risk::{validate_config, GuardRailConfig, SessionWindow, SizingConfig, TpSlMode};
use scalpbot_strategies::{IndicatorPeriods, ScalperConfig, TrendFilter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Symbol, order tagging and loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: String,
    /// Tag on every order; only positions carrying it are managed.
    pub magic: u64,
    /// Maximum slippage in points.
    pub deviation: u32,
    /// Log signals instead of sending orders.
    pub shadow_mode: bool,
    pub auto_trading: bool,
    pub journal_dir: PathBuf,
    pub order_comment: String,
    /// Minimum gap between actionable signals, measured on tick time.
    pub cooldown_secs: u64,
    /// Bars requested per timeframe on every analysis cycle.
    pub history_bars: usize,
    pub analysis_interval_ms: u64,
    pub positions_interval_ms: u64,
    pub account_interval_ms: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            magic: 999_888_777,
            deviation: 20,
            shadow_mode: true,
            auto_trading: false,
            journal_dir: PathBuf::from("logs"),
            order_comment: "scalpbot".to_string(),
            cooldown_secs: 30,
            history_bars: 200,
            analysis_interval_ms: 500,
            positions_interval_ms: 2000,
            account_interval_ms: 3000,
        }
    }
}

impl TradingConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX))
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    pub fn positions_interval(&self) -> Duration {
        Duration::from_millis(self.positions_interval_ms)
    }

    pub fn account_interval(&self) -> Duration {
        Duration::from_millis(self.account_interval_ms)
    }
}

/// Complete bot configuration, one TOML file.
///
/// ```toml
/// [terminal]
/// port = 5556
///
/// [trading]
/// symbol = "XAUUSD"
/// shadow_mode = true
///
/// [sizing]
/// risk_percent = "1.0"
/// tp_sl_mode = "atr"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub terminal: MetaTraderConfig,
    pub trading: TradingConfig,
    pub strategy: ScalperConfig,
    pub indicators: IndicatorPeriods,
    pub sizing: SizingConfig,
    pub guard_rails: GuardRailConfig,
}

impl BotConfig {
    /// Read `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Every problem in the configuration, collected rather than stopping at
    /// the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = validate_config(&self.sizing, &self.guard_rails);

        let trading = &self.trading;
        if trading.symbol.trim().is_empty() {
            errors.push("trading.symbol must not be empty".to_string());
        }
        if trading.magic == 0 {
            errors.push("trading.magic must be non-zero".to_string());
        }
        if trading.history_bars < self.indicators.min_bars {
            errors.push(format!(
                "trading.history_bars ({}) must cover indicators.min_bars ({})",
                trading.history_bars, self.indicators.min_bars
            ));
        }
        for (name, value) in [
            ("analysis_interval_ms", trading.analysis_interval_ms),
            ("positions_interval_ms", trading.positions_interval_ms),
            ("account_interval_ms", trading.account_interval_ms),
        ] {
            if value == 0 {
                errors.push(format!("trading.{name} must be positive"));
            }
        }

        if self.strategy.min_confidence > 100 {
            errors.push(format!(
                "strategy.min_confidence must be at most 100, got {}",
                self.strategy.min_confidence
            ));
        }
        if self.strategy.max_spread_points == 0 {
            errors.push("strategy.max_spread_points must be positive".to_string());
        }

        let p = &self.indicators;
        if p.ema_fast == 0 || p.ema_medium == 0 || p.ema_slow == 0 || p.rsi == 0 || p.atr == 0 {
            errors.push("indicators: every period must be positive".to_string());
        }
        if !(p.ema_fast < p.ema_medium && p.ema_medium < p.ema_slow) {
            errors.push(format!(
                "indicators: EMA periods must increase (fast {} < medium {} < slow {})",
                p.ema_fast, p.ema_medium, p.ema_slow
            ));
        }

        if self.terminal.port == 0 {
            errors.push("terminal.port must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// A partial settings change applied while the bot is running.
///
/// Only the fields that are `Some` change; the result is validated as a
/// whole before it replaces the live configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub risk_percent: Option<Decimal>,
    pub tp_sl_mode: Option<TpSlMode>,
    pub sl_value: Option<Decimal>,
    pub tp_value: Option<Decimal>,
    pub min_sl_points: Option<u32>,
    pub max_trades_per_day: Option<u32>,
    pub max_daily_loss_percent: Option<Decimal>,
    pub max_consecutive_losses: Option<u32>,
    pub max_spread_points: Option<u32>,
    pub sessions: Option<Vec<SessionWindow>>,
    pub trend_filter: Option<TrendFilter>,
    pub min_confidence: Option<u32>,
    pub cooldown_secs: Option<u64>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `base` with this patch applied. The spread limit feeds both the
    /// strategy pre-filter and the guard rails.
    pub fn apply_to(&self, base: &BotConfig) -> BotConfig {
        let mut config = base.clone();
        if let Some(v) = self.risk_percent {
            config.sizing.risk_percent = v;
        }
        if let Some(v) = self.tp_sl_mode {
            config.sizing.tp_sl_mode = v;
        }
        if let Some(v) = self.sl_value {
            config.sizing.sl_value = v;
        }
        if let Some(v) = self.tp_value {
            config.sizing.tp_value = v;
        }
        if let Some(v) = self.min_sl_points {
            config.sizing.min_sl_points = v;
        }
        if let Some(v) = self.max_trades_per_day {
            config.guard_rails.max_trades_per_day = v;
        }
        if let Some(v) = self.max_daily_loss_percent {
            config.guard_rails.max_daily_loss_percent = v;
        }
        if let Some(v) = self.max_consecutive_losses {
            config.guard_rails.max_consecutive_losses = v;
        }
        if let Some(v) = self.max_spread_points {
            config.guard_rails.max_spread_points = v;
            config.strategy.max_spread_points = v;
        }
        if let Some(v) = &self.sessions {
            config.guard_rails.sessions = v.clone();
        }
        if let Some(v) = self.trend_filter {
            config.strategy.trend_filter = v;
        }
        if let Some(v) = self.min_confidence {
            config.strategy.min_confidence = v;
        }
        if let Some(v) = self.cooldown_secs {
            config.trading.cooldown_secs = v;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_are_valid() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.magic, 999_888_777);
        assert!(config.trading.shadow_mode);
        assert!(!config.trading.auto_trading);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = BotConfig::from_toml_str(
            r#"
            [trading]
            symbol = "EURUSD"
            shadow_mode = false

            [sizing]
            tp_sl_mode = "pips"
            sl_value = "12"

            [guard_rails]
            sessions = [{ start = "22:00", end = "02:00" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.trading.symbol, "EURUSD");
        assert!(!config.trading.shadow_mode);
        assert_eq!(config.trading.cooldown_secs, 30);
        assert_eq!(config.sizing.tp_sl_mode, TpSlMode::Pips);
        assert_eq!(config.sizing.sl_value, dec!(12));
        assert_eq!(config.sizing.tp_value, dec!(2.0));
        assert_eq!(config.guard_rails.sessions.len(), 1);
        assert_eq!(config.terminal.port, 5556);
    }

    #[test]
    fn test_default_file_parses_back() {
        let text = BotConfig::default().to_toml_string().unwrap();
        assert!(text.contains("[guard_rails]"));
        assert_eq!(BotConfig::from_toml_str(&text).unwrap(), BotConfig::default());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = BotConfig::default();
        config.sizing.risk_percent = dec!(25);
        config.trading.symbol = String::new();
        config.indicators.ema_fast = 30;

        match config.validate() {
            Err(ConfigError::Invalid(errors)) => {
                assert_eq!(errors.len(), 3, "{errors:?}");
                assert!(errors[0].contains("risk_percent"));
            }
            other => panic!("Expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(matches!(
            BotConfig::load(Some(Path::new("/nonexistent/scalpbot.toml"))),
            Err(ConfigError::Io { .. })
        ));
        assert_eq!(BotConfig::load(None).unwrap(), BotConfig::default());
    }

    #[test]
    fn test_patch_spread_updates_both_filters() {
        let patch = ConfigPatch {
            max_spread_points: Some(45),
            min_confidence: Some(80),
            ..Default::default()
        };
        let config = patch.apply_to(&BotConfig::default());
        assert_eq!(config.guard_rails.max_spread_points, 45);
        assert_eq!(config.strategy.max_spread_points, 45);
        assert_eq!(config.strategy.min_confidence, 80);
        assert!(ConfigPatch::default().is_empty());
    }
}
