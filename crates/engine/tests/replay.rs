use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalpbot_core::*;
use scalpbot_data::TradeJournal;
use scalpbot_engine::{run_replay, BotConfig, ReplayConfig};

fn xauusd() -> SymbolInfo {
    SymbolInfo {
        name: "XAUUSD".to_string(),
        point: dec!(0.01),
        digits: 2,
        volume_min: dec!(0.01),
        volume_max: dec!(50),
        volume_step: dec!(0.01),
        trade_tick_value: dec!(1),
        trade_tick_size: dec!(0.01),
        trade_contract_size: dec!(100),
        trade_mode: TradeMode::Full,
    }
}

fn series(count: usize, drift: Decimal, zigzag: bool) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let mut prev = dec!(2000);
    (0..count)
        .map(|i| {
            let wiggle = match (zigzag, i % 2 == 0) {
                (false, _) => Decimal::ZERO,
                (true, true) => dec!(0.15),
                (true, false) => dec!(-0.10),
            };
            let close = dec!(2000) + drift * Decimal::from(i) + wiggle;
            let bar = Bar {
                time: start + Duration::minutes(i as i64),
                open: prev,
                high: prev.max(close) + dec!(0.05),
                low: prev.min(close) - dec!(0.05),
                close,
                tick_volume: dec!(100),
            };
            prev = close;
            bar
        })
        .collect()
}

fn config(journal_dir: &std::path::Path) -> ReplayConfig {
    let mut bot = BotConfig::default();
    bot.trading.journal_dir = journal_dir.to_path_buf();
    ReplayConfig::new(bot, xauusd(), dec!(10000))
}

#[tokio::test]
async fn test_uptrend_replay_takes_profits_until_trade_limit() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_replay(series(700, dec!(0.05), true), config(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.bars_processed, 400);

    let executed = report
        .records
        .iter()
        .filter(|r| r.result == TradeOutcome::Executed)
        .count();
    assert_eq!(executed, 15);
    assert!(report
        .records
        .iter()
        .any(|r| r.result == TradeOutcome::Blocked && r.reason.contains("Daily trade limit")));
    assert!(report.records.iter().all(|r| r.result != TradeOutcome::Failed));

    // Every entry reaches its target: 200 points at 0.67 lots.
    assert_eq!(report.summary.total_trades, 15);
    assert_eq!(report.summary.winning_trades, 15);
    assert_eq!(report.summary.net_profit, dec!(2010));
    assert_eq!(report.summary.profit_factor, dec!(999.99));
    assert_eq!(report.final_balance, dec!(12010));
    assert!(report.closed_trades.iter().all(|t| t.reason == "Take profit hit"));

    let journal = TradeJournal::new(dir.path());
    let day = journal.read_day(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()).unwrap();
    assert_eq!(day.len(), report.records.len());
    assert_eq!(
        day.iter().filter(|r| r.result == TradeOutcome::Closed).count(),
        15
    );
}

#[tokio::test]
async fn test_flat_market_never_trades() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_replay(series(400, Decimal::ZERO, false), config(dir.path()))
        .await
        .unwrap();

    assert!(report.records.is_empty());
    assert_eq!(report.summary.total_trades, 0);
    assert_eq!(report.final_balance, dec!(10000));
    assert_eq!(report.summary.max_drawdown, Decimal::ZERO);
}

#[tokio::test]
async fn test_history_shorter_than_warmup_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    assert!(run_replay(series(100, dec!(0.05), true), config(dir.path()))
        .await
        .is_err());
}
