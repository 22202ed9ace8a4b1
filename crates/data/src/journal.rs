use chrono::NaiveDate;
use scalpbot_core::TradeRecord;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Journal CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only CSV journal with one file per trading day.
///
/// Rows go to `<dir>/trades_YYYYMMDD.csv`, keyed by the record's own
/// timestamp. The header is written when a day's file is created.
#[derive(Debug, Clone)]
pub struct TradeJournal {
    dir: PathBuf,
}

impl TradeJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("trades_{}.csv", date.format("%Y%m%d")))
    }

    /// Append one record, returning the file it was written to.
    pub fn append(&self, record: &TradeRecord) -> Result<PathBuf, JournalError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(record.timestamp.date_naive());

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;

        debug!(path = %path.display(), result = ?record.result, "Journal row written");
        Ok(path)
    }

    /// All rows recorded for `date`, in file order. A missing file is an empty day.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<TradeRecord>, JournalError> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let records = reader.deserialize().collect::<Result<Vec<TradeRecord>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use scalpbot_core::{Side, TradeOutcome};

    fn record(day: u32, result: TradeOutcome, ticket: Option<u64>) -> TradeRecord {
        TradeRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 10, 15, 0).unwrap(),
            symbol: "XAUUSD".to_string(),
            action: Side::Buy,
            volume: dec!(0.33),
            entry: dec!(2010.20),
            sl: Some(dec!(2007.20)),
            tp: if ticket.is_some() { Some(dec!(2014.20)) } else { None },
            spread_points: 20,
            result,
            reason: "BUY signal confirmed".to_string(),
            ticket,
            profit: Decimal::ZERO,
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TradeJournal::new(dir.path());

        let path = journal.append(&record(4, TradeOutcome::Shadow, None)).unwrap();
        journal.append(&record(4, TradeOutcome::Executed, Some(42))).unwrap();
        assert!(path.ends_with("trades_20240304.csv"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "timestamp,symbol,action,volume,entry,sl,tp,spread_points,result,reason,ticket,profit"
        );
        assert!(lines[1].contains(",BUY,"));
        assert!(lines[1].contains(",SHADOW,"));
        assert_eq!(contents.matches("timestamp").count(), 1);
    }

    #[test]
    fn test_read_day_back() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TradeJournal::new(dir.path().join("logs"));

        journal.append(&record(4, TradeOutcome::Executed, Some(42))).unwrap();
        journal.append(&record(4, TradeOutcome::Shadow, None)).unwrap();
        journal.append(&record(5, TradeOutcome::Blocked, None)).unwrap();

        let day = journal.read_day(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()).unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].ticket, Some(42));
        assert_eq!(day[0].tp, Some(dec!(2014.20)));
        assert_eq!(day[1].result, TradeOutcome::Shadow);
        assert_eq!(day[1].tp, None);
        assert_eq!(day[1].ticket, None);

        let next = journal.read_day(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()).unwrap();
        assert_eq!(next[0].result, TradeOutcome::Blocked);

        let empty = journal.read_day(NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()).unwrap();
        assert!(empty.is_empty());
    }
}
