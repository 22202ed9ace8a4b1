use crate::DataError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use scalpbot_core::Bar;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Load OHLC bars from a CSV file, sorted oldest first.
///
/// Accepts plain headers (`time`/`timestamp`, `open`, `high`, `low`,
/// `close`, `tick_volume`/`volume`) as well as the MetaTrader history export
/// layout (`<DATE>`, `<TIME>`, `<OPEN>`, ..., `<TICKVOL>`, tab separated).
pub fn load_bars_from_csv(path: &Path) -> Result<Vec<Bar>, DataError> {
    if !path.exists() {
        return Err(DataError::NotFound(format!("CSV file not found: {}", path.display())));
    }
    let file = std::fs::File::open(path)?;
    let delimiter = if path.extension().is_some_and(|e| e == "tsv") { b'\t' } else { b',' };
    load_bars_from_reader(file, delimiter)
}

/// Same as [`load_bars_from_csv`] over any reader. A header containing tabs
/// switches the delimiter to tab regardless of `delimiter`.
pub fn load_bars_from_reader<R: Read>(mut source: R, delimiter: u8) -> Result<Vec<Bar>, DataError> {
    let mut raw = String::new();
    source.read_to_string(&mut raw)?;
    let delimiter = match raw.lines().next() {
        Some(header) if header.contains('\t') => b'\t',
        _ => delimiter,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {e}")))?
        .clone();
    let columns = Columns::resolve(&headers)?;

    let mut bars = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record {}: {e}", line + 1)))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let time = match columns.time_of_day {
            Some(t) => parse_timestamp(&format!("{} {}", field(columns.time), field(t)))?,
            None => parse_timestamp(field(columns.time))?,
        };
        let tick_volume = match columns.tick_volume {
            Some(idx) => parse_decimal(field(idx), "tick_volume")?,
            None => Decimal::ZERO,
        };

        bars.push(Bar {
            time,
            open: parse_decimal(field(columns.open), "open")?,
            high: parse_decimal(field(columns.high), "high")?,
            low: parse_decimal(field(columns.low), "low")?,
            close: parse_decimal(field(columns.close), "close")?,
            tick_volume,
        });
    }

    bars.sort_by_key(|b| b.time);
    Ok(bars)
}

struct Columns {
    time: usize,
    /// Separate time-of-day column (MetaTrader exports split date and time).
    time_of_day: Option<usize>,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    tick_volume: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, DataError> {
        let required = |names: &[&str], what: &str| {
            find_column(headers, names).ok_or_else(|| DataError::ParseError(format!("No {what} column found")))
        };

        let (time, time_of_day) = match (find_column(headers, &["date"]), find_column(headers, &["time"])) {
            (Some(date), Some(tod)) => (date, Some(tod)),
            _ => (required(&["time", "timestamp", "datetime", "date"], "timestamp")?, None),
        };

        Ok(Self {
            time,
            time_of_day,
            open: required(&["open", "o"], "open")?,
            high: required(&["high", "h"], "high")?,
            low: required(&["low", "l"], "low")?,
            close: required(&["close", "c"], "close")?,
            tick_volume: find_column(headers, &["tick_volume", "tickvol", "volume", "vol"]),
        })
    }
}

fn normalize_header(header: &str) -> String {
    header.trim().trim_start_matches('<').trim_end_matches('>').to_lowercase()
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
    names
        .iter()
        .find_map(|name| normalized.iter().position(|h| h == name))
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, DataError> {
    Decimal::from_str(s.trim())
        .or_else(|_| Decimal::from_scientific(s.trim()))
        .map_err(|e| DataError::ParseError(format!("Failed to parse {field} '{s}': {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DataError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    const FORMATS: [&str; 8] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y.%m.%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    if let Some(naive) = FORMATS.iter().find_map(|f| NaiveDateTime::parse_from_str(s, f).ok()) {
        return Ok(naive.and_utc());
    }

    if let Some(date) = ["%Y-%m-%d", "%Y.%m.%d"]
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
    {
        return Ok(date.and_time(NaiveTime::default()).and_utc());
    }

    // Unix seconds, as returned by copy_rates
    if let Some(dt) = s.parse::<i64>().ok().and_then(|ts| DateTime::from_timestamp(ts, 0)) {
        return Ok(dt);
    }

    Err(DataError::ParseError(format!("Unable to parse timestamp: '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_plain_headers_sorted() {
        let data = "time,open,high,low,close,tick_volume\n\
                    2024-03-04 09:01:00,2001,2002,2000,2001.5,80\n\
                    2024-03-04 09:00:00,2000,2001.2,1999.5,2001,120\n";
        let bars = load_bars_from_reader(data.as_bytes(), b',').unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
        assert_eq!(bars[0].tick_volume, dec!(120));
        assert_eq!(bars[1].close, dec!(2001.5));
    }

    #[test]
    fn test_metatrader_export_layout() {
        let data = "<DATE>\t<TIME>\t<OPEN>\t<HIGH>\t<LOW>\t<CLOSE>\t<TICKVOL>\t<VOL>\t<SPREAD>\n\
                    2024.03.04\t09:00:00\t2000.10\t2001.00\t1999.80\t2000.50\t431\t0\t12\n";
        let bars = load_bars_from_reader(data.as_bytes(), b',').unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].time, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
        assert_eq!(bars[0].low, dec!(1999.80));
        assert_eq!(bars[0].tick_volume, dec!(431));
    }

    #[test]
    fn test_unix_seconds_and_missing_volume() {
        let data = "timestamp,open,high,low,close\n1709542800,1,2,0.5,1.5\n";
        let bars = load_bars_from_reader(data.as_bytes(), b',').unwrap();
        assert_eq!(bars[0].time, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
        assert_eq!(bars[0].tick_volume, Decimal::ZERO);
    }

    #[test]
    fn test_missing_column_is_error() {
        let data = "time,open,high,close\n2024-03-04 09:00:00,1,2,1.5\n";
        match load_bars_from_reader(data.as_bytes(), b',') {
            Err(DataError::ParseError(msg)) => assert!(msg.contains("low")),
            other => panic!("Expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "date,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-03-04T09:00:00Z,10,11,9,10.5,3").unwrap();
        let bars = load_bars_from_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, dec!(10));

        assert!(matches!(
            load_bars_from_csv(Path::new("/nonexistent/bars.csv")),
            Err(DataError::NotFound(_))
        ));
    }
}
