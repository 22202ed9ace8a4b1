pub mod csv_loader;
pub mod journal;

pub use csv_loader::load_bars_from_csv;
pub use journal::{JournalError, TradeJournal};

/// Errors raised while loading historical data.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
