use chrono::NaiveDate;
use thiserror::Error;

use crate::types::YearMonth;

#[derive(Debug, Error)]
pub enum IndexModelError {
    #[error("Insufficient constituents: anchor of {month} has {available} priced instruments, 3 required")]
    InsufficientConstituents { month: YearMonth, available: usize },

    #[error("Date not found in trading calendar: {0}")]
    DateNotFound(NaiveDate),

    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Undefined return on {date}: {reason}")]
    UndefinedReturn { date: NaiveDate, reason: String },

    #[error("No constituents effective on {date} (first month of data or a gap month)")]
    UnassignedConstituents { date: NaiveDate },

    #[error("Index has not been calculated; call calculate before export")]
    ExportBeforeCalculate,

    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IndexModelError {
    fn from(e: std::io::Error) -> Self {
        IndexModelError::Io(e.to_string())
    }
}

#[cfg(feature = "csv_io")]
impl From<csv::Error> for IndexModelError {
    fn from(e: csv::Error) -> Self {
        IndexModelError::Io(e.to_string())
    }
}
