//! CSV adapters for price tables and index series.
//!
//! Price files carry a date column (named `Date`, otherwise the first column)
//! and one numeric column per instrument. Dates are read day-first. Index
//! files are written as `Date,Index` with `DD/MM/YYYY` dates.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::IndexModelError;
use crate::prices::PriceTable;
use crate::types::{IndexPoint, IndexSeries, Price};
use crate::IndexModelResult;

/// Date format of exported index files.
pub const EXPORT_DATE_FORMAT: &str = "%d/%m/%Y";

/// Accepted input date formats, tried in order.
const INPUT_DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d"];

const EXPORT_HEADER: [&str; 2] = ["Date", "Index"];

/// Formatting of exported index values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Round levels to this many decimal places. `None` writes full precision.
    #[serde(default)]
    pub decimal_places: Option<u32>,
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// Parse a price table from CSV.
pub fn read_prices<R: Read>(reader: R) -> IndexModelResult<PriceTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let date_col = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("date"))
        .unwrap_or(0);
    let instruments: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_col)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let date = parse_date(record.get(date_col).unwrap_or_default())
            .map_err(|e| IndexModelError::Parse(format!("line {line}: {e}")))?;
        let row = record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != date_col)
            .map(|(_, v)| parse_price(v))
            .collect::<IndexModelResult<Vec<Option<Price>>>>()
            .map_err(|e| IndexModelError::Parse(format!("line {line}: {e}")))?;
        records.push((date, row));
    }

    debug!(
        rows = records.len(),
        instruments = instruments.len(),
        "Read price table"
    );
    PriceTable::from_records(instruments, records)
}

/// Read a price table from a CSV file.
pub fn read_prices_from_path<P: AsRef<Path>>(path: P) -> IndexModelResult<PriceTable> {
    let file = std::fs::File::open(path.as_ref()).map_err(|e| {
        IndexModelError::Io(format!("Failed to open '{}': {}", path.as_ref().display(), e))
    })?;
    read_prices(file)
}

/// Parse a day-first date. ISO `YYYY-MM-DD` is accepted as well.
pub fn parse_date(s: &str) -> IndexModelResult<NaiveDate> {
    let s = s.trim();
    INPUT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .ok_or_else(|| IndexModelError::Parse(format!("unrecognised date '{s}'")))
}

/// Empty cells and `NaN` are missing values.
fn parse_price(s: &str) -> IndexModelResult<Option<Price>> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map(Some)
        .map_err(|_| IndexModelError::Parse(format!("invalid price '{s}'")))
}

// ---------------------------------------------------------------------------
// Index series
// ---------------------------------------------------------------------------

/// Write an index series as `Date,Index` CSV.
pub fn write_index_series<W: Write>(
    series: &IndexSeries,
    writer: W,
    options: &ExportOptions,
) -> IndexModelResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(EXPORT_HEADER)?;
    for point in series.points() {
        wtr.write_record([
            point.date.format(EXPORT_DATE_FORMAT).to_string(),
            format_level(point.value, options),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Parse a file produced by [`write_index_series`].
pub fn read_index_series<R: Read>(reader: R) -> IndexModelResult<IndexSeries> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut points: Vec<IndexPoint> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let raw_date = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, EXPORT_DATE_FORMAT)
            .map_err(|e| IndexModelError::Parse(format!("date '{raw_date}': {e}")))?;
        let raw_value = record.get(1).unwrap_or_default();
        let value = Decimal::from_str(raw_value)
            .map_err(|e| IndexModelError::Parse(format!("level '{raw_value}': {e}")))?;
        if points.last().is_some_and(|p| p.date >= date) {
            return Err(IndexModelError::Parse(format!(
                "index dates not strictly ascending at {date}"
            )));
        }
        points.push(IndexPoint { date, value });
    }
    Ok(IndexSeries::from_points(points))
}

fn format_level(value: Decimal, options: &ExportOptions) -> String {
    match options.decimal_places {
        Some(dp) => {
            let mut rounded = value.round_dp(dp);
            rounded.rescale(dp);
            rounded.to_string()
        }
        None => value.normalize().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
