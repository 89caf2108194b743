//! Daily price table.
//!
//! One row per trading date, one column per instrument. Missing values are
//! allowed (instruments not yet listed). The date axis is sorted once at
//! construction and every later lookup is a binary search or a row index.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::IndexModelError;
use crate::types::{Price, YearMonth};
use crate::IndexModelResult;

/// Minimum number of instrument columns a table must carry.
pub const MIN_INSTRUMENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    instruments: Vec<String>,
    rows: Vec<Vec<Option<Price>>>,
}

impl PriceTable {
    /// Build a table from rows already in ascending date order.
    pub fn new(
        instruments: Vec<String>,
        dates: Vec<NaiveDate>,
        rows: Vec<Vec<Option<Price>>>,
    ) -> IndexModelResult<Self> {
        let table = Self {
            dates,
            instruments,
            rows,
        };
        table.validate()?;
        Ok(table)
    }

    /// Build a table from `(date, row)` records in any order.
    ///
    /// Records are sorted by date; duplicate dates are rejected.
    pub fn from_records(
        instruments: Vec<String>,
        mut records: Vec<(NaiveDate, Vec<Option<Price>>)>,
    ) -> IndexModelResult<Self> {
        records.sort_by_key(|(date, _)| *date);
        let (dates, rows) = records.into_iter().unzip();
        Self::new(instruments, dates, rows)
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn date(&self, row: usize) -> NaiveDate {
        self.dates[row]
    }

    pub fn row(&self, row: usize) -> &[Option<Price>] {
        &self.rows[row]
    }

    /// Price of instrument column `col` on row `row`.
    pub fn price(&self, row: usize, col: usize) -> Option<Price> {
        self.rows.get(row).and_then(|r| r.get(col).copied().flatten())
    }

    /// Row position of `date`, if it is a trading date.
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    pub fn instrument_index(&self, ticker: &str) -> Option<usize> {
        self.instruments.iter().position(|t| t == ticker)
    }

    /// Last row of every calendar month, in date order.
    pub fn month_anchors(&self) -> Vec<(YearMonth, usize)> {
        let mut anchors: Vec<(YearMonth, usize)> = Vec::new();
        for (i, date) in self.dates.iter().enumerate() {
            let ym = YearMonth::of(*date);
            match anchors.last_mut() {
                Some((last_ym, last_row)) if *last_ym == ym => *last_row = i,
                _ => anchors.push((ym, i)),
            }
        }
        anchors
    }

    fn validate(&self) -> IndexModelResult<()> {
        if self.dates.is_empty() {
            return Err(IndexModelError::InvalidInput {
                field: "prices".into(),
                reason: "Price table has no rows".into(),
            });
        }
        if self.instruments.len() < MIN_INSTRUMENTS {
            return Err(IndexModelError::InvalidInput {
                field: "instruments".into(),
                reason: format!(
                    "At least {MIN_INSTRUMENTS} instrument columns are required, found {}",
                    self.instruments.len()
                ),
            });
        }
        let mut seen = HashSet::new();
        for name in &self.instruments {
            if name.trim().is_empty() {
                return Err(IndexModelError::InvalidInput {
                    field: "instruments".into(),
                    reason: "Instrument names must be non-empty".into(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(IndexModelError::InvalidInput {
                    field: "instruments".into(),
                    reason: format!("Duplicate instrument column: {name}"),
                });
            }
        }
        if self.rows.len() != self.dates.len() {
            return Err(IndexModelError::InvalidInput {
                field: "rows".into(),
                reason: format!(
                    "{} dates but {} price rows",
                    self.dates.len(),
                    self.rows.len()
                ),
            });
        }
        for (date, row) in self.dates.iter().zip(&self.rows) {
            if row.len() != self.instruments.len() {
                return Err(IndexModelError::InvalidInput {
                    field: "rows".into(),
                    reason: format!(
                        "Row {date} has {} values, expected {}",
                        row.len(),
                        self.instruments.len()
                    ),
                });
            }
            for (name, price) in self.instruments.iter().zip(row) {
                if matches!(price, Some(p) if *p < Decimal::ZERO) {
                    return Err(IndexModelError::InvalidInput {
                        field: "price".into(),
                        reason: format!("Negative price for {name} on {date}"),
                    });
                }
            }
        }
        for pair in self.dates.windows(2) {
            if pair[0] >= pair[1] {
                return Err(IndexModelError::InvalidInput {
                    field: "dates".into(),
                    reason: if pair[0] == pair[1] {
                        format!("Duplicate trading date {}", pair[0])
                    } else {
                        format!("Dates out of order: {} before {}", pair[0], pair[1])
                    },
                });
            }
        }
        Ok(())
    }
}
