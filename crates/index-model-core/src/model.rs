//! Staged index model: build (load + rebalance), calculate, export.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calculator::calculate_index;
use crate::prices::PriceTable;
use crate::selection::{select_constituents, ConstituentAssignment};
use crate::types::{IndexSeries, Level, YearMonth};
use crate::IndexModelResult;

#[cfg(feature = "csv_io")]
use crate::csv_io::{self, ExportOptions};
#[cfg(feature = "csv_io")]
use crate::error::IndexModelError;

/// Phase the model has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStage {
    /// Prices loaded and monthly constituents assigned.
    Rebalanced,
    /// An index series is available for export.
    Calculated,
    /// The current series has been written out at least once.
    Exported,
}

/// Headline figures of a calculated series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub points: usize,
    pub first_level: Level,
    pub last_level: Level,
    pub min_level: Level,
    pub max_level: Level,
    pub total_return: Decimal,
    /// Effective months touched by the window, each with its own basket.
    pub months: Vec<YearMonth>,
}

#[derive(Debug, Clone)]
pub struct IndexModel {
    prices: PriceTable,
    assignment: ConstituentAssignment,
    series: Option<IndexSeries>,
    exported: bool,
}

impl IndexModel {
    /// Assign monthly constituents for `prices`.
    pub fn build(prices: PriceTable) -> IndexModelResult<Self> {
        let assignment = select_constituents(&prices)?;
        info!(
            rows = prices.len(),
            instruments = prices.instruments().len(),
            selections = assignment.selections().count(),
            "Index model built"
        );
        Ok(Self {
            prices,
            assignment,
            series: None,
            exported: false,
        })
    }

    pub fn stage(&self) -> ModelStage {
        match (&self.series, self.exported) {
            (None, _) => ModelStage::Rebalanced,
            (Some(_), false) => ModelStage::Calculated,
            (Some(_), true) => ModelStage::Exported,
        }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn assignment(&self) -> &ConstituentAssignment {
        &self.assignment
    }

    pub fn series(&self) -> Option<&IndexSeries> {
        self.series.as_ref()
    }

    /// Compute the index over `[start_date, end_date]`.
    ///
    /// On failure any previously calculated series is discarded.
    pub fn calculate(
        &mut self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> IndexModelResult<&IndexSeries> {
        self.series = None;
        self.exported = false;
        let series = calculate_index(&self.prices, &self.assignment, start_date, end_date)?;
        Ok(&*self.series.insert(series))
    }

    pub fn summary(&self) -> Option<IndexSummary> {
        let series = self.series.as_ref()?;
        let first = series.first()?;
        let last = series.last()?;
        let levels = series.points().iter().map(|p| p.value);
        let min_level = levels.clone().min()?;
        let max_level = levels.max()?;

        let mut months: Vec<YearMonth> = series.dates().map(YearMonth::of).collect();
        months.dedup();

        Some(IndexSummary {
            start_date: first.date,
            end_date: last.date,
            points: series.len(),
            first_level: first.value,
            last_level: last.value,
            min_level,
            max_level,
            total_return: series.total_return().unwrap_or_default(),
            months,
        })
    }

    #[cfg(feature = "csv_io")]
    fn calculated(&self) -> IndexModelResult<&IndexSeries> {
        self.series
            .as_ref()
            .ok_or(IndexModelError::ExportBeforeCalculate)
    }

    /// Write the calculated series to `destination` at full precision.
    #[cfg(feature = "csv_io")]
    pub fn export<W: std::io::Write>(&mut self, destination: W) -> IndexModelResult<()> {
        self.export_with(destination, &ExportOptions::default())
    }

    #[cfg(feature = "csv_io")]
    pub fn export_with<W: std::io::Write>(
        &mut self,
        destination: W,
        options: &ExportOptions,
    ) -> IndexModelResult<()> {
        self.render(destination, options)?;
        self.exported = true;
        Ok(())
    }

    #[cfg(feature = "csv_io")]
    fn render<W: std::io::Write>(&self, destination: W, options: &ExportOptions) -> IndexModelResult<()> {
        let series = self.calculated()?;
        csv_io::write_index_series(series, destination, options)?;
        info!(points = series.len(), "Index exported");
        Ok(())
    }

    /// Write the calculated series to a file. The file is only created once
    /// the full output has been rendered.
    #[cfg(feature = "csv_io")]
    pub fn export_to_path<P: AsRef<std::path::Path>>(
        &mut self,
        path: P,
        options: &ExportOptions,
    ) -> IndexModelResult<()> {
        let mut buffer = Vec::new();
        self.render(&mut buffer, options)?;
        std::fs::write(path.as_ref(), buffer).map_err(|e| {
            IndexModelError::Io(format!("Failed to write '{}': {}", path.as_ref().display(), e))
        })?;
        self.exported = true;
        Ok(())
    }
}
