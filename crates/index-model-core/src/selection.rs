//! Monthly constituent selection.
//!
//! The last trading day of every calendar month is that month's anchor. The
//! three highest-priced instruments on the anchor become the constituents for
//! every trading day of the *following* month, so a selection only ever uses
//! data that was available before the month it applies to began.
//!
//! Ties are resolved by column order: when two instruments carry the same
//! anchor price, the one appearing earlier in the price table ranks higher.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::IndexModelError;
use crate::prices::PriceTable;
use crate::types::{Price, YearMonth};
use crate::IndexModelResult;

/// Number of instruments held by the index in every month.
pub const CONSTITUENT_COUNT: usize = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One ranked member of a monthly selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedConstituent {
    pub ticker: String,
    /// Column of the instrument in the source price table.
    pub column: usize,
    pub anchor_price: Price,
}

/// Constituents chosen on one month's anchor, effective for the next month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub source_month: YearMonth,
    pub effective_month: YearMonth,
    pub anchor_date: NaiveDate,
    /// Rank order: index 0 is the highest anchor price.
    pub constituents: [RankedConstituent; CONSTITUENT_COUNT],
}

impl Selection {
    pub fn columns(&self) -> [usize; CONSTITUENT_COUNT] {
        [
            self.constituents[0].column,
            self.constituents[1].column,
            self.constituents[2].column,
        ]
    }

    pub fn tickers(&self) -> [&str; CONSTITUENT_COUNT] {
        [
            self.constituents[0].ticker.as_str(),
            self.constituents[1].ticker.as_str(),
            self.constituents[2].ticker.as_str(),
        ]
    }
}

/// Constituents effective on each trading day of a price table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstituentAssignment {
    /// Keyed by effective month.
    selections: BTreeMap<YearMonth, Selection>,
    /// Aligned with the price table's date axis.
    daily: Vec<Option<YearMonth>>,
    unassigned_months: Vec<YearMonth>,
}

impl ConstituentAssignment {
    /// Selection in force during `month`.
    pub fn effective_in(&self, month: YearMonth) -> Option<&Selection> {
        self.selections.get(&month)
    }

    /// Selection in force on `date`.
    pub fn effective_on(&self, date: NaiveDate) -> Option<&Selection> {
        self.effective_in(YearMonth::of(date))
    }

    /// Selection in force on row `row` of the price table it was built from.
    pub fn on_row(&self, row: usize) -> Option<&Selection> {
        self.daily
            .get(row)
            .copied()
            .flatten()
            .and_then(|m| self.selections.get(&m))
    }

    /// Number of price rows this assignment covers.
    pub fn rows(&self) -> usize {
        self.daily.len()
    }

    /// All selections in effective-month order. The last one may apply to a
    /// month beyond the end of the data.
    pub fn selections(&self) -> impl Iterator<Item = &Selection> {
        self.selections.values()
    }

    /// Months present in the data that have no selection in force.
    pub fn unassigned_months(&self) -> &[YearMonth] {
        &self.unassigned_months
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Rank every monthly anchor and broadcast each selection over the following
/// calendar month.
pub fn select_constituents(prices: &PriceTable) -> IndexModelResult<ConstituentAssignment> {
    let anchors = prices.month_anchors();

    let mut selections = BTreeMap::new();
    for &(month, row) in &anchors {
        let selection = rank_anchor(prices, month, row)?;
        debug!(
            source = %selection.source_month,
            effective = %selection.effective_month,
            anchor = %selection.anchor_date,
            constituents = ?selection.tickers(),
            "Monthly selection"
        );
        selections.insert(selection.effective_month, selection);
    }

    let daily: Vec<Option<YearMonth>> = prices
        .dates()
        .iter()
        .map(|d| YearMonth::of(*d))
        .map(|m| selections.contains_key(&m).then_some(m))
        .collect();

    let unassigned_months: Vec<YearMonth> = anchors
        .iter()
        .map(|(m, _)| *m)
        .filter(|m| !selections.contains_key(m))
        .collect();
    for month in unassigned_months.iter().skip(1) {
        warn!(%month, "No anchor in the preceding month; month is unassigned");
    }

    Ok(ConstituentAssignment {
        selections,
        daily,
        unassigned_months,
    })
}

/// Top instruments by price on the anchor row of `month`.
fn rank_anchor(prices: &PriceTable, month: YearMonth, row: usize) -> IndexModelResult<Selection> {
    let mut priced: Vec<(usize, Price)> = prices
        .row(row)
        .iter()
        .enumerate()
        .filter_map(|(col, p)| p.map(|p| (col, p)))
        .collect();

    if priced.len() < CONSTITUENT_COUNT {
        return Err(IndexModelError::InsufficientConstituents {
            month,
            available: priced.len(),
        });
    }

    // Stable sort keeps column order among equal prices.
    priced.sort_by(|a, b| b.1.cmp(&a.1));

    let ranked: Vec<RankedConstituent> = priced
        .into_iter()
        .take(CONSTITUENT_COUNT)
        .map(|(column, anchor_price)| RankedConstituent {
            ticker: prices.instruments()[column].clone(),
            column,
            anchor_price,
        })
        .collect();

    let constituents: [RankedConstituent; CONSTITUENT_COUNT] =
        ranked.try_into().map_err(|_| IndexModelError::InsufficientConstituents {
            month,
            available: 0,
        })?;

    Ok(Selection {
        source_month: month,
        effective_month: month.succ(),
        anchor_date: prices.date(row),
        constituents,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
