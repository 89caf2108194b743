//! Daily geometric chain-linking.
//!
//! `index[start] = 100`; for every later trading day `t` the basket held on
//! `t-1` is valued at both days' prices and the level moves by their ratio:
//!
//! ```text
//! w(t)     = 0.50 * p[t][c1]   + 0.25 * p[t][c2]   + 0.25 * p[t][c3]
//! index[t] = index[t-1] * w(t) / w(t-1)
//! ```
//!
//! All arithmetic uses `rust_decimal::Decimal`. No `f64`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::error::IndexModelError;
use crate::prices::PriceTable;
use crate::selection::{ConstituentAssignment, CONSTITUENT_COUNT};
use crate::types::{IndexPoint, IndexSeries, Level, Price, Weight};
use crate::IndexModelResult;

/// Level of the index on the start date.
pub const BASE_LEVEL: Level = dec!(100);

/// Weights by rank: the highest-priced constituent carries half the basket.
pub const CONSTITUENT_WEIGHTS: [Weight; CONSTITUENT_COUNT] = [dec!(0.50), dec!(0.25), dec!(0.25)];

// ---------------------------------------------------------------------------
// Calculation
// ---------------------------------------------------------------------------

/// Chain-link the index over `[start_date, end_date]`.
pub fn calculate_index(
    prices: &PriceTable,
    assignment: &ConstituentAssignment,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> IndexModelResult<IndexSeries> {
    let (start, end) = validate_window(prices, assignment, start_date, end_date)?;

    let mut points = Vec::with_capacity(end - start + 1);
    points.push(IndexPoint {
        date: start_date,
        value: BASE_LEVEL,
    });

    let mut level = BASE_LEVEL;
    for t in (start + 1)..=end {
        let date = prices.date(t);
        let selection = assignment
            .on_row(t - 1)
            .ok_or(IndexModelError::UnassignedConstituents {
                date: prices.date(t - 1),
            })?;
        let columns = selection.columns();

        let today = basket_value(prices, t, &columns)?;
        let yesterday = basket_value(prices, t - 1, &columns)?;
        if yesterday.is_zero() {
            return Err(IndexModelError::UndefinedReturn {
                date,
                reason: format!("basket value on {} is zero", prices.date(t - 1)),
            });
        }
        if today.is_zero() {
            return Err(IndexModelError::UndefinedReturn {
                date,
                reason: "basket value is zero; the level would drop to zero".into(),
            });
        }

        level = level
            .checked_mul(today)
            .and_then(|v| v.checked_div(yesterday))
            .ok_or_else(|| IndexModelError::UndefinedReturn {
                date,
                reason: "index level overflowed".into(),
            })?;
        points.push(IndexPoint { date, value: level });
    }

    let series = finalize(points, start_date, end_date)?;
    info!(
        start = %start_date,
        end = %end_date,
        points = series.len(),
        last = %level,
        "Index calculated"
    );
    Ok(series)
}

/// Weighted value of the constituents in `columns` on row `row`.
fn basket_value(
    prices: &PriceTable,
    row: usize,
    columns: &[usize; CONSTITUENT_COUNT],
) -> IndexModelResult<Price> {
    let mut total = Decimal::ZERO;
    for (&col, &weight) in columns.iter().zip(CONSTITUENT_WEIGHTS.iter()) {
        let price = prices
            .price(row, col)
            .ok_or_else(|| IndexModelError::UndefinedReturn {
                date: prices.date(row),
                reason: format!("missing price for {}", prices.instruments()[col]),
            })?;
        total = weight
            .checked_mul(price)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| IndexModelError::UndefinedReturn {
                date: prices.date(row),
                reason: "basket value overflowed".into(),
            })?;
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_window(
    prices: &PriceTable,
    assignment: &ConstituentAssignment,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> IndexModelResult<(usize, usize)> {
    if start_date > end_date {
        return Err(IndexModelError::InvalidRange {
            start: start_date,
            end: end_date,
        });
    }
    let start = prices
        .position(start_date)
        .ok_or(IndexModelError::DateNotFound(start_date))?;
    let end = prices
        .position(end_date)
        .ok_or(IndexModelError::DateNotFound(end_date))?;
    if assignment.rows() != prices.len() {
        return Err(IndexModelError::InvalidInput {
            field: "assignment".into(),
            reason: format!(
                "Assignment covers {} rows but the price table has {}",
                assignment.rows(),
                prices.len()
            ),
        });
    }
    debug!(start_row = start, end_row = end, "Calculation window");
    Ok((start, end))
}

/// Drop anything outside the window and check the series invariants.
fn finalize(
    mut points: Vec<IndexPoint>,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> IndexModelResult<IndexSeries> {
    points.retain(|p| p.date >= start_date && p.date <= end_date);

    let seeded = points
        .first()
        .is_some_and(|p| p.date == start_date && p.value == BASE_LEVEL);
    let ends = points.last().is_some_and(|p| p.date == end_date);
    let ordered = points.windows(2).all(|w| w[0].date < w[1].date);
    if !(seeded && ends && ordered) {
        return Err(IndexModelError::InvalidInput {
            field: "index_series".into(),
            reason: "Computed series does not span the requested window".into(),
        });
    }
    Ok(IndexSeries::from_points(points))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::select_constituents;
    use pretty_assertions::assert_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn approx_eq(a: Decimal, b: Decimal, eps: Decimal) -> bool {
        (a - b).abs() < eps
    }

    fn prices_of(records: Vec<(NaiveDate, [Option<Decimal>; 4])>) -> PriceTable {
        PriceTable::from_records(
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            records.into_iter().map(|(d, r)| (d, r.to_vec())).collect(),
        )
        .unwrap()
    }

    fn p(a: Decimal, b: Decimal, c: Decimal, e: Decimal) -> [Option<Decimal>; 4] {
        [Some(a), Some(b), Some(c), Some(e)]
    }

    /// January anchors D > C > B; February moves.
    fn make_base_prices() -> PriceTable {
        prices_of(vec![
            (d(2020, 1, 30), p(dec!(10), dec!(20), dec!(30), dec!(40))),
            (d(2020, 1, 31), p(dec!(10), dec!(20), dec!(30), dec!(40))),
            (d(2020, 2, 3), p(dec!(10), dec!(20), dec!(30), dec!(40))),
            (d(2020, 2, 4), p(dec!(10), dec!(22), dec!(33), dec!(44))),
            (d(2020, 2, 5), p(dec!(99), dec!(22), dec!(33), dec!(22))),
        ])
    }

    fn run(prices: &PriceTable, start: NaiveDate, end: NaiveDate) -> IndexModelResult<IndexSeries> {
        let assignment = select_constituents(prices)?;
        calculate_index(prices, &assignment, start, end)
    }

    #[test]
    fn test_seed_is_exactly_base_level() {
        let prices = make_base_prices();
        let s = run(&prices, d(2020, 2, 3), d(2020, 2, 5)).unwrap();
        assert_eq!(s.first().unwrap().value, dec!(100));
        assert_eq!(s.first().unwrap().date, d(2020, 2, 3));
    }

    #[test]
    fn test_uniform_move_moves_index_by_same_ratio() {
        let prices = make_base_prices();
        let s = run(&prices, d(2020, 2, 3), d(2020, 2, 4)).unwrap();
        // D, C, B all up 10% => basket up 10%
        assert_eq!(s.value_on(d(2020, 2, 4)), Some(dec!(110)));
    }

    #[test]
    fn test_month_constituents_held_fixed() {
        let prices = make_base_prices();
        let s = run(&prices, d(2020, 2, 3), d(2020, 2, 5)).unwrap();
        // A jumps to 99 but is not a February constituent.
        // w(4th) = 0.5*44 + 0.25*33 + 0.25*22 = 35.75
        // w(5th) = 0.5*22 + 0.25*33 + 0.25*22 = 24.75
        let expected = dec!(110) * dec!(24.75) / dec!(35.75);
        let got = s.value_on(d(2020, 2, 5)).unwrap();
        assert!(approx_eq(got, expected, dec!(0.0000000001)), "got {got}");
    }

    #[test]
    fn test_single_day_window() {
        let prices = make_base_prices();
        let s = run(&prices, d(2020, 1, 30), d(2020, 1, 30)).unwrap();
        assert_eq!(
            s.points(),
            &[IndexPoint {
                date: d(2020, 1, 30),
                value: dec!(100)
            }]
        );
    }

    #[test]
    fn test_dates_cover_window_exactly() {
        let prices = make_base_prices();
        let err = run(&prices, d(2020, 1, 31), d(2020, 2, 4)).unwrap_err();
        // Step ending on Feb 3 uses Jan 31's constituents, which do not exist.
        assert!(matches!(err, IndexModelError::UnassignedConstituents { date } if date == d(2020, 1, 31)));

        let s = run(&prices, d(2020, 2, 3), d(2020, 2, 5)).unwrap();
        let dates: Vec<NaiveDate> = s.dates().collect();
        assert_eq!(dates, vec![d(2020, 2, 3), d(2020, 2, 4), d(2020, 2, 5)]);
    }

    #[test]
    fn test_month_boundary_uses_prior_day_constituents() {
        // Feb anchor ranks A first; March 2 still uses February's basket (D, C, B)
        // because the step's constituents come from March 2's prior day.
        let prices = prices_of(vec![
            (d(2020, 1, 31), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 28), p(dec!(50), dec!(2), dec!(3), dec!(4))),
            (d(2020, 3, 2), p(dec!(100), dec!(2), dec!(3), dec!(4))),
            (d(2020, 3, 3), p(dec!(200), dec!(2), dec!(3), dec!(4))),
        ]);
        let s = run(&prices, d(2020, 2, 28), d(2020, 3, 3)).unwrap();
        assert_eq!(s.value_on(d(2020, 3, 2)), Some(dec!(100)));
        // March basket: A(0.5), D(0.25), C(0.25); A doubles.
        // w(2nd) = 50 + 1 + 0.75 = 51.75, w(3rd) = 100 + 1 + 0.75 = 101.75
        let expected = dec!(100) * dec!(101.75) / dec!(51.75);
        let got = s.value_on(d(2020, 3, 3)).unwrap();
        assert!(approx_eq(got, expected, dec!(0.0000000001)), "got {got}");
    }

    #[test]
    fn test_invalid_range() {
        let prices = make_base_prices();
        let err = run(&prices, d(2020, 2, 5), d(2020, 2, 3)).unwrap_err();
        assert!(matches!(err, IndexModelError::InvalidRange { .. }));
    }

    #[test]
    fn test_date_not_found() {
        let prices = make_base_prices();
        let err = run(&prices, d(2020, 2, 1), d(2020, 2, 5)).unwrap_err();
        assert!(matches!(err, IndexModelError::DateNotFound(x) if x == d(2020, 2, 1)));
        let err = run(&prices, d(2020, 2, 3), d(2020, 2, 6)).unwrap_err();
        assert!(matches!(err, IndexModelError::DateNotFound(x) if x == d(2020, 2, 6)));
    }

    #[test]
    fn test_missing_constituent_price_is_undefined() {
        let prices = prices_of(vec![
            (d(2020, 1, 31), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 3), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 4), [Some(dec!(1)), Some(dec!(2)), None, Some(dec!(4))]),
        ]);
        let err = run(&prices, d(2020, 2, 3), d(2020, 2, 4)).unwrap_err();
        assert!(matches!(err, IndexModelError::UndefinedReturn { date, .. } if date == d(2020, 2, 4)));
    }

    #[test]
    fn test_missing_non_constituent_price_is_ignored() {
        let prices = prices_of(vec![
            (d(2020, 1, 31), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 3), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 4), [None, Some(dec!(2)), Some(dec!(3)), Some(dec!(4))]),
        ]);
        let s = run(&prices, d(2020, 2, 3), d(2020, 2, 4)).unwrap();
        assert_eq!(s.value_on(d(2020, 2, 4)), Some(dec!(100)));
    }

    #[test]
    fn test_zero_basket_is_undefined() {
        let prices = prices_of(vec![
            (d(2020, 1, 31), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 3), p(dec!(1), dec!(0), dec!(0), dec!(0))),
            (d(2020, 2, 4), p(dec!(1), dec!(2), dec!(3), dec!(4))),
        ]);
        let err = run(&prices, d(2020, 2, 3), d(2020, 2, 4)).unwrap_err();
        assert!(matches!(err, IndexModelError::UndefinedReturn { .. }));
    }

    #[test]
    fn test_zero_basket_today_is_undefined() {
        let prices = prices_of(vec![
            (d(2020, 1, 31), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 3), p(dec!(1), dec!(2), dec!(3), dec!(4))),
            (d(2020, 2, 4), p(dec!(1), dec!(0), dec!(0), dec!(0))),
        ]);
        let err = run(&prices, d(2020, 2, 3), d(2020, 2, 4)).unwrap_err();
        assert!(matches!(err, IndexModelError::UndefinedReturn { date, .. } if date == d(2020, 2, 4)));
    }

    #[test]
    fn test_basket_overflow_is_undefined() {
        let max = Decimal::MAX;
        let prices = prices_of(vec![
            (d(2020, 1, 31), p(dec!(1), max, max, max)),
            (d(2020, 2, 3), p(dec!(1), max, max, max)),
            (d(2020, 2, 4), p(dec!(1), max, max, max)),
        ]);
        let err = run(&prices, d(2020, 2, 3), d(2020, 2, 4)).unwrap_err();
        match err {
            IndexModelError::UndefinedReturn { date, reason } => {
                assert_eq!(date, d(2020, 2, 4));
                assert!(reason.contains("overflowed"), "{reason}");
            }
            other => panic!("expected UndefinedReturn, got {other:?}"),
        }
    }

    #[test]
    fn test_positive_prices_keep_index_positive() {
        let prices = make_base_prices();
        let s = run(&prices, d(2020, 2, 3), d(2020, 2, 5)).unwrap();
        assert!(s.points().iter().all(|p| p.value > Decimal::ZERO));
    }

    #[test]
    fn test_repeat_calculation_is_identical() {
        let prices = make_base_prices();
        let a = run(&prices, d(2020, 2, 3), d(2020, 2, 5)).unwrap();
        let b = run(&prices, d(2020, 2, 3), d(2020, 2, 5)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: Decimal = CONSTITUENT_WEIGHTS.iter().copied().sum();
        assert_eq!(total, Decimal::ONE);
    }

    #[test]
    fn test_chain_over_many_days_stays_close_to_direct_ratio() {
        // Within one month the chain telescopes to w(end) / w(start).
        let mut records = vec![(d(2020, 1, 31), p(dec!(1), dec!(2), dec!(3), dec!(4)))];
        let mut price = dec!(40);
        for day in 3..=28 {
            price += dec!(0.37);
            records.push((d(2020, 2, day), p(dec!(1), dec!(20), dec!(30), price)));
        }
        let prices = prices_of(records);
        let s = run(&prices, d(2020, 2, 3), d(2020, 2, 28)).unwrap();
        let w = |dp: Decimal| dec!(0.5) * dp + dec!(0.25) * dec!(30) + dec!(0.25) * dec!(20);
        let direct = dec!(100) * w(price) / w(dec!(40.37));
        assert!(approx_eq(s.last().unwrap().value, direct, dec!(0.000000001)));
    }
}
