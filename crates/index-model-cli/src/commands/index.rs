use chrono::NaiveDate;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;

use index_model_core::calculator::{BASE_LEVEL, CONSTITUENT_WEIGHTS};
use index_model_core::csv_io::{self, ExportOptions};
use index_model_core::{with_metadata, IndexModel, IndexPoint, IndexSummary, PriceTable};

use crate::input;

const METHODOLOGY: &str = "Top 3 instruments by price on the prior month's last trading day, \
                           weighted 50/25/25, chain-linked daily from a base of 100";

/// Arguments for index calculation
#[derive(Args)]
pub struct CalculateArgs {
    /// Path to a JSON run file (prices, start_date, end_date, output, decimal_places)
    #[arg(long)]
    pub input: Option<String>,

    /// Path to the price CSV; read from stdin when omitted
    #[arg(long)]
    pub prices: Option<String>,

    /// First index date (DD/MM/YYYY or YYYY-MM-DD); the index is 100 here
    #[arg(long, value_parser = parse_cli_date)]
    pub start: Option<NaiveDate>,

    /// Last index date (DD/MM/YYYY or YYYY-MM-DD)
    #[arg(long, value_parser = parse_cli_date)]
    pub end: Option<NaiveDate>,

    /// Write the index series as CSV (Date,Index) to this path
    #[arg(long)]
    pub out: Option<String>,

    /// Round exported levels to this many decimal places
    #[arg(long)]
    pub decimal_places: Option<u32>,
}

/// Arguments for the monthly constituent listing
#[derive(Args)]
pub struct ConstituentsArgs {
    /// Path to the price CSV; read from stdin when omitted
    #[arg(long)]
    pub prices: Option<String>,
}

/// Run file accepted by `calculate --input`. Flags take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunFile {
    prices: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    output: Option<String>,
    decimal_places: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CalculateOutput {
    #[serde(flatten)]
    summary: IndexSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    levels: Option<Vec<IndexPoint>>,
}

#[derive(Debug, Serialize)]
struct ConstituentRow {
    effective_month: String,
    source_month: String,
    anchor_date: NaiveDate,
    rank_1: String,
    rank_2: String,
    rank_3: String,
}

fn parse_cli_date(s: &str) -> Result<NaiveDate, String> {
    csv_io::parse_date(s).map_err(|e| e.to_string())
}

fn resolve_date(
    flag: Option<NaiveDate>,
    from_file: Option<&str>,
    name: &str,
) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    match (flag, from_file) {
        (Some(date), _) => Ok(date),
        (None, Some(raw)) => Ok(csv_io::parse_date(raw)?),
        (None, None) => Err(format!("--{name} or '{name}_date' in the run file required").into()),
    }
}

fn load_prices(path: Option<&str>) -> Result<PriceTable, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        input::file::read_prices(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(csv_io::read_prices(data.as_bytes())?)
    } else {
        Err("--prices <file.csv> or CSV on stdin required".into())
    }
}

/// Effective settings of a `calculate` run after merging flags over the run file.
#[derive(Debug, PartialEq)]
struct RunSettings {
    prices: Option<String>,
    start: NaiveDate,
    end: NaiveDate,
    out: Option<String>,
    options: ExportOptions,
}

fn merge_settings(
    args: CalculateArgs,
    run: RunFile,
) -> Result<RunSettings, Box<dyn std::error::Error>> {
    Ok(RunSettings {
        start: resolve_date(args.start, run.start_date.as_deref(), "start")?,
        end: resolve_date(args.end, run.end_date.as_deref(), "end")?,
        prices: args.prices.or(run.prices),
        out: args.out.or(run.output),
        options: ExportOptions {
            decimal_places: args.decimal_places.or(run.decimal_places),
        },
    })
}

pub fn run_calculate(args: CalculateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let started = Instant::now();
    let run: RunFile = match args.input {
        Some(ref path) => input::file::read_json(path)?,
        None => RunFile::default(),
    };
    let RunSettings {
        prices,
        start,
        end,
        out,
        options,
    } = merge_settings(args, run)?;

    let prices = load_prices(prices.as_deref())?;
    let mut model = IndexModel::build(prices)?;
    model.calculate(start, end)?;

    if let Some(ref path) = out {
        model.export_to_path(path, &options)?;
        tracing::info!(%path, "Index series written");
    }

    let summary = model
        .summary()
        .ok_or("index series missing after calculation")?;
    let warnings: Vec<String> = model
        .assignment()
        .unassigned_months()
        .iter()
        .map(|m| format!("No constituents for {m}: no prior-month anchor in the data"))
        .collect();
    let levels = match out {
        Some(_) => None,
        None => model.series().map(|s| s.points().to_vec()),
    };

    let assumptions = json!({
        "base_level": BASE_LEVEL,
        "weights": CONSTITUENT_WEIGHTS,
        "start_date": start,
        "end_date": end,
        "decimal_places": options.decimal_places,
    });
    let output = with_metadata(
        METHODOLOGY,
        &assumptions,
        warnings,
        started.elapsed().as_micros() as u64,
        CalculateOutput {
            summary,
            output_path: out,
            levels,
        },
    );
    Ok(serde_json::to_value(output)?)
}

pub fn run_constituents(args: ConstituentsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let prices = load_prices(args.prices.as_deref())?;
    let model = IndexModel::build(prices)?;

    let rows: Vec<ConstituentRow> = model
        .assignment()
        .selections()
        .map(|s| {
            let [r1, r2, r3] = &s.constituents;
            let label = |c: &index_model_core::RankedConstituent| {
                format!("{} ({})", c.ticker, c.anchor_price.normalize())
            };
            ConstituentRow {
                effective_month: s.effective_month.to_string(),
                source_month: s.source_month.to_string(),
                anchor_date: s.anchor_date,
                rank_1: label(r1),
                rank_2: label(r2),
                rank_3: label(r3),
            }
        })
        .collect();
    Ok(serde_json::to_value(rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn make_args() -> CalculateArgs {
        CalculateArgs {
            input: None,
            prices: None,
            start: None,
            end: None,
            out: None,
            decimal_places: None,
        }
    }

    fn make_run_file() -> RunFile {
        serde_json::from_str(
            r#"{
                "prices": "data/stock_prices.csv",
                "start_date": "01/01/2020",
                "end_date": "2020-12-31",
                "output": "export.csv",
                "decimal_places": 6
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_run_file_fills_missing_flags() {
        let settings = merge_settings(make_args(), make_run_file()).unwrap();
        assert_eq!(
            settings,
            RunSettings {
                prices: Some("data/stock_prices.csv".into()),
                start: d(2020, 1, 1),
                end: d(2020, 12, 31),
                out: Some("export.csv".into()),
                options: ExportOptions {
                    decimal_places: Some(6)
                },
            }
        );
    }

    #[test]
    fn test_flags_override_run_file() {
        let mut args = make_args();
        args.prices = Some("other.csv".into());
        args.start = Some(d(2020, 3, 2));
        args.end = Some(d(2020, 6, 30));
        args.out = Some("flag.csv".into());
        args.decimal_places = Some(2);
        let settings = merge_settings(args, make_run_file()).unwrap();
        assert_eq!(settings.prices.as_deref(), Some("other.csv"));
        assert_eq!(settings.start, d(2020, 3, 2));
        assert_eq!(settings.end, d(2020, 6, 30));
        assert_eq!(settings.out.as_deref(), Some("flag.csv"));
        assert_eq!(settings.options.decimal_places, Some(2));
    }

    #[test]
    fn test_flags_alone_need_no_run_file() {
        let mut args = make_args();
        args.start = Some(d(2020, 1, 2));
        args.end = Some(d(2020, 1, 2));
        let settings = merge_settings(args, RunFile::default()).unwrap();
        assert_eq!(settings.prices, None);
        assert_eq!(settings.out, None);
        assert_eq!(settings.options, ExportOptions::default());
    }

    #[test]
    fn test_missing_start_date_error() {
        let mut args = make_args();
        args.end = Some(d(2020, 1, 2));
        let err = merge_settings(args, RunFile::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "--start or 'start_date' in the run file required"
        );
    }

    #[test]
    fn test_missing_end_date_error() {
        let err = resolve_date(None, None, "end").unwrap_err();
        assert_eq!(err.to_string(), "--end or 'end_date' in the run file required");
    }

    #[test]
    fn test_resolve_date_prefers_flag() {
        let date = resolve_date(Some(d(2021, 5, 3)), Some("not a date"), "start").unwrap();
        assert_eq!(date, d(2021, 5, 3));
    }

    #[test]
    fn test_bad_run_file_date_rejected() {
        assert!(resolve_date(None, Some("12/31/2020"), "start").is_err());
    }

    #[test]
    fn test_run_file_rejects_unknown_fields() {
        let result = serde_json::from_str::<RunFile>(r#"{"start": "01/01/2020"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_file_fields_are_optional() {
        let run: RunFile = serde_json::from_str("{}").unwrap();
        assert!(run.prices.is_none());
        assert!(run.start_date.is_none());
        assert!(run.end_date.is_none());
        assert!(run.output.is_none());
        assert!(run.decimal_places.is_none());
    }

    #[test]
    fn test_cli_date_parser_is_day_first() {
        assert_eq!(parse_cli_date("02/03/2020").unwrap(), d(2020, 3, 2));
        assert!(parse_cli_date("2020/03/02").is_err());
    }
}
