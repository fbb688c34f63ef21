//! Reads the facility export workbook into raw staging rows.
//!
//! The workbook has one sheet of per-rack operations and one sheet of energy
//! costs. Columns are located by header name, never by position. Cells are
//! coerced to the raw row types; no row is dropped except fully empty
//! padding rows at the end of a sheet.

use anyhow::{bail, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use warehouse::{RawCostRow, RawOperationRow};

pub const OPERATION_COLUMNS: &[&str] = &[
    "datetime",
    "zone",
    "rack_id",
    "power_kw",
    "temperature_c",
    "utilization_pct",
    "incidents",
];

pub const COST_COLUMNS: &[&str] = &["datetime", "zone", "total_power_kw", "cost_per_kw_usd"];

/// Text layouts accepted for timestamp cells stored as strings.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Both sheets of one export, plus the hash of the file they came from.
#[derive(Debug, Clone, Default)]
pub struct SourceExport {
    pub operations: Vec<RawOperationRow>,
    pub costs: Vec<RawCostRow>,
    pub content_hash: Option<String>,
}

pub fn read_workbook(path: &Path, operations_sheet: &str, costs_sheet: &str) -> Result<SourceExport> {
    if !path.exists() {
        bail!("Workbook not found at: {}", path.display());
    }

    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read workbook {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let content_hash = format!("sha256:{:x}", hasher.finalize());

    // calamine auto-detects the format: xls, xlsx, xlsb, ods
    let mut workbook = open_workbook_auto(path).context("Failed to open workbook")?;
    let sheet_names = workbook.sheet_names().to_vec();

    let mut range_of = |name: &str| -> Result<Range<Data>> {
        if !sheet_names.iter().any(|s| s == name) {
            bail!("Sheet '{}' not found. Available sheets: {:?}", name, sheet_names);
        }
        workbook
            .worksheet_range(name)
            .with_context(|| format!("Failed to read sheet '{}'", name))
    };

    let operations = parse_operations(operations_sheet, &range_of(operations_sheet)?)?;
    let costs = parse_costs(costs_sheet, &range_of(costs_sheet)?)?;

    info!(
        operations = operations.len(),
        costs = costs.len(),
        hash = %content_hash,
        "read workbook {}",
        path.display()
    );

    Ok(SourceExport {
        operations,
        costs,
        content_hash: Some(content_hash),
    })
}

pub fn parse_operations(sheet: &str, range: &Range<Data>) -> Result<Vec<RawOperationRow>> {
    let layout = SheetLayout::locate(sheet, range, OPERATION_COLUMNS)?;
    layout
        .rows(range)
        .map(|row| {
            Ok(RawOperationRow {
                datetime: row.timestamp("datetime")?,
                zone: row.text("zone"),
                rack_id: row.text("rack_id"),
                power_kw: row.number("power_kw"),
                temperature_c: row.number("temperature_c"),
                utilization_pct: row.number("utilization_pct"),
                incidents: row.number("incidents"),
            })
        })
        .collect()
}

pub fn parse_costs(sheet: &str, range: &Range<Data>) -> Result<Vec<RawCostRow>> {
    let layout = SheetLayout::locate(sheet, range, COST_COLUMNS)?;
    layout
        .rows(range)
        .map(|row| {
            Ok(RawCostRow {
                datetime: row.timestamp("datetime")?,
                zone: row.text("zone"),
                total_power_kw: row.number("total_power_kw"),
                cost_per_kw_usd: row.number("cost_per_kw_usd"),
            })
        })
        .collect()
}

/// Header positions of the required columns in one sheet.
struct SheetLayout<'a> {
    sheet: &'a str,
    columns: HashMap<&'static str, usize>,
    first_row: usize,
}

impl<'a> SheetLayout<'a> {
    fn locate(sheet: &'a str, range: &Range<Data>, required: &[&'static str]) -> Result<Self> {
        let headers: Vec<String> = range
            .rows()
            .next()
            .with_context(|| format!("Sheet '{}' is empty (no header row)", sheet))?
            .iter()
            .map(|cell| match cell {
                Data::String(s) => s.trim().to_lowercase(),
                Data::Empty => String::new(),
                other => other.to_string().trim().to_lowercase(),
            })
            .collect();

        let mut columns = HashMap::new();
        for name in required {
            let idx = headers.iter().position(|h| h == name).with_context(|| {
                format!(
                    "Sheet '{}' has no '{}' column. Found: {:?}",
                    sheet, name, headers
                )
            })?;
            columns.insert(*name, idx);
        }

        Ok(Self {
            sheet,
            columns,
            first_row: range.start().map_or(0, |(row, _)| row as usize),
        })
    }

    /// Data rows after the header, skipping rows with no content at all.
    fn rows<'r>(&'r self, range: &'r Range<Data>) -> impl Iterator<Item = SheetRow<'r>> + 'r {
        let layout: &'r SheetLayout<'r> = self;
        range
            .rows()
            .enumerate()
            .skip(1)
            .filter(|(_, cells)| cells.iter().any(|c| !matches!(c, Data::Empty)))
            .map(move |(idx, cells)| SheetRow {
                layout,
                line: layout.first_row + idx + 1,
                cells,
            })
    }
}

struct SheetRow<'r> {
    layout: &'r SheetLayout<'r>,
    /// 1-based row number as shown in the spreadsheet.
    line: usize,
    cells: &'r [Data],
}

impl SheetRow<'_> {
    fn cell(&self, column: &str) -> &Data {
        self.layout
            .columns
            .get(column)
            .and_then(|&idx| self.cells.get(idx))
            .unwrap_or(&Data::Empty)
    }

    fn text(&self, column: &str) -> Option<String> {
        cell_text(self.cell(column))
    }

    fn number(&self, column: &str) -> Option<f64> {
        cell_number(self.cell(column))
    }

    fn timestamp(&self, column: &str) -> Result<Option<NaiveDateTime>> {
        cell_timestamp(self.cell(column)).map_err(|e| {
            anyhow::anyhow!(
                "Sheet '{}' row {} column '{}': {}",
                self.layout.sheet,
                self.line,
                column,
                e
            )
        })
    }
}

pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => dt.as_datetime().map(|ts| ts.to_string()),
    }
}

pub fn cell_number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn cell_timestamp(cell: &Data) -> std::result::Result<Option<NaiveDateTime>, String> {
    match cell {
        Data::Empty | Data::Error(_) => Ok(None),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Some)
            .ok_or_else(|| format!("invalid spreadsheet date {:?}", dt)),
        Data::DateTimeIso(s) | Data::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| format!("unrecognized timestamp '{}'", s))
        }
        Data::Float(f) => from_serial(*f)
            .map(Some)
            .ok_or_else(|| format!("serial date {} out of range", f)),
        Data::Int(i) => from_serial(*i as f64)
            .map(Some)
            .ok_or_else(|| format!("serial date {} out of range", i)),
        other => Err(format!("expected a timestamp, found {:?}", other)),
    }
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Some(ts) = TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Spreadsheet serial day number (1900 date system) to a timestamp.
fn from_serial(serial: f64) -> Option<NaiveDateTime> {
    // 2958465 is 9999-12-31
    if !serial.is_finite() || !(0.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}
