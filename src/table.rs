//! Raw tabular inputs and cell parsing.
//!
//! Tables arrive as a header row plus string cells, from CSV or built in
//! memory by the caller. Headers are normalised so that `Dray SCAC(FL)`,
//! `dray scac fl` and `DRAY_SCAC_FL` all resolve to the same column.

use crate::error::{EngineError, Result};
use crate::models::{Week, MAX_WEEK};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Shipment,
    Rate,
    Performance,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableKind::Shipment => "shipment",
            TableKind::Rate => "rate",
            TableKind::Performance => "performance",
        };
        f.write_str(name)
    }
}

/// A logical column and the header spellings that map onto it.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

impl Column {
    pub const fn new(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { name, aliases }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    kind: TableKind,
    headers: Vec<String>,
    rows: Vec<StringRecord>,
}

impl Table {
    /// Build a table from in-memory cells.
    pub fn new<H: AsRef<str>>(kind: TableKind, headers: &[H], rows: Vec<Vec<String>>) -> Self {
        Self {
            kind,
            headers: headers.iter().map(|h| normalize_header(h.as_ref())).collect(),
            rows: rows.into_iter().map(StringRecord::from).collect(),
        }
    }

    /// Read a headed CSV table.
    pub fn from_reader<R: io::Read>(kind: TableKind, reader: R) -> Result<Self> {
        let read_err = |source| EngineError::Read { table: kind, source };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(read_err)?
            .iter()
            .map(normalize_header)
            .collect();
        let rows = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(read_err)?;

        Ok(Self { kind, headers, rows })
    }

    pub fn from_path(kind: TableKind, path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref()).map_err(|e| EngineError::Read {
            table: kind,
            source: csv::Error::from(e),
        })?;
        Self::from_reader(kind, file)
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first header matching the column name or an alias.
    pub fn column(&self, column: &Column) -> Option<usize> {
        std::iter::once(column.name)
            .chain(column.aliases.iter().copied())
            .find_map(|name| self.headers.iter().position(|h| h == name))
    }
}

/// Lower-case a header and collapse every run of non-alphanumerics to `_`.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Trimmed cell content; short rows read as blank.
pub fn cell(row: &StringRecord, index: usize) -> &str {
    row.get(index).unwrap_or("").trim()
}

/// Coerce `5`, `5.0`, `05` or `WK05` to a week number.
pub fn parse_week(raw: &str) -> std::result::Result<Week, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("week is blank".to_string());
    }
    let upper = trimmed.to_uppercase();
    let digits = upper
        .strip_prefix("WK")
        .or_else(|| upper.strip_prefix('W'))
        .unwrap_or(&upper)
        .trim();

    let value: f64 = digits
        .parse()
        .map_err(|_| format!("week '{trimmed}' is not a number"))?;
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(format!("week '{trimmed}' is not an integer"));
    }
    if value < 1.0 || value > f64::from(MAX_WEEK) {
        return Err(format!("week '{trimmed}' is outside 1..={MAX_WEEK}"));
    }
    Ok(value as Week)
}

/// Parse a numeric cell, tolerating `$`, thousands separators and `%`.
/// Blank cells are `None`.
pub fn parse_number(raw: &str) -> std::result::Result<Option<f64>, String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(format!("'{}' is not a number", raw.trim())),
    }
}

pub fn parse_count(raw: &str) -> std::result::Result<u32, String> {
    match parse_number(raw)? {
        Some(v) if v >= 0.0 && v.fract() == 0.0 && v <= f64::from(u32::MAX) => Ok(v as u32),
        Some(_) => Err(format!("container count '{}' is not a non-negative integer", raw.trim())),
        None => Err("container count is blank".to_string()),
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d-%b-%Y"];

/// ISO week of an arrival date cell.
pub fn parse_date_week(raw: &str) -> std::result::Result<Week, String> {
    let trimmed = raw.trim();
    let date = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        })
        .ok_or_else(|| format!("'{trimmed}' is not a recognised date"))?;
    Ok(date.iso_week().week())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_normalise_spreadsheet_spellings() {
        assert_eq!(normalize_header("Dray SCAC(FL)"), "dray_scac_fl");
        assert_eq!(normalize_header(" Week Number "), "week_number");
        assert_eq!(normalize_header("Total Score %"), "total_score");
        assert_eq!(normalize_header("WK27"), "wk27");
    }

    #[test]
    fn column_lookup_uses_aliases() {
        let table = Table::new(
            TableKind::Shipment,
            &["Discharged Port", "Facility"],
            vec![],
        );
        let port = Column::new("port", &["discharged_port"]);
        let carrier = Column::new("carrier", &["scac"]);
        assert_eq!(table.column(&port), Some(0));
        assert_eq!(table.column(&carrier), None);
    }

    #[test]
    fn week_coercion() {
        assert_eq!(parse_week("5"), Ok(5));
        assert_eq!(parse_week(" 05 "), Ok(5));
        assert_eq!(parse_week("5.0"), Ok(5));
        assert_eq!(parse_week("wk27"), Ok(27));
        assert!(parse_week("5.5").is_err());
        assert!(parse_week("-1").is_err());
        assert!(parse_week("0").is_err());
        assert_eq!(parse_week("53"), Ok(53));
        assert!(parse_week("54").is_err());
        assert!(parse_week("4294967295").is_err());
        assert!(parse_week("").is_err());
    }

    #[test]
    fn numbers_strip_currency_and_percent() {
        assert_eq!(parse_number("$1,250.50"), Ok(Some(1250.5)));
        assert_eq!(parse_number("95%"), Ok(Some(95.0)));
        assert_eq!(parse_number("  "), Ok(None));
        assert!(parse_number("abc").is_err());
        assert_eq!(parse_count("3"), Ok(3));
        assert!(parse_count("2.5").is_err());
    }

    #[test]
    fn arrival_dates_map_to_iso_weeks() {
        assert_eq!(parse_date_week("2024-01-31"), Ok(5));
        assert_eq!(parse_date_week("01/31/2024"), Ok(5));
        assert_eq!(parse_date_week("2024-01-31 08:15:00"), Ok(5));
        assert!(parse_date_week("yesterday").is_err());
    }

    #[test]
    fn csv_reader_normalises_headers() {
        let data = "Port,Facility,Carrier,Week\nusnyc,fac1,abcd,5\n";
        let table = Table::from_reader(TableKind::Shipment, data.as_bytes()).unwrap();
        assert_eq!(table.headers(), &["port", "facility", "carrier", "week"]);
        assert_eq!(table.len(), 1);
        assert_eq!(cell(&table.rows()[0], 2), "abcd");
        assert_eq!(cell(&table.rows()[0], 9), "");
    }
}
