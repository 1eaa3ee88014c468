use indexmap::IndexMap;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::error::AnalysisError;
use super::utils::{coerce_number, format_number};

/// Label used for rows whose category cell is empty.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// A single normalized cell. Missing cells are `Empty` and serialize as `""`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Numeric view of the cell, using the shared coercion rules for text.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Number(_) => None,
            CellValue::Text(s) => coerce_number(s),
        }
    }

    /// String form used for grouping, distinct counting and frequency tables.
    pub fn label(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Empty => serializer.serialize_str(""),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                serializer.serialize_i64(*n as i64)
            }
            CellValue::Number(n) => serializer.serialize_f64(*n),
            CellValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

struct CellValueVisitor;

impl<'de> Visitor<'de> for CellValueVisitor {
    type Value = CellValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, a number or null")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CellValue::from(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        if v.is_empty() {
            Ok(CellValue::Empty)
        } else {
            Ok(CellValue::Text(v))
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(CellValue::Number(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(CellValue::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(CellValue::Number(v as f64))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(CellValue::Text(if v { "TRUE" } else { "FALSE" }.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CellValue::Empty)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CellValue::Empty)
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CellValueVisitor)
    }
}

/// One data row, keyed by header label in header order.
pub type Row = IndexMap<String, CellValue>;

/// A normalized sheet: header labels plus one record per data row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub data: Vec<Row>,
    pub row_count: usize,
    pub column_count: usize,
}

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>, data: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            row_count: data.len(),
            column_count: headers.len(),
            headers,
            data,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    pub fn require_column(&self, column: &str) -> Result<(), AnalysisError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(AnalysisError::InvalidColumn(column.to_string()))
        }
    }

    /// Distinct header labels, first occurrence order.
    pub fn columns(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.headers
            .iter()
            .filter(|h| seen.insert(h.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Every row's value for `column`; rows without the key yield `Empty`.
    pub fn values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a CellValue> + 'a {
        static EMPTY: CellValue = CellValue::Empty;
        self.data.iter().map(move |row| row.get(column).unwrap_or(&EMPTY))
    }
}

/// How repeated header labels are turned into row keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateHeaders {
    /// Keep labels as-is; the rightmost duplicate column wins in each row.
    #[default]
    LastWriteWins,
    /// Rename later duplicates `label_1`, `label_2`, ...
    Suffix,
}

impl FromStr for DuplicateHeaders {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-write-wins" | "last_write_wins" | "lww" => Ok(DuplicateHeaders::LastWriteWins),
            "suffix" => Ok(DuplicateHeaders::Suffix),
            other => Err(format!(
                "unknown duplicate header policy '{}' (expected 'last-write-wins' or 'suffix')",
                other
            )),
        }
    }
}

/// Container format of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookFormat {
    /// xlsx / xls / xlsb / ods, sniffed by calamine.
    Spreadsheet,
    Csv,
}
