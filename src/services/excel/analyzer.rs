use super::error::AnalysisError;
use super::types::*;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

pub const TOP_VALUES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopValue {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStats {
    pub total_values: usize,
    pub unique_values: usize,
    pub null_values: usize,
    pub data_type: ColumnType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_values: Option<SmallVec<[TopValue; TOP_VALUES]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetAnalysis {
    pub sheet_name: String,
    pub total_rows: usize,
    pub total_columns: usize,
    pub headers: Vec<String>,
    pub column_analysis: IndexMap<String, ColumnStats>,
}

/// Descriptive statistics for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub stddev: f64,
    pub mode: f64,
}

pub struct SheetAnalyzer;

impl SheetAnalyzer {
    /// Statistics for every distinct header, in header order.
    pub fn analyze(&self, sheet: &Sheet) -> SheetAnalysis {
        let start = std::time::Instant::now();

        let column_analysis: IndexMap<String, ColumnStats> = sheet
            .columns()
            .par_iter()
            .map(|header| (header.to_string(), self.column_stats(sheet, header)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect();

        tracing::info!(
            "Analyzed {} columns of sheet {} in {:?}",
            column_analysis.len(),
            sheet.name,
            start.elapsed()
        );

        SheetAnalysis {
            sheet_name: sheet.name.clone(),
            total_rows: sheet.row_count,
            total_columns: sheet.column_count,
            headers: sheet.headers.clone(),
            column_analysis,
        }
    }

    pub fn column_stats(&self, sheet: &Sheet, header: &str) -> ColumnStats {
        let values: Vec<&CellValue> = sheet.values(header).filter(|v| !v.is_empty()).collect();
        let seen: HashSet<String> = values.iter().map(|v| v.label()).collect();
        let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_number()).collect();

        let data_type = if numbers.is_empty() {
            ColumnType::Text
        } else {
            ColumnType::Numeric
        };

        let mut stats = ColumnStats {
            total_values: values.len(),
            unique_values: seen.len(),
            null_values: sheet.data.len() - values.len(),
            data_type,
            min: None,
            max: None,
            average: None,
            sum: None,
            top_values: None,
        };

        match data_type {
            ColumnType::Numeric => {
                let sum: f64 = numbers.iter().sum();
                stats.min = numbers.iter().copied().reduce(f64::min);
                stats.max = numbers.iter().copied().reduce(f64::max);
                stats.sum = Some(sum);
                stats.average = Some(sum / numbers.len() as f64);
            }
            ColumnType::Text if !values.is_empty() => {
                stats.top_values = Some(top_values(&values));
            }
            ColumnType::Text => {}
        }

        stats
    }

    /// Summary of the numeric values in `column`.
    ///
    /// `Ok(None)` means no value in the column is numeric.
    pub fn describe(&self, sheet: &Sheet, column: &str) -> Result<Option<ColumnSummary>, AnalysisError> {
        sheet.require_column(column)?;

        let values: Vec<f64> = sheet.values(column).filter_map(CellValue::as_number).collect();
        if values.is_empty() {
            tracing::debug!("Column {} of {} has no numeric values", column, sheet.name);
            return Ok(None);
        }

        let count = values.len();
        let sum: f64 = values.iter().sum();
        let mean = sum / count as f64;

        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Ok(Some(ColumnSummary {
            mean,
            median,
            min: sorted[0],
            max: sorted[count - 1],
            count,
            stddev: variance.sqrt(),
            mode: mode(&values),
        }))
    }
}

fn top_values(values: &[&CellValue]) -> SmallVec<[TopValue; TOP_VALUES]> {
    let mut frequency: IndexMap<String, usize> = IndexMap::new();
    for value in values {
        *frequency.entry(value.label()).or_insert(0) += 1;
    }

    let mut entries: Vec<(String, usize)> = frequency.into_iter().collect();
    // Stable sort keeps first-seen order among equal counts.
    entries.sort_by(|a, b| b.1.cmp(&a.1));

    entries
        .into_iter()
        .take(TOP_VALUES)
        .map(|(value, count)| TopValue { value, count })
        .collect()
}

/// The value whose running count first exceeds every other count.
fn mode(values: &[f64]) -> f64 {
    let mut frequency: HashMap<u64, usize> = HashMap::new();
    let mut best = values[0];
    let mut best_count = 0;

    for &v in values {
        // -0.0 and 0.0 count as the same value
        let key = if v == 0.0 { 0 } else { v.to_bits() };
        let count = frequency.entry(key).or_insert(0);
        *count += 1;
        if *count > best_count {
            best = v;
            best_count = *count;
        }
    }
    best
}
