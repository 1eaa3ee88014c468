use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::AnalysisError;
use super::types::{CellValue, Row, Sheet, UNKNOWN_CATEGORY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    #[default]
    Bar,
    Line,
    Pie,
}

/// Per-category sums in first-seen category order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GroupedSeries {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl GroupedSeries {
    /// Number of distinct categories.
    pub fn category_count(&self) -> usize {
        self.labels.len()
    }
}

/// Sums `value_column` grouped by `category_column`.
///
/// Both columns must be sheet headers. Empty categories are grouped under
/// `"Unknown"`; values that are not numeric count as 0.
pub fn group_sum(
    sheet: &Sheet,
    category_column: &str,
    value_column: &str,
) -> Result<GroupedSeries, AnalysisError> {
    sheet.require_column(category_column)?;
    sheet.require_column(value_column)?;

    let series = sum_rows(&sheet.data, category_column, value_column);
    tracing::debug!(
        "Grouped {} rows of {} into {} categories",
        sheet.row_count,
        sheet.name,
        series.category_count()
    );
    Ok(series)
}

fn sum_rows(rows: &[Row], category_column: &str, value_column: &str) -> GroupedSeries {
    let mut groups: IndexMap<String, f64> = IndexMap::new();

    for row in rows {
        let label = match row.get(category_column) {
            None | Some(CellValue::Empty) => UNKNOWN_CATEGORY.to_string(),
            Some(cell) => cell.label(),
        };
        let value = row
            .get(value_column)
            .and_then(CellValue::as_number)
            .unwrap_or(0.0);

        *groups.entry(label).or_insert(0.0) += value;
    }

    let (labels, values) = groups.into_iter().unzip();
    GroupedSeries { labels, values }
}
