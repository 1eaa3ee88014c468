use super::error::ExtractError;
use super::types::*;
use super::utils::*;
use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;

/// Sheet name given to the single table read from a CSV file.
pub const CSV_SHEET_NAME: &str = "Sheet1";

type Grid = Vec<Vec<CellValue>>;

/// Turns uploaded workbooks into normalized sheets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabularExtractor {
    duplicate_headers: DuplicateHeaders,
}

impl TabularExtractor {
    pub fn new(duplicate_headers: DuplicateHeaders) -> Self {
        Self { duplicate_headers }
    }

    /// Extracts every sheet that has a usable header row.
    ///
    /// Fails with `Unreadable` when the bytes are not a workbook and with
    /// `NoValidData` when every sheet was dropped.
    pub fn extract(&self, file_data: Bytes, format: WorkbookFormat) -> Result<Vec<Sheet>, ExtractError> {
        let start = std::time::Instant::now();
        tracing::info!("Extracting {:?} workbook ({} bytes)", format, file_data.len());

        let grids = match format {
            WorkbookFormat::Spreadsheet => read_workbook_grids(file_data)?,
            WorkbookFormat::Csv => vec![(CSV_SHEET_NAME.to_string(), read_csv_grid(&file_data)?)],
        };

        let sheets: Vec<Sheet> = grids
            .iter()
            .filter_map(|(name, grid)| {
                let sheet = self.build_sheet(name, grid);
                if sheet.is_none() {
                    tracing::warn!("Sheet {} has no header row, dropping it", name);
                }
                sheet
            })
            .collect();

        if sheets.is_empty() {
            tracing::warn!("No sheet with a usable header row after {:?}", start.elapsed());
            return Err(ExtractError::NoValidData);
        }

        tracing::info!("Extracted {} of {} sheets in {:?}", sheets.len(), grids.len(), start.elapsed());
        Ok(sheets)
    }

    /// Normalizes one grid, or `None` when it has no header row.
    pub fn build_sheet(&self, name: &str, grid: &[Vec<CellValue>]) -> Option<Sheet> {
        let header_idx = detect_header_row(grid)?;

        // Columns with a blank header cell carry no key.
        let columns: Vec<(usize, String)> = grid[header_idx]
            .iter()
            .enumerate()
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(idx, cell)| (idx, cell.label()))
            .collect();

        let labels: Vec<String> = columns.iter().map(|(_, label)| label.clone()).collect();
        let headers = match self.duplicate_headers {
            DuplicateHeaders::LastWriteWins => labels,
            DuplicateHeaders::Suffix => disambiguate_headers(&labels),
        };

        let data: Vec<Row> = grid[header_idx + 1..]
            .iter()
            .map(|cells| {
                let mut row = Row::with_capacity(headers.len());
                for ((idx, _), header) in columns.iter().zip(&headers) {
                    let value = cells.get(*idx).cloned().unwrap_or(CellValue::Empty);
                    row.insert(header.clone(), value);
                }
                row
            })
            .collect();

        tracing::debug!(
            "Sheet {}: header row {}, {} columns, {} rows",
            name,
            header_idx,
            headers.len(),
            data.len()
        );
        Some(Sheet::new(name, headers, data))
    }
}

/// Index of the first row holding a cell that is neither blank nor numeric.
pub fn detect_header_row(grid: &[Vec<CellValue>]) -> Option<usize> {
    grid.iter().position(|row| row.iter().any(is_text_cell))
}

fn is_text_cell(cell: &CellValue) -> bool {
    match cell {
        CellValue::Text(s) => !s.trim().is_empty() && coerce_number(s).is_none(),
        CellValue::Empty | CellValue::Number(_) => false,
    }
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::DateTime(d) => CellValue::Number(d.as_f64()),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::String(s) => CellValue::from(s.as_str()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from(s.as_str()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

fn read_workbook_grids(file_data: Bytes) -> Result<Vec<(String, Grid)>, ExtractError> {
    let cursor = Cursor::new(file_data);
    let mut workbook = open_workbook_auto_from_rs(cursor).map_err(|e| {
        tracing::error!("Failed to open workbook: {}", e);
        ExtractError::from(e)
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    tracing::info!("Processing {} sheets", sheet_names.len());

    let mut grids = Vec::with_capacity(sheet_names.len());
    for sheet_name in &sheet_names {
        match workbook.worksheet_range(sheet_name) {
            Ok(range) => {
                let grid: Grid = range
                    .rows()
                    .map(|row| row.iter().map(cell_from_data).collect())
                    .collect();
                grids.push((sheet_name.clone(), grid));
            }
            Err(e) => {
                tracing::warn!("Failed to read worksheet {}: {}", sheet_name, e);
                continue;
            }
        }
    }
    Ok(grids)
}

fn read_csv_grid(file_data: &[u8]) -> Result<Grid, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file_data);

    let mut grid = Grid::new();
    for record in reader.records() {
        let record = record?;
        grid.push(
            record
                .iter()
                .map(|field| match coerce_number(field) {
                    Some(n) => CellValue::Number(n),
                    None => CellValue::from(field),
                })
                .collect(),
        );
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn num(n: f64) -> CellValue {
        CellValue::Number(n)
    }

    #[test]
    fn test_header_row_zero_when_first_row_has_text() {
        let grid = vec![vec![num(1.0), text("Region")], vec![num(2.0), num(3.0)]];
        assert_eq!(detect_header_row(&grid), Some(0));
    }

    #[test]
    fn test_header_row_skips_numeric_rows() {
        let grid = vec![
            vec![num(1.0), num(2.0)],
            vec![text("3"), text(" 4.5 ")],
            vec![text("Region"), num(9.0)],
            vec![text("North"), num(10.0)],
        ];
        assert_eq!(detect_header_row(&grid), Some(2));

        let sheet = TabularExtractor::default().build_sheet("S", &grid).unwrap();
        assert_eq!(sheet.headers, vec!["Region", "9"]);
        assert_eq!(sheet.row_count, 1);
        assert_eq!(sheet.data[0]["Region"], text("North"));
        assert_eq!(sheet.data[0]["9"], num(10.0));
    }

    #[test]
    fn test_all_numeric_grid_is_dropped() {
        let grid = vec![vec![num(1.0), text("2")], vec![CellValue::Empty, num(3.0)], vec![]];
        assert_eq!(detect_header_row(&grid), None);
        assert!(TabularExtractor::default().build_sheet("S", &grid).is_none());
    }

    #[test]
    fn test_blank_cells_do_not_make_a_header() {
        let grid = vec![vec![CellValue::Empty, text("  ")], vec![text("Name")]];
        assert_eq!(detect_header_row(&grid), Some(1));
    }

    #[test]
    fn test_short_and_long_rows() {
        let grid = vec![
            vec![text("a"), text("b"), text("c")],
            vec![num(1.0)],
            vec![num(1.0), num(2.0), num(3.0), num(4.0)],
        ];
        let sheet = TabularExtractor::default().build_sheet("S", &grid).unwrap();

        assert_eq!(sheet.row_count, 2);
        assert_eq!(sheet.column_count, 3);
        for row in &sheet.data {
            assert_eq!(row.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        }
        assert_eq!(sheet.data[0]["b"], CellValue::Empty);
        assert_eq!(sheet.data[0]["c"], CellValue::Empty);
        assert_eq!(sheet.data[1]["c"], num(3.0));
    }

    #[test]
    fn test_blank_header_cell_drops_column() {
        let grid = vec![
            vec![text("a"), CellValue::Empty, text("c")],
            vec![num(1.0), num(2.0), num(3.0)],
        ];
        let sheet = TabularExtractor::default().build_sheet("S", &grid).unwrap();
        assert_eq!(sheet.headers, vec!["a", "c"]);
        assert_eq!(sheet.data[0].len(), 2);
        assert_eq!(sheet.data[0]["c"], num(3.0));
    }

    #[test]
    fn test_duplicate_headers_last_write_wins() {
        let grid = vec![
            vec![text("x"), text("y"), text("x")],
            vec![num(1.0), num(2.0), num(3.0)],
        ];
        let sheet = TabularExtractor::new(DuplicateHeaders::LastWriteWins)
            .build_sheet("S", &grid)
            .unwrap();

        assert_eq!(sheet.headers, vec!["x", "y", "x"]);
        assert_eq!(sheet.data[0].len(), 2);
        assert_eq!(sheet.data[0]["x"], num(3.0));
        assert_eq!(sheet.data[0].keys().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[test]
    fn test_duplicate_headers_suffix() {
        let grid = vec![
            vec![text("x"), text("y"), text("x")],
            vec![num(1.0), num(2.0), num(3.0)],
        ];
        let sheet = TabularExtractor::new(DuplicateHeaders::Suffix)
            .build_sheet("S", &grid)
            .unwrap();

        assert_eq!(sheet.headers, vec!["x", "y", "x_1"]);
        assert_eq!(sheet.data[0]["x"], num(1.0));
        assert_eq!(sheet.data[0]["x_1"], num(3.0));
    }

    #[test]
    fn test_extract_xlsx_drops_numeric_sheet() {
        let mut workbook = Workbook::new();
        {
            let sales = workbook.add_worksheet();
            sales.set_name("Sales").unwrap();
            sales.write_string(0, 0, "Region").unwrap();
            sales.write_string(0, 1, "Amount").unwrap();
            sales.write_string(1, 0, "North").unwrap();
            sales.write_number(1, 1, 3.0).unwrap();
            sales.write_string(2, 0, "South").unwrap();
        }
        {
            let numbers = workbook.add_worksheet();
            numbers.set_name("Numbers").unwrap();
            numbers.write_number(0, 0, 1.0).unwrap();
            numbers.write_number(1, 0, 2.0).unwrap();
        }
        let bytes = workbook.save_to_buffer().unwrap();

        let sheets = TabularExtractor::default()
            .extract(Bytes::from(bytes), WorkbookFormat::Spreadsheet)
            .unwrap();

        assert_eq!(sheets.len(), 1);
        let sheet = &sheets[0];
        assert_eq!(sheet.name, "Sales");
        assert_eq!(sheet.headers, vec!["Region", "Amount"]);
        assert_eq!(sheet.row_count, 2);
        assert_eq!(sheet.data[0]["Amount"], num(3.0));
        assert_eq!(sheet.data[1]["Amount"], CellValue::Empty);
    }

    #[test]
    fn test_extract_csv() {
        let csv = "1,2\nName,Score\nann,10\nbob,\n";
        let sheets = TabularExtractor::default()
            .extract(Bytes::from(csv), WorkbookFormat::Csv)
            .unwrap();

        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].name, CSV_SHEET_NAME);
        assert_eq!(sheets[0].headers, vec!["Name", "Score"]);
        assert_eq!(sheets[0].data[0]["Score"], num(10.0));
        assert_eq!(sheets[0].data[1]["Score"], CellValue::Empty);
    }

    #[test]
    fn test_extract_numeric_only_csv_has_no_valid_data() {
        let result = TabularExtractor::default().extract(Bytes::from("1,2\n3,4\n"), WorkbookFormat::Csv);
        assert!(matches!(result, Err(ExtractError::NoValidData)));
    }

    #[test]
    fn test_extract_garbage_is_unreadable() {
        let result = TabularExtractor::default()
            .extract(Bytes::from_static(b"definitely not a workbook"), WorkbookFormat::Spreadsheet);
        assert!(matches!(result, Err(ExtractError::Unreadable(_))));
    }
}
