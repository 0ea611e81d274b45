// projeto: lstmhealthforecast
// file: src/neural/data.rs
// Sheet loading, composite-key merging, barangay filtering and sequence building

use chrono::{Datelike, NaiveDate};
use csv::ReaderBuilder;
use log::{info, warn};
use ndarray::{Array1, Array2, s};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use crate::neural::utils::{ForecastError, Result};

/// Composite join key, in priority order. Merges use whichever of these
/// exist in both sheets.
pub const MERGE_KEYS: [&str; 4] = ["city", "barangay", "year", "month"];

/// Disease count columns follow this suffix convention.
pub const CASE_SUFFIX: &str = "_cases";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    pub fn parse(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Number(v),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical string form used for join keys and barangay matching, so
    /// "176" matches whether the sheet stored it as text or as a number.
    fn key_string(&self) -> String {
        match self {
            Cell::Number(v) if v.fract() == 0.0 => format!("{}", *v as i64),
            Cell::Number(v) => format!("{}", v),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }
}

fn cell_int(cell: &Cell) -> Option<i64> {
    match cell {
        Cell::Number(v) if v.fract() == 0.0 => Some(*v as i64),
        Cell::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// One named sheet of tabular data.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub frame: Frame,
}

/// Column-named table of cells. Rows all have `columns.len()` cells.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Adds a column, or replaces its values if the name already exists.
    pub fn add_column(&mut self, name: String, values: Vec<Cell>) {
        if let Some(idx) = self.column_index(&name) {
            for (row, value) in self.rows.iter_mut().zip(values) {
                row[idx] = value;
            }
        } else {
            self.columns.push(name);
            for (row, value) in self.rows.iter_mut().zip(values) {
                row.push(value);
            }
        }
    }
}

fn read_csv_sheet(path: &Path) -> Result<Frame> {
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    let mut error_count = 0;
    for (line_num, result) in rdr.records().enumerate() {
        match result {
            Ok(record) => {
                let row: Vec<Cell> = (0..columns.len())
                    .map(|i| Cell::parse(record.get(i).unwrap_or("")))
                    .collect();
                rows.push(row);
            }
            Err(e) => {
                warn!("Skipping unreadable record at line {}: {}", line_num + 2, e);
                error_count += 1;
            }
        }
    }
    if error_count > 0 {
        warn!("⚠️ {} unreadable records skipped in {}", error_count, path.display());
    }

    Ok(Frame { columns, rows })
}

/// Loads a data source as a list of named sheets. A directory is read as a
/// workbook of `<Sheet_Name>.csv` files; a single file is one sheet.
pub fn load_workbook(path: &str) -> Result<Vec<Sheet>> {
    let path_ref = Path::new(path);
    if !path_ref.exists() {
        return Err(ForecastError::FileNotFound {
            path: path.to_string(),
        });
    }

    if path_ref.is_dir() {
        let mut csv_paths: Vec<_> = std::fs::read_dir(path_ref)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|ext| ext == "csv").unwrap_or(false))
            .collect();
        csv_paths.sort();

        let mut sheets = Vec::new();
        for sheet_path in csv_paths {
            let name = sheet_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            let frame = read_csv_sheet(&sheet_path)?;
            info!("📄 Sheet '{}': {} rows, {} columns", name, frame.rows.len(), frame.columns.len());
            sheets.push(Sheet { name, frame });
        }
        if sheets.is_empty() {
            return Err(ForecastError::DataProcessing(format!(
                "No CSV sheets found in directory: {}",
                path
            )));
        }
        Ok(sheets)
    } else {
        let name = path_ref
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let frame = read_csv_sheet(path_ref)?;
        info!("📄 Sheet '{}': {} rows, {} columns", name, frame.rows.len(), frame.columns.len());
        Ok(vec![Sheet { name, frame }])
    }
}

fn take_sheet(sheets: &mut Vec<Sheet>, name: &str) -> Option<Frame> {
    sheets
        .iter()
        .position(|s| s.name == name)
        .map(|i| sheets.remove(i).frame)
}

fn merge_key_columns(a: &Frame, b: &Frame) -> Vec<String> {
    MERGE_KEYS
        .iter()
        .filter(|k| a.has_column(k) && b.has_column(k))
        .map(|k| k.to_string())
        .collect()
}

/// Left-merges `columns` of `other` into `base`, joined on whichever of the
/// composite key columns both frames share. Base rows keep their order;
/// unmatched rows get empty cells. First match wins on duplicate keys.
fn left_merge(base: &mut Frame, other: &Frame, columns: &[String]) {
    let keys = merge_key_columns(base, other);
    if keys.is_empty() {
        warn!("⚠️ No shared key columns with merge candidate, skipping merge");
        return;
    }
    if keys.len() < MERGE_KEYS.len() {
        warn!("⚠️ Merging on partial key set [{}]", keys.join(", "));
    }

    let base_key_idx: Vec<usize> = keys.iter().filter_map(|k| base.column_index(k)).collect();
    let other_key_idx: Vec<usize> = keys.iter().filter_map(|k| other.column_index(k)).collect();
    let resolved: Vec<(String, usize)> = columns
        .iter()
        .filter_map(|c| other.column_index(c).map(|i| (c.clone(), i)))
        .collect();

    let mut lookup: HashMap<Vec<String>, usize> = HashMap::new();
    for (i, row) in other.rows.iter().enumerate() {
        let key: Vec<String> = other_key_idx.iter().map(|&k| row[k].key_string()).collect();
        lookup.entry(key).or_insert(i);
    }

    for row in &mut base.rows {
        let key: Vec<String> = base_key_idx.iter().map(|&k| row[k].key_string()).collect();
        match lookup.get(&key) {
            Some(&i) => {
                for (_, c) in &resolved {
                    row.push(other.rows[i][*c].clone());
                }
            }
            None => {
                for _ in &resolved {
                    row.push(Cell::Empty);
                }
            }
        }
    }
    for (column, _) in resolved {
        base.columns.push(column);
    }
}

/// Resolves a workbook into one table.
///
/// Unified_Data is the preferred base; Health_Data then contributes any
/// `_cases` columns the base lacks. Without Unified_Data, Health_Data is the
/// base and Climate_Data/Environmental_Data are merged in. Otherwise the
/// first sheet is used as-is.
pub fn resolve_sheets(mut sheets: Vec<Sheet>) -> Frame {
    if let Some(mut base) = take_sheet(&mut sheets, "Unified_Data") {
        if let Some(health) = take_sheet(&mut sheets, "Health_Data") {
            let new_cols: Vec<String> = health
                .columns
                .iter()
                .filter(|c| c.ends_with(CASE_SUFFIX) && !base.has_column(c))
                .cloned()
                .collect();
            if !new_cols.is_empty() {
                info!("🔗 Merging {} disease columns from Health_Data", new_cols.len());
                left_merge(&mut base, &health, &new_cols);
            }
        }
        base
    } else if let Some(mut base) = take_sheet(&mut sheets, "Health_Data") {
        for name in ["Climate_Data", "Environmental_Data"] {
            if let Some(other) = take_sheet(&mut sheets, name) {
                let extra: Vec<String> = other
                    .columns
                    .iter()
                    .filter(|c| !MERGE_KEYS.contains(&c.as_str()) && !base.has_column(c))
                    .cloned()
                    .collect();
                if !extra.is_empty() {
                    info!("🔗 Merging {} columns from {}", extra.len(), name);
                    left_merge(&mut base, &other, &extra);
                }
            }
        }
        base
    } else {
        sheets.into_iter().next().map(|s| s.frame).unwrap_or_default()
    }
}

/// Keeps only rows of the requested barangay, preserving order.
pub fn filter_by_barangay(frame: &Frame, barangay: &str) -> Result<Frame> {
    let idx = frame.column_index("barangay").ok_or_else(|| {
        ForecastError::DataProcessing("Input data has no 'barangay' column".to_string())
    })?;

    let rows: Vec<Vec<Cell>> = frame
        .rows
        .iter()
        .filter(|row| row[idx].key_string() == barangay)
        .cloned()
        .collect();

    if rows.is_empty() {
        return Err(ForecastError::BarangayNotFound {
            barangay: barangay.to_string(),
        });
    }

    Ok(Frame {
        columns: frame.columns.clone(),
        rows,
    })
}

/// Sorts rows ascending by (year, month) and derives the `date` column as
/// the zero-padded first day of each month. Returns the parsed dates in row
/// order.
pub fn sort_and_date(frame: &mut Frame) -> Result<Vec<NaiveDate>> {
    let year_idx = frame
        .column_index("year")
        .ok_or_else(|| ForecastError::DataProcessing("Input data has no 'year' column".to_string()))?;
    let month_idx = frame
        .column_index("month")
        .ok_or_else(|| ForecastError::DataProcessing("Input data has no 'month' column".to_string()))?;

    frame.rows.sort_by(|a, b| {
        let ka = (cell_int(&a[year_idx]), cell_int(&a[month_idx]));
        let kb = (cell_int(&b[year_idx]), cell_int(&b[month_idx]));
        ka.cmp(&kb)
    });

    let mut dates = Vec::with_capacity(frame.rows.len());
    for row in &frame.rows {
        let year = cell_int(&row[year_idx]).ok_or_else(|| {
            ForecastError::DataProcessing("Non-numeric 'year' value in row".to_string())
        })?;
        let month = cell_int(&row[month_idx]).ok_or_else(|| {
            ForecastError::DataProcessing("Non-numeric 'month' value in row".to_string())
        })?;
        let date = NaiveDate::from_ymd_opt(year as i32, month as u32, 1).ok_or_else(|| {
            ForecastError::DataProcessing(format!("Invalid (year, month): ({}, {})", year, month))
        })?;
        dates.push(date);
    }

    let date_cells: Vec<Cell> = dates
        .iter()
        .map(|d| Cell::Text(d.format("%Y-%m-%d").to_string()))
        .collect();
    frame.add_column("date".to_string(), date_cells);

    Ok(dates)
}

/// Full loading path: workbook → merged table → one barangay, dated and
/// sorted.
pub fn load_and_filter(path: &str, barangay: &str) -> Result<(Frame, Vec<NaiveDate>)> {
    let sheets = load_workbook(path)?;
    let merged = resolve_sheets(sheets);
    let mut filtered = filter_by_barangay(&merged, barangay)?;
    let dates = sort_and_date(&mut filtered)?;
    info!("✅ Loaded {} rows for barangay '{}'", filtered.rows.len(), barangay);
    Ok((filtered, dates))
}

/// Slides a window of `sequence_length` rows over the normalized matrix.
/// Each window pairs with the trailing `n_outputs` values of the following
/// row. The target columns sit last in every row, so the slice below is the
/// target vector.
pub fn create_sequences(
    data: &Array2<f64>,
    sequence_length: usize,
    n_outputs: usize,
    barangay: &str,
) -> Result<(Vec<Array2<f64>>, Vec<Array1<f64>>)> {
    let n_rows = data.nrows();
    let n_features = data.ncols();

    if n_rows <= sequence_length {
        return Err(ForecastError::InsufficientData {
            barangay: barangay.to_string(),
            required: sequence_length + 1,
            actual: n_rows,
        });
    }

    let count = n_rows - sequence_length;
    let mut windows = Vec::with_capacity(count);
    let mut targets = Vec::with_capacity(count);
    for i in 0..count {
        let window = data.slice(s![i..i + sequence_length, ..]).to_owned();
        let target = data
            .slice(s![i + sequence_length, n_features - n_outputs..])
            .to_owned();
        windows.push(window);
        targets.push(target);
    }

    Ok((windows, targets))
}

/// Chunks training pairs into sequential batches, order preserved.
pub fn create_batches(
    sequences: &[Array2<f64>],
    targets: &[Array1<f64>],
    batch_size: usize,
) -> Vec<(Vec<Array2<f64>>, Vec<Array1<f64>>)> {
    let size = batch_size.max(1);
    sequences
        .chunks(size)
        .zip(targets.chunks(size))
        .map(|(s, t)| (s.to_vec(), t.to_vec()))
        .collect()
}

/// Calendar months following the last observed one, day 01 each.
pub fn forecast_months(last: NaiveDate, horizon: usize) -> Result<Vec<NaiveDate>> {
    let mut months = Vec::with_capacity(horizon);
    let mut year = last.year();
    let mut month = last.month();
    for _ in 0..horizon {
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
        let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            ForecastError::DataProcessing(format!("Invalid forecast month {}-{}", year, month))
        })?;
        months.push(date);
    }
    Ok(months)
}
