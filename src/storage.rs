//! Spreadsheet persistence for datasets.
//!
//! The same file is both input and resumable checkpoint state, so every
//! save rewrites the whole table through a temporary file and a rename.

use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{DocProperties, ExcelDateTime, Format, Workbook};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::dataset::{CellValue, Dataset};
use crate::error::StorageError;

/// Excel's per-cell text limit
const XLSX_MAX_STRING_CHARS: usize = 32_767;

/// Creation date stamped into every saved workbook so saves are reproducible
const XLSX_CREATED: (u16, u8, u8) = (2024, 1, 1);

/// Durable table storage used by the batch processor
pub trait TabularStore: Send + Sync {
    /// Whether a previously saved table is present
    fn exists(&self) -> bool;
    /// Read the first sheet, header row first
    fn load(&self) -> Result<Dataset, StorageError>;
    /// Replace the stored table with `dataset`
    fn save(&self, dataset: &Dataset) -> Result<(), StorageError>;
    /// Human-readable location for logs
    fn location(&self) -> String;
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Pick a store implementation from the file extension.
///
/// Only formats that reload what they save are accepted, since the output
/// file doubles as checkpoint state.
pub fn open_store(path: &Path) -> Result<Box<dyn TabularStore>, StorageError> {
    match extension(path).as_str() {
        "csv" => Ok(Box::new(CsvStore::new(path))),
        "xlsx" | "xlsm" => Ok(Box::new(XlsxStore::new(path))),
        _ => Err(StorageError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Like [`open_store`], but also accepts the legacy and OpenDocument
/// spreadsheets calamine can read. Use for input files only.
pub fn open_input_store(path: &Path) -> Result<Box<dyn TabularStore>, StorageError> {
    match extension(path).as_str() {
        "xls" | "xlsb" | "ods" => Ok(Box::new(XlsxStore::new(path))),
        _ => open_store(path),
    }
}

/// Write `bytes` to `path` via a sibling temporary file, creating parents
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

fn header_name(cell: &CellValue, index: usize) -> String {
    match cell.as_text() {
        Some(name) if !name.trim().is_empty() => name,
        _ => format!("Unnamed: {}", index),
    }
}

/// Excel workbook store: calamine for reading, rust_xlsxwriter for writing
pub struct XlsxStore {
    path: PathBuf,
}

impl XlsxStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_error(&self, e: impl std::fmt::Display) -> StorageError {
        StorageError::Read {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }

    fn write_error(&self, e: impl std::fmt::Display) -> StorageError {
        StorageError::Write {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }

    fn convert(cell: &Data) -> CellValue {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) if s.is_empty() => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) if dt.is_datetime() => CellValue::DateTime(dt.as_f64()),
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl TabularStore for XlsxStore {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self) -> Result<Dataset, StorageError> {
        let mut workbook = open_workbook_auto(&self.path).map_err(|e| self.read_error(e))?;
        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| StorageError::NoSheets(self.path.clone()))?;
        let range = workbook.worksheet_range(&sheet).map_err(|e| self.read_error(e))?;

        let mut rows = range.rows();
        let columns: Vec<String> = match rows.next() {
            Some(header) => header
                .iter()
                .enumerate()
                .map(|(i, cell)| header_name(&Self::convert(cell), i))
                .collect(),
            None => Vec::new(),
        };

        let mut cells: Vec<Vec<CellValue>> = rows.map(|row| row.iter().map(Self::convert).collect()).collect();
        // Trailing fully-empty rows are formatting leftovers.
        while cells.last().is_some_and(|r| r.iter().all(|c| *c == CellValue::Empty)) {
            cells.pop();
        }

        let mut dataset = Dataset::new(columns);
        for row in cells {
            dataset.push_row(row);
        }

        debug!("📄 Loaded {} rows from sheet '{}' of {}", dataset.len(), sheet, self.path.display());
        Ok(dataset)
    }

    fn save(&self, dataset: &Dataset) -> Result<(), StorageError> {
        let (year, month, day) = XLSX_CREATED;
        let created = ExcelDateTime::from_ymd(year, month, day).map_err(|e| self.write_error(e))?;
        let mut workbook = Workbook::new();
        workbook.set_properties(&DocProperties::new().set_creation_datetime(&created));
        let worksheet = workbook.add_worksheet();

        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

        for (c, name) in dataset.columns().iter().enumerate() {
            let col = u16::try_from(c).map_err(|e| self.write_error(e))?;
            worksheet.write_string(0, col, name).map_err(|e| self.write_error(e))?;
        }

        for (r, row) in dataset.rows().iter().enumerate() {
            let row_num = u32::try_from(r + 1).map_err(|e| self.write_error(e))?;
            for (c, cell) in row.iter().enumerate() {
                let col = u16::try_from(c).map_err(|e| self.write_error(e))?;
                match cell {
                    CellValue::Empty => {}
                    CellValue::Text(s) if s.chars().count() > XLSX_MAX_STRING_CHARS => {
                        warn!("Truncating cell ({}, {}) to the {} character Excel limit", r + 1, c, XLSX_MAX_STRING_CHARS);
                        let truncated: String = s.chars().take(XLSX_MAX_STRING_CHARS).collect();
                        worksheet.write_string(row_num, col, &truncated).map_err(|e| self.write_error(e))?;
                    }
                    CellValue::Text(s) => {
                        worksheet.write_string(row_num, col, s).map_err(|e| self.write_error(e))?;
                    }
                    CellValue::Number(n) => {
                        worksheet.write_number(row_num, col, *n).map_err(|e| self.write_error(e))?;
                    }
                    CellValue::Bool(b) => {
                        worksheet.write_boolean(row_num, col, *b).map_err(|e| self.write_error(e))?;
                    }
                    CellValue::DateTime(serial) => {
                        let format = if serial.fract() == 0.0 { &date_format } else { &datetime_format };
                        worksheet
                            .write_number_with_format(row_num, col, *serial, format)
                            .map_err(|e| self.write_error(e))?;
                    }
                }
            }
        }

        let buffer = workbook.save_to_buffer().map_err(|e| self.write_error(e))?;
        write_atomically(&self.path, &buffer)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Comma-separated store; every non-empty field loads as text
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TabularStore for CsvStore {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn load(&self) -> Result<Dataset, StorageError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(&self.path)?;

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| header_name(&CellValue::from(h), i))
            .collect();

        let mut dataset = Dataset::new(columns);
        for record in reader.records() {
            let record = record?;
            let cells = record
                .iter()
                .map(|field| if field.is_empty() { CellValue::Empty } else { CellValue::from(field) })
                .collect();
            dataset.push_row(cells);
        }

        debug!("📄 Loaded {} rows from {}", dataset.len(), self.path.display());
        Ok(dataset)
    }

    fn save(&self, dataset: &Dataset) -> Result<(), StorageError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(dataset.columns())?;
        for row in dataset.rows() {
            writer.write_record(row.iter().map(|c| c.to_string()))?;
        }
        let buffer = writer.into_inner().map_err(|e| StorageError::Write {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_atomically(&self.path, &buffer)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
