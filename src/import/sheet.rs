//! Workbook ingest: turns uploaded bytes into named sheets of typed cells and
//! projects one sheet at a time into headers plus row objects.

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_PREVIEW_ROWS: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SheetError {
    #[error("file is not a recognizable spreadsheet or delimited text")]
    Unrecognized,
    #[error("sheet {0:?} contains no rows")]
    Empty(String),
    #[error("workbook contains no sheets")]
    NoSheets,
    #[error("no sheet named {0:?}")]
    UnknownSheet(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Stringified, trimmed cell value. Integral numbers drop the fraction so a
    /// numeric id column reads `2021001`, not `2021001.0`.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => format_number(*n),
            Cell::Bool(b) => b.to_string(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(d: &Data) -> Self {
        match d {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(_) | Data::DateTimeIso(_) => match d.as_datetime() {
                Some(dt) => Cell::Text(format_datetime(dt)),
                None => Cell::Text(d.to_string()),
            },
            other => Cell::Text(other.to_string()),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Empty => s.serialize_none(),
            Cell::Text(v) => s.serialize_str(v),
            Cell::Number(n) => s.serialize_f64(*n),
            Cell::Bool(b) => s.serialize_bool(*b),
        }
    }
}

/// Date cells read as the sheet shows them: the day alone at midnight.
fn format_datetime(dt: chrono::NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// One data row, keyed by header. Duplicate headers are kept in order and
/// lookups resolve to the first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: usize,
    cells: Vec<(String, Cell)>,
}

impl RawRow {
    pub fn new(line: usize, cells: Vec<(String, Cell)>) -> Self {
        Self { line, cells }
    }

    pub fn get(&self, header: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, c)| c)
    }

    pub fn text(&self, header: &str) -> String {
        self.get(header).map(Cell::to_text).unwrap_or_default()
    }
}

impl Serialize for RawRow {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut seen = std::collections::HashSet::new();
        let mut map = s.serialize_map(None)?;
        for (h, c) in &self.cells {
            if seen.insert(h.as_str()) {
                map.serialize_entry(h, c)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
struct SheetGrid {
    name: String,
    /// Zero-based sheet row of `rows[0]`; spreadsheet ranges skip leading blanks.
    first_row: usize,
    rows: Vec<Vec<Cell>>,
}

/// All sheets of an uploaded file, immutable once ingested.
#[derive(Debug, Clone)]
pub struct Workbook {
    sheets: Vec<SheetGrid>,
    fingerprint: String,
}

/// The projection of one sheet: what the mapper and reconciler consume.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetView {
    pub sheet_names: Vec<String>,
    pub active_sheet: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub preview: Vec<RawRow>,
}

impl Workbook {
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn first_sheet(&self) -> Option<&str> {
        self.sheets.first().map(|s| s.name.as_str())
    }

    pub fn project(&self, sheet: &str, preview_rows: usize) -> Result<SheetView, SheetError> {
        let grid = self
            .sheets
            .iter()
            .find(|s| s.name == sheet)
            .ok_or_else(|| SheetError::UnknownSheet(sheet.to_string()))?;

        let Some(header_row) = grid.rows.first() else {
            return Err(SheetError::Empty(grid.name.clone()));
        };
        let headers = header_row.iter().map(Cell::to_text).collect::<Vec<_>>();

        let mut rows = Vec::new();
        for (i, cells) in grid.rows.iter().enumerate().skip(1) {
            if cells.iter().all(Cell::is_blank) {
                continue;
            }
            let keyed = headers
                .iter()
                .enumerate()
                .map(|(col, h)| (h.clone(), cells.get(col).cloned().unwrap_or(Cell::Empty)))
                .collect();
            rows.push(RawRow::new(grid.first_row + i + 1, keyed));
        }
        let preview = rows.iter().take(preview_rows).cloned().collect();

        Ok(SheetView {
            sheet_names: self.sheet_names(),
            active_sheet: grid.name.clone(),
            headers,
            rows,
            preview,
        })
    }
}

/// Parses spreadsheet bytes and projects the first sheet.
pub fn ingest(bytes: &[u8], preview_rows: usize) -> Result<(Arc<Workbook>, SheetView), SheetError> {
    let workbook = Arc::new(read_workbook(bytes)?);
    let first = workbook.first_sheet().ok_or(SheetError::NoSheets)?.to_string();
    let view = workbook.project(&first, preview_rows)?;
    Ok((workbook, view))
}

fn read_workbook(bytes: &[u8]) -> Result<Workbook, SheetError> {
    let fingerprint = format!("{:x}", Sha256::digest(bytes));
    let sheets = match read_spreadsheet(bytes) {
        Some(sheets) => sheets,
        None => vec![read_delimited(bytes)?],
    };
    if sheets.is_empty() {
        return Err(SheetError::NoSheets);
    }
    Ok(Workbook { sheets, fingerprint })
}

fn read_spreadsheet(bytes: &[u8]) -> Option<Vec<SheetGrid>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).ok()?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(sheet = %name, error = %e, "skipping unreadable sheet");
                continue;
            }
        };
        let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
        let rows = range
            .rows()
            .map(|r| r.iter().map(Cell::from).collect::<Vec<_>>())
            .collect();
        sheets.push(SheetGrid {
            name,
            first_row,
            rows,
        });
    }
    Some(sheets)
}

fn read_delimited(bytes: &[u8]) -> Result<SheetGrid, SheetError> {
    let text = decode_text(bytes)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|_| SheetError::Unrecognized)?;
        rows.push(
            record
                .iter()
                .map(|v| {
                    if v.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(v.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(SheetGrid {
        name: "Sheet1".to_string(),
        first_row: 0,
        rows,
    })
}

fn decode_text(bytes: &[u8]) -> Result<String, SheetError> {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            let (decoded, _, had_errors) = encoding_rs::WINDOWS_1256.decode(bytes);
            if had_errors {
                return Err(SheetError::Unrecognized);
            }
            decoded.into_owned()
        }
    };
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n'))
    {
        return Err(SheetError::Unrecognized);
    }
    Ok(text)
}
