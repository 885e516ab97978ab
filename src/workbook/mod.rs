//! Thin spreadsheet layer: calamine for reading cell values, the drawing
//! reader for embedded thumbnails, rust_xlsxwriter for writing.

pub mod drawing;

use crate::config::AssemblyConfig;
use crate::error::HarvestError;
use crate::utils::write_atomically;
use anyhow::{Context, Result};
use calamine::{open_workbook, Data, Reader, Xlsx, XlsxError};
use rust_xlsxwriter::{Image, Workbook, Worksheet};
use std::fmt;
use std::path::Path;

// ── Cell values ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() { CellValue::Empty } else { CellValue::Text(s) }
    }

    /// Display form, `None` for empty cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            other => Some(other.to_string()),
        }
    }

    /// Normalised form used for row signatures: text is trimmed.
    pub fn signature(&self) -> Option<String> {
        match self {
            CellValue::Text(s) => Some(s.trim().to_string()),
            other => other.as_text(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => f.write_str(&display_number(*n)),
            CellValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(d: &Data) -> Self {
        match d {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            other => CellValue::text(other.to_string()),
        }
    }
}

/// Shortest round-trip form that keeps a decimal point on whole numbers.
/// 6.0 → "6.0" | 2000.25 → "2000.25"
pub fn display_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// First worksheet of a workbook as a dense grid; row 0 is the header.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub rows: Vec<Vec<CellValue>>,
}

impl Sheet {
    pub fn header(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.iter().map(|c| c.to_string().trim().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header().iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
    }
}

pub fn read_first_sheet(path: &Path) -> std::result::Result<Sheet, HarvestError> {
    let corrupt = |reason: String| HarvestError::CorruptWorkbook {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e: XlsxError| corrupt(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| corrupt("workbook has no worksheet".into()))?
        .map_err(|e| corrupt(e.to_string()))?;

    let Some((end_row, end_col)) = range.end() else {
        return Ok(Sheet::default());
    };

    let rows = (0..=end_row)
        .map(|r| {
            (0..=end_col)
                .map(|c| range.get_value((r, c)).map(CellValue::from).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(Sheet { rows })
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Single-worksheet writer with thumbnail embedding.
pub struct SheetWriter {
    sheet: Worksheet,
    geometry: AssemblyConfig,
}

impl SheetWriter {
    pub fn new(geometry: &AssemblyConfig) -> Self {
        Self {
            sheet: Worksheet::new(),
            geometry: geometry.clone(),
        }
    }

    /// Widen column A so embedded thumbnails fit.
    pub fn reserve_image_column(&mut self) -> Result<()> {
        self.sheet.set_column_width(0, self.geometry.image_column_width)?;
        Ok(())
    }

    pub fn write_row<S: AsRef<str>>(&mut self, row: u32, values: &[S]) -> Result<()> {
        for (col, v) in values.iter().enumerate() {
            self.write_cell(row, col as u16, &CellValue::text(v.as_ref()))?;
        }
        Ok(())
    }

    pub fn write_cell(&mut self, row: u32, col: u16, value: &CellValue) -> Result<()> {
        match value {
            CellValue::Empty => {}
            CellValue::Text(s) => {
                self.sheet.write_string(row, col, s)?;
            }
            CellValue::Number(n) => {
                self.sheet.write_number(row, col, *n)?;
            }
            CellValue::Bool(b) => {
                self.sheet.write_boolean(row, col, *b)?;
            }
        }
        Ok(())
    }

    /// Embed a thumbnail in column A of `row`, scaled to the configured size.
    pub fn embed_image(&mut self, row: u32, bytes: &[u8]) -> Result<()> {
        let image = Image::new_from_buffer(bytes)
            .context("Unsupported image payload")?
            .set_scale_to_size(
                self.geometry.image_width_px,
                self.geometry.image_height_px,
                false,
            );
        self.sheet.set_row_height(row, self.geometry.image_row_height)?;
        self.sheet.insert_image(row, 0, &image)?;
        Ok(())
    }

    pub fn freeze_header(&mut self) -> Result<()> {
        self.sheet.set_freeze_panes(1, 0)?;
        Ok(())
    }

    /// Save through a staging file, replacing any existing file at `path`.
    pub fn save(self, path: &Path) -> Result<()> {
        let mut workbook = Workbook::new();
        workbook.push_worksheet(self.sheet);
        write_atomically(path, |staging| {
            workbook
                .save(staging)
                .with_context(|| format!("Failed to save {:?}", path))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_keep_python_style_decimal() {
        assert_eq!(display_number(6.0), "6.0");
        assert_eq!(display_number(2000.25), "2000.25");
        assert_eq!(display_number(0.1234), "0.1234");
    }

    #[test]
    fn written_sheet_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.xlsx");

        let mut w = SheetWriter::new(&AssemblyConfig::default());
        w.write_row(0, &["图片", "链接", "点击人气"]).unwrap();
        w.write_cell(1, 1, &CellValue::text(" https://a ")).unwrap();
        w.write_cell(1, 2, &CellValue::Number(120.0)).unwrap();
        w.freeze_header().unwrap();
        w.save(&path).unwrap();

        let sheet = read_first_sheet(&path).unwrap();
        assert_eq!(sheet.header(), vec!["图片", "链接", "点击人气"]);
        assert_eq!(sheet.column("点击人气"), Some(2));
        assert_eq!(sheet.cell(1, 0), &CellValue::Empty);
        assert_eq!(sheet.cell(1, 1).signature().as_deref(), Some("https://a"));
        assert_eq!(sheet.cell(1, 2), &CellValue::Number(120.0));
        assert_eq!(sheet.cell(9, 9), &CellValue::Empty);
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"definitely not a zip archive").unwrap();
        let err = read_first_sheet(&path).unwrap_err();
        assert!(matches!(err, HarvestError::CorruptWorkbook { .. }));
    }
}
