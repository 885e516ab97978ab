//! Post-processing of assembled spreadsheets, rewritten in place.

pub mod derived;

use crate::config::AssemblyConfig;
use crate::error::HarvestError;
use crate::loader::discover_files;
use crate::models::{columns, Metric};
use crate::scraper::cleaner::parse_number;
use crate::utils::write_atomically;
use crate::workbook::drawing::read_column_a_images;
use crate::workbook::{display_number, read_first_sheet, CellValue, Sheet, SheetWriter};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use self::derived::{channel_ratio, round_to, total_visitors, with_percent, without_percent};

const LOCK_FILE_PREFIX: &str = "~$";
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Rows kept and dropped in one file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub kept: usize,
    pub duplicates: usize,
}

/// A spreadsheet that could not be post-processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    /// Directory relative to the output root, `.` for the root itself.
    pub dir: String,
    pub file: String,
}

#[derive(Debug, Default)]
pub struct FinalizeStats {
    pub files: usize,
    pub rows_kept: usize,
    pub duplicates: usize,
    pub failed: Vec<FailedFile>,
}

/// Post-process every spreadsheet under `output_dir`. Unreadable files go to
/// the failure log, which is only written when there is something to report.
pub fn finalize_tree(output_dir: &Path, failure_log: &Path, geometry: &AssemblyConfig) -> Result<FinalizeStats> {
    let mut stats = FinalizeStats::default();

    for path in discover_files(output_dir, "xlsx")? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with(LOCK_FILE_PREFIX) {
            debug!("Ignoring lock file {:?}", path);
            continue;
        }

        match finalize_file(&path, geometry) {
            Ok(outcome) => {
                stats.files += 1;
                stats.rows_kept += outcome.kept;
                stats.duplicates += outcome.duplicates;
            }
            Err(e) => {
                let dir = path
                    .parent()
                    .and_then(|p| p.strip_prefix(output_dir).ok())
                    .map(|p| p.to_string_lossy().into_owned())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| ".".to_string());
                warn!("Corrupt spreadsheet {}/{} skipped: {:#}", dir, name, e);
                stats.failed.push(FailedFile { dir, file: name });
            }
        }
    }

    if !stats.failed.is_empty() {
        write_failure_log(failure_log, &stats.failed)?;
        info!("{} corrupt files listed in {:?}", stats.failed.len(), failure_log);
    }
    Ok(stats)
}

/// `二级目录,文件名称` CSV, UTF-8 with BOM.
pub fn write_failure_log(path: &Path, failed: &[FailedFile]) -> Result<()> {
    write_atomically(path, |staging| {
        let mut file = std::fs::File::create(staging)
            .with_context(|| format!("Failed to create {:?}", staging))?;
        file.write_all(BOM)?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["二级目录", "文件名称"])?;
        for f in failed {
            writer.write_record([&f.dir, &f.file])?;
        }
        writer.flush()?;
        Ok(())
    })
}

fn require(sheet: &Sheet, path: &Path, column: &str) -> Result<usize, HarvestError> {
    sheet
        .column(column)
        .ok_or_else(|| HarvestError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

/// Column of `name`, appended to the header when absent.
fn ensure_column(header: &mut Vec<String>, name: &str) -> usize {
    match header.iter().position(|h| h == name) {
        Some(i) => i,
        None => {
            header.push(name.to_string());
            header.len() - 1
        }
    }
}

/// Deduplicate, recompute derived columns, normalise percentages and freeze
/// the header of one spreadsheet. Embedded thumbnails follow their rows.
pub fn finalize_file(path: &Path, geometry: &AssemblyConfig) -> Result<FileOutcome> {
    let sheet = read_first_sheet(path)?;
    let images = read_column_a_images(path).map_err(|e| HarvestError::CorruptWorkbook {
        path: path.to_path_buf(),
        reason: format!("{e:#}"),
    })?;

    let clicks_col = require(&sheet, path, Metric::ClickPopularity.label())?;
    let index_col = require(&sheet, path, Metric::ProductIndex.label())?;
    let rate_col = require(&sheet, path, Metric::ConversionRate.label())?;
    let search_heat_col = sheet.column(Metric::SearchHeat.label());
    let soaring_col = sheet.column(Metric::SoaringHeat.label());

    let mut header = sheet.header();
    let total_col = ensure_column(&mut header, columns::TOTAL_VISITORS);
    let ratio_col = ensure_column(&mut header, columns::CHANNEL_RATIO);

    let width = sheet
        .rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(header.len());

    let mut seen: HashSet<Vec<Option<String>>> = HashSet::new();
    let mut outcome = FileOutcome::default();
    let mut writer = SheetWriter::new(geometry);
    writer.reserve_image_column()?;
    writer.freeze_header()?;
    writer.write_row(0, &header)?;

    let mut out_row = 1u32;
    for (r, row) in sheet.rows.iter().enumerate().skip(1) {
        let signature: Vec<Option<String>> = (1..width).map(|c| sheet.cell(r, c).signature()).collect();
        if !seen.insert(signature) {
            outcome.duplicates += 1;
            continue;
        }

        let mut cells = row.clone();
        cells.resize(width, CellValue::Empty);

        let number = |c: usize| cells[c].as_text().as_deref().and_then(parse_number);
        let clicks = number(clicks_col);
        let estimate = total_visitors(number(index_col), number(rate_col));
        let ratio = channel_ratio(clicks, estimate);

        cells[total_col] = estimate
            .map(|e| CellValue::Number(round_to(e, 2)))
            .unwrap_or_default();
        cells[ratio_col] = ratio
            .map(|v| CellValue::text(with_percent(&display_number(v))))
            .unwrap_or_default();

        if let Some(c) = search_heat_col {
            let stripped = match &cells[c] {
                CellValue::Text(s) if s.trim_end().ends_with('%') => Some(without_percent(s)),
                _ => None,
            };
            if let Some(s) = stripped {
                cells[c] = CellValue::text(s);
            }
        }
        if let Some(c) = soaring_col {
            if let Some(s) = cells[c].as_text() {
                cells[c] = CellValue::text(with_percent(&s));
            }
        }

        if let Some(bytes) = images.get(&(r as u32)) {
            if let Err(e) = writer.embed_image(out_row, bytes) {
                warn!("{:?}: image of row {} dropped: {:#}", path, r + 1, e);
            }
        }
        for (c, value) in cells.iter().enumerate() {
            writer.write_cell(out_row, c as u16, value)?;
        }
        out_row += 1;
        outcome.kept += 1;
    }

    writer.save(path)?;
    debug!(
        "Finalized {:?}: {} rows kept, {} duplicates removed",
        path, outcome.kept, outcome.duplicates
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
        buf
    }

    /// Assembled sheet: (link, clicks, index, rate, image?)
    fn seed(path: &Path, rows: &[(&str, &str, &str, &str, bool)]) {
        let mut w = SheetWriter::new(&AssemblyConfig::default());
        w.write_row(0, &columns::assembled_header()).unwrap();
        for (i, (link, clicks, index, rate, with_image)) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            if *with_image {
                w.embed_image(r, &png()).unwrap();
            }
            let values = [
                "", link, "https://img/x.png", "杯子", "10", "12.5%", clicks, "3", "4%", "5", rate, index, "7.1%",
            ];
            for (c, v) in values.iter().enumerate() {
                w.write_cell(r, c as u16, &CellValue::text(*v)).unwrap();
            }
        }
        w.save(path).unwrap();
    }

    #[test]
    fn derives_visitors_and_channel_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.xlsx");
        seed(&path, &[("https://p/1", "120", "500", "25%", false), ("https://p/2", "1", "9", "", false)]);

        let outcome = finalize_file(&path, &AssemblyConfig::default()).unwrap();
        assert_eq!(outcome, FileOutcome { kept: 2, duplicates: 0 });

        let sheet = read_first_sheet(&path).unwrap();
        let header = sheet.header();
        assert_eq!(header.len(), 15);
        assert_eq!(header[13], "总访客数");
        assert_eq!(header[14], "手淘占比");

        assert_eq!(sheet.cell(1, 13), &CellValue::Number(2000.0));
        assert_eq!(sheet.cell(1, 14).to_string(), "6.0%");
        assert_eq!(sheet.cell(1, 5).to_string(), "12.5");
        assert_eq!(sheet.cell(1, 12).to_string(), "7.1%");

        assert_eq!(sheet.cell(2, 13), &CellValue::Empty);
        assert_eq!(sheet.cell(2, 14), &CellValue::Empty);
    }

    #[test]
    fn duplicates_keep_the_earlier_row_and_its_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.xlsx");
        seed(
            &path,
            &[
                ("https://p/1", "120", "500", "25%", true),
                ("https://p/2", "1", "100", "10%", false),
                ("https://p/1", "120", "500", "25%", false),
                ("https://p/3", "2", "100", "10%", true),
            ],
        );

        let outcome = finalize_file(&path, &AssemblyConfig::default()).unwrap();
        assert_eq!(outcome, FileOutcome { kept: 3, duplicates: 1 });

        let sheet = read_first_sheet(&path).unwrap();
        let links: Vec<String> = (1..sheet.rows.len()).map(|r| sheet.cell(r, 1).to_string()).collect();
        assert_eq!(links, vec!["https://p/1", "https://p/2", "https://p/3"]);

        let images = read_column_a_images(&path).unwrap();
        let mut rows: Vec<u32> = images.keys().copied().collect();
        rows.sort();
        assert_eq!(rows, vec![1, 3]);
    }

    #[test]
    fn rerun_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("again.xlsx");
        seed(&path, &[("https://p/1", "120", "500", "25%", true)]);

        finalize_file(&path, &AssemblyConfig::default()).unwrap();
        let first = read_first_sheet(&path).unwrap();
        finalize_file(&path, &AssemblyConfig::default()).unwrap();
        let second = read_first_sheet(&path).unwrap();

        assert_eq!(first.rows, second.rows);
        assert_eq!(read_column_a_images(&path).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_and_incomplete_files_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output");
        let log = dir.path().join("损坏文件记录.csv");

        seed(&out.join("女装/上衣/good.xlsx"), &[("https://p/1", "120", "500", "25%", false)]);
        std::fs::write(out.join("女装/上衣/bad.xlsx"), b"not a zip").unwrap();
        std::fs::write(out.join("~$good.xlsx"), b"lock").unwrap();

        let mut w = SheetWriter::new(&AssemblyConfig::default());
        w.write_row(0, &["图片", "链接"]).unwrap();
        w.save(&out.join("narrow.xlsx")).unwrap();

        let stats = finalize_tree(&out, &log, &AssemblyConfig::default()).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.failed.len(), 2);
        assert!(stats.failed.contains(&FailedFile { dir: "女装/上衣".into(), file: "bad.xlsx".into() }));
        assert!(stats.failed.contains(&FailedFile { dir: ".".into(), file: "narrow.xlsx".into() }));

        let raw = std::fs::read(&log).unwrap();
        assert!(raw.starts_with(BOM));
        let text = String::from_utf8(raw[3..].to_vec()).unwrap();
        assert!(text.starts_with("二级目录,文件名称\n"));
        assert!(text.contains("女装/上衣,bad.xlsx"));

        let good = read_first_sheet(&out.join("女装/上衣/good.xlsx")).unwrap();
        assert_eq!(good.cell(1, 14).to_string(), "6.0%");
    }

    #[test]
    fn no_failures_no_log() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output");
        let log = dir.path().join("损坏文件记录.csv");
        seed(&out.join("a.xlsx"), &[("https://p/1", "120", "500", "25%", false)]);

        let stats = finalize_tree(&out, &log, &AssemblyConfig::default()).unwrap();
        assert_eq!(stats.files, 1);
        assert!(!log.exists());
    }
}
