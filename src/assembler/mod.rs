//! Builds one spreadsheet per leaf file: scraped metrics plus the embedded
//! thumbnail, rows in leaf-file order.

use crate::browser::ProductPage;
use crate::config::{AssemblyConfig, ScraperConfig};
use crate::images::ImageSource;
use crate::loader::{discover_files, load_leaf_file};
use crate::models::{columns, AssembledRow};
use crate::scraper::MetricScraper;
use crate::workbook::{CellValue, SheetWriter};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-file counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub rows_written: usize,
    pub rows_skipped: usize,
    pub images_embedded: usize,
}

/// One unit of scrape work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// `<output_dir>/<path of leaf relative to link_dir, .xlsx>`
pub fn output_path(link_dir: &Path, output_dir: &Path, leaf: &Path) -> Result<PathBuf> {
    let rel = leaf
        .strip_prefix(link_dir)
        .with_context(|| format!("{:?} is outside {:?}", leaf, link_dir))?;
    Ok(output_dir.join(rel).with_extension("xlsx"))
}

/// Leaf files whose spreadsheet does not exist yet, plus the number of
/// files already assembled.
pub fn pending_jobs(link_dir: &Path, output_dir: &Path) -> Result<(Vec<AssemblyJob>, usize)> {
    let mut jobs = Vec::new();
    let mut done = 0usize;
    for input in discover_files(link_dir, "csv")? {
        let output = output_path(link_dir, output_dir, &input)?;
        if output.exists() {
            debug!("Already assembled {:?}", output);
            done += 1;
        } else {
            jobs.push(AssemblyJob { input, output });
        }
    }
    Ok((jobs, done))
}

pub struct Assembler {
    scraper: MetricScraper,
    geometry: AssemblyConfig,
}

impl Assembler {
    pub fn new(scraper: &ScraperConfig, geometry: &AssemblyConfig) -> Self {
        Self {
            scraper: MetricScraper::new(scraper),
            geometry: geometry.clone(),
        }
    }

    /// Scrape every product of `job.input` sequentially and save the sheet.
    pub async fn assemble_file<P, I>(&self, page: &P, images: &I, job: &AssemblyJob) -> Result<FileStats>
    where
        P: ProductPage + ?Sized,
        I: ImageSource + ?Sized,
    {
        let leaves = load_leaf_file(&job.input)?;
        info!("Assembling {:?} ({} products)", job.output, leaves.len());

        let mut writer = SheetWriter::new(&self.geometry);
        writer.reserve_image_column()?;
        writer.write_row(0, &columns::assembled_header())?;

        let mut stats = FileStats::default();
        let mut row_no = 1u32;

        for (idx, leaf) in leaves.iter().enumerate() {
            let record = self.scraper.scrape(page, &leaf.link).await;
            let Some(mut row) = AssembledRow::from_record(&record, &leaf.image, None) else {
                warn!(
                    "Row {} incomplete (missing {}), skipping {}",
                    idx + 1,
                    record.missing().join("/"),
                    leaf.link
                );
                stats.rows_skipped += 1;
                continue;
            };
            row.image = images.fetch(&leaf.image).await;

            if write_assembled(&mut writer, row_no, &row)? {
                stats.images_embedded += 1;
            }
            stats.rows_written += 1;
            row_no += 1;
        }

        writer.save(&job.output)?;
        info!(
            "Saved {:?}: {} rows, {} images, {} skipped",
            job.output, stats.rows_written, stats.images_embedded, stats.rows_skipped
        );
        Ok(stats)
    }
}

/// Write `row` at `row_no`; returns whether the thumbnail made it in.
fn write_assembled(writer: &mut SheetWriter, row_no: u32, row: &AssembledRow) -> Result<bool> {
    let mut embedded = false;
    if let Some(bytes) = &row.image {
        match writer.embed_image(row_no, bytes) {
            Ok(()) => embedded = true,
            Err(e) => warn!("Could not embed image for row {}: {:#}", row_no + 1, e),
        }
    }

    writer.write_cell(row_no, 1, &CellValue::text(row.link.as_str()))?;
    writer.write_cell(row_no, 2, &CellValue::text(row.image_link.as_str()))?;
    writer.write_cell(row_no, 3, &CellValue::text(row.product_name.as_str()))?;
    for (i, value) in row.metrics.iter().enumerate() {
        writer.write_cell(row_no, 4 + i as u16, &CellValue::text(value.as_str()))?;
    }
    Ok(embedded)
}
