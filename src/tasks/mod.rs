//! Task source spreadsheet: column A category name, B ready flag, C
//! completion flag. Row 1 is a header.

use crate::config::AssemblyConfig;
use crate::error::HarvestError;
use crate::models::CategoryTask;
use crate::workbook::{read_first_sheet, CellValue, Sheet, SheetWriter};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const NAME_COL: usize = 0;
const READY_COL: usize = 1;
const DONE_COL: usize = 2;

/// Spreadsheet-backed task queue. Completion write-backs are serialised so
/// workers finishing together do not overwrite each other's flags.
pub struct TaskSource {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Sheet, HarvestError> {
        if !self.path.exists() {
            return Err(HarvestError::TaskSource {
                path: self.path.clone(),
                reason: "file not found".into(),
            });
        }
        read_first_sheet(&self.path).map_err(|e| HarvestError::TaskSource {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Every category row, header excluded.
    pub fn load(&self) -> Result<Vec<CategoryTask>> {
        let sheet = self.read()?;
        let tasks: Vec<CategoryTask> = sheet
            .rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, row)| {
                let name = row.get(NAME_COL)?.as_text()?.trim().to_string();
                if name.is_empty() {
                    return None;
                }
                Some(CategoryTask {
                    name,
                    row: i as u32 + 1,
                    ready: row.get(READY_COL).map(is_set).unwrap_or(false),
                    completed: row.get(DONE_COL).map(is_set).unwrap_or(false),
                })
            })
            .collect();
        debug!("{:?}: {} category rows", self.path, tasks.len());
        Ok(tasks)
    }

    /// Categories flagged ready and not yet completed.
    pub fn pending(&self) -> Result<Vec<CategoryTask>> {
        let all = self.load()?;
        let skipped = all.iter().filter(|t| t.ready && t.completed).count();
        if skipped > 0 {
            info!("{} ready categories already completed, skipping", skipped);
        }
        Ok(all.into_iter().filter(|t| t.ready && !t.completed).collect())
    }

    /// Set the completion flag of `task`'s row and write the sheet back.
    pub async fn mark_complete(&self, task: &CategoryTask) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut sheet = self.read()?;
        let idx = (task.row - 1) as usize;
        let row = sheet
            .rows
            .get_mut(idx)
            .with_context(|| format!("Row {} vanished from {:?}", task.row, self.path))?;
        if row.len() <= DONE_COL {
            row.resize(DONE_COL + 1, CellValue::Empty);
        }
        row[DONE_COL] = CellValue::Number(1.0);

        let mut writer = SheetWriter::new(&AssemblyConfig::default());
        for (r, cells) in sheet.rows.iter().enumerate() {
            for (c, value) in cells.iter().enumerate() {
                writer.write_cell(r as u32, c as u16, value)?;
            }
        }
        writer.save(&self.path)?;
        info!("Marked {} complete in {:?}", task.name, self.path);
        Ok(())
    }
}

fn is_set(cell: &CellValue) -> bool {
    match cell {
        CellValue::Number(n) => *n == 1.0,
        CellValue::Text(s) => s.trim() == "1",
        CellValue::Bool(b) => *b,
        CellValue::Empty => false,
    }
}
