pub mod retry;

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Format a count with thousands separators.
pub fn fmt_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

/// Category labels become path components; `/` would split them.
pub fn sanitize_label(label: &str) -> String {
    label.trim().replace('/', "_")
}

// ── Atomic file replacement ───────────────────────────────────────────────────

/// Sibling path an artifact is staged at before being renamed into place.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".part");
    path.with_file_name(name)
}

/// Write `path` through a staging file so readers never observe a partial
/// artifact. `write` receives the staging path.
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let staging = staging_path(path);
    if let Err(e) = write(&staging) {
        let _ = std::fs::remove_file(&staging);
        return Err(e);
    }
    std::fs::rename(&staging, path)
        .with_context(|| format!("Could not move {:?} into place", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_number() {
        assert_eq!(fmt_number(1_234_567), "1,234,567");
        assert_eq!(fmt_number(0), "0");
        assert_eq!(fmt_number(999), "999");
    }

    #[test]
    fn labels_are_path_safe() {
        assert_eq!(sanitize_label(" 女装/女士精品 "), "女装_女士精品");
    }

    #[test]
    fn staging_path_is_sibling() {
        let p = staging_path(Path::new("output/a/b.xlsx"));
        assert_eq!(p, PathBuf::from("output/a/b.xlsx.part"));
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out.csv");

        let res = write_atomically(&target, |tmp| {
            std::fs::write(tmp, "half")?;
            anyhow::bail!("interrupted")
        });
        assert!(res.is_err());
        assert!(!target.exists());
        assert!(!staging_path(&target).exists());

        write_atomically(&target, |tmp| Ok(std::fs::write(tmp, "done")?)).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "done");
    }
}
