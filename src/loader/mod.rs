//! Leaf link files: `Link,Image` CSVs written by the crawler and read back
//! by the scrape stage.

use crate::models::LeafRecord;
use crate::utils::write_atomically;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Write a leaf file (UTF-8 with BOM, header `Link,Image`) in one go.
pub fn write_leaf_file(path: &Path, records: &[LeafRecord]) -> Result<()> {
    write_atomically(path, |staging| {
        let mut file = std::fs::File::create(staging)
            .with_context(|| format!("Failed to create {:?}", staging))?;
        file.write_all(BOM)?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["Link", "Image"])?;
        for r in records {
            writer.write_record([&r.link, &r.image])?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// Read a leaf file. Rows without a product link are dropped; malformed
/// rows are logged and skipped.
pub fn load_leaf_file(path: &Path) -> Result<Vec<LeafRecord>> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let body = raw.strip_prefix(BOM).unwrap_or(&raw);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body);

    let headers = reader.headers()?.clone();
    let link_idx = headers.iter().position(|h| h.trim() == "Link").unwrap_or(0);
    let image_idx = headers.iter().position(|h| h.trim() == "Image").unwrap_or(1);

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let link = record.get(link_idx).unwrap_or_default().trim().to_string();
        if link.is_empty() {
            continue;
        }
        records.push(LeafRecord {
            link,
            image: record.get(image_idx).unwrap_or_default().trim().to_string(),
        });
    }

    debug!("{:?}: {} links loaded", path, records.len());
    Ok(records)
}

/// Recursively collect files under `dir` with the given extension, sorted.
pub fn discover_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)
            .with_context(|| format!("Failed to list {:?}", current))?
        {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(link: &str, image: &str) -> LeafRecord {
        LeafRecord { link: link.into(), image: image.into() }
    }

    #[test]
    fn leaf_file_has_bom_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("女装/连衣裙/连衣裙.csv");
        write_leaf_file(&path, &[rec("https://p/1", "https://img/1.jpg")]).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(BOM));
        let text = String::from_utf8(raw[3..].to_vec()).unwrap();
        assert!(text.starts_with("Link,Image\n"));

        let loaded = load_leaf_file(&path).unwrap();
        assert_eq!(loaded, vec![rec("https://p/1", "https://img/1.jpg")]);
    }

    #[test]
    fn rows_without_link_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "Link,Image\n,https://img/x.jpg\nhttps://p/2,\n").unwrap();
        let loaded = load_leaf_file(&path).unwrap();
        assert_eq!(loaded, vec![rec("https://p/2", "")]);
    }

    #[test]
    fn discovery_is_recursive_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("x/y")).unwrap();
        std::fs::write(dir.path().join("x/y/b.csv"), "").unwrap();
        std::fs::write(dir.path().join("x/a.CSV"), "").unwrap();
        std::fs::write(dir.path().join("x/a.csv.part"), "").unwrap();
        std::fs::write(dir.path().join("note.txt"), "").unwrap();

        let files = discover_files(dir.path(), "csv").unwrap();
        assert_eq!(files.len(), 2);
        assert!(discover_files(&dir.path().join("missing"), "csv").unwrap().is_empty());
    }
}
