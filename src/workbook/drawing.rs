//! Reads images anchored in the first worksheet's drawing part, keyed by the
//! zero-based row of their top-left anchor cell.
//!
//! Layout walked: `xl/worksheets/_rels/sheet1.xml.rels` → drawing part →
//! drawing rels → `xl/media/*`.

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;

const SHEET_PART: &str = "xl/worksheets/sheet1.xml";

#[derive(Debug, Clone, PartialEq)]
struct Relationship {
    id: String,
    kind: String,
    target: String,
}

#[derive(Debug, Default)]
struct Anchor {
    col: Option<u32>,
    row: Option<u32>,
    embed: Option<String>,
}

/// Images whose anchor starts in column A, by row.
pub fn read_column_a_images(path: &Path) -> Result<HashMap<u32, Vec<u8>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut archive = ZipArchive::new(file).context("Not a zip archive")?;

    let Some(sheet_rels) = read_part(&mut archive, &rels_path(SHEET_PART))? else {
        return Ok(HashMap::new());
    };
    let Some(drawing_rel) = parse_relationships(&sheet_rels)?
        .into_iter()
        .find(|r| r.kind.ends_with("/drawing"))
    else {
        return Ok(HashMap::new());
    };

    let drawing_part = resolve_part(SHEET_PART, &drawing_rel.target);
    let Some(drawing_xml) = read_part(&mut archive, &drawing_part)? else {
        return Ok(HashMap::new());
    };
    let media: HashMap<String, String> = match read_part(&mut archive, &rels_path(&drawing_part))? {
        Some(xml) => parse_relationships(&xml)?
            .into_iter()
            .map(|r| (r.id, resolve_part(&drawing_part, &r.target)))
            .collect(),
        None => HashMap::new(),
    };

    let mut images = HashMap::new();
    for anchor in parse_anchors(&drawing_xml)? {
        let (Some(0), Some(row), Some(embed)) = (anchor.col, anchor.row, anchor.embed) else {
            continue;
        };
        let Some(part) = media.get(&embed) else { continue };
        if let Some(bytes) = read_bytes(&mut archive, part)? {
            images.insert(row, bytes);
        }
    }
    Ok(images)
}

// ── Zip access ────────────────────────────────────────────────────────────────

fn read_bytes(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read part {}", name)),
    }
}

fn read_part(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<String>> {
    read_bytes(archive, name)?
        .map(|b| String::from_utf8(b).with_context(|| format!("Part {} is not UTF-8", name)))
        .transpose()
}

/// `xl/drawings/drawing1.xml` → `xl/drawings/_rels/drawing1.xml.rels`
fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target relative to the part that declares it.
fn resolve_part(base_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_part.split('/').collect();
    segments.pop();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

// ── XML ───────────────────────────────────────────────────────────────────────

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.local_name().as_ref() == local {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(kind), Some(target)) =
                    (attr(&e, b"Id")?, attr(&e, b"Type")?, attr(&e, b"Target")?)
                {
                    out.push(Relationship { id, kind, target });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

#[derive(Clone, Copy)]
enum Field {
    Col,
    Row,
}

fn parse_anchors(xml: &str) -> Result<Vec<Anchor>> {
    let mut reader = Reader::from_str(xml);
    let mut anchors = Vec::new();
    let mut current: Option<Anchor> = None;
    let mut in_from = false;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"twoCellAnchor" | b"oneCellAnchor" => current = Some(Anchor::default()),
                b"from" => in_from = true,
                b"col" if in_from => field = Some(Field::Col),
                b"row" if in_from => field = Some(Field::Row),
                b"blip" => {
                    if let Some(a) = current.as_mut() {
                        a.embed = attr(&e, b"embed")?;
                    }
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"blip" => {
                if let Some(a) = current.as_mut() {
                    a.embed = attr(&e, b"embed")?;
                }
            }
            Event::Text(t) => {
                if let (Some(f), Some(a)) = (field, current.as_mut()) {
                    let value = t.unescape()?.trim().parse::<u32>().ok();
                    match f {
                        Field::Col => a.col = value,
                        Field::Row => a.row = value,
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"from" => in_from = false,
                b"col" | b"row" => field = None,
                b"twoCellAnchor" | b"oneCellAnchor" => {
                    if let Some(a) = current.take() {
                        anchors.push(a);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(anchors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssemblyConfig;
    use crate::workbook::SheetWriter;

    const DRAWING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <xdr:twoCellAnchor editAs="oneCell">
    <xdr:from><xdr:col>0</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>3</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>
    <xdr:to><xdr:col>1</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>7</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>
    <xdr:pic><xdr:blipFill><a:blip r:embed="rId2"/></xdr:blipFill></xdr:pic>
  </xdr:twoCellAnchor>
</xdr:wsDr>"#;

    #[test]
    fn anchor_uses_from_cell_only() {
        let anchors = parse_anchors(DRAWING).unwrap();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].col, Some(0));
        assert_eq!(anchors[0].row, Some(3));
        assert_eq!(anchors[0].embed.as_deref(), Some("rId2"));
    }

    #[test]
    fn relationship_targets_resolve() {
        assert_eq!(
            resolve_part("xl/worksheets/sheet1.xml", "../drawings/drawing1.xml"),
            "xl/drawings/drawing1.xml"
        );
        assert_eq!(resolve_part("xl/drawings/drawing1.xml", "/xl/media/image1.png"), "xl/media/image1.png");
        assert_eq!(rels_path("xl/drawings/drawing1.xml"), "xl/drawings/_rels/drawing1.xml.rels");
    }

    #[test]
    fn embedded_thumbnail_is_found_by_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.xlsx");

        let mut png = Vec::new();
        image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let mut w = SheetWriter::new(&AssemblyConfig::default());
        w.reserve_image_column().unwrap();
        w.write_row(0, &["图片", "链接"]).unwrap();
        w.write_row(1, &["", "https://a"]).unwrap();
        w.write_row(2, &["", "https://b"]).unwrap();
        w.embed_image(2, &png).unwrap();
        w.save(&path).unwrap();

        let images = read_column_a_images(&path).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images.get(&2), Some(&png));
    }

    #[test]
    fn sheet_without_drawing_has_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.xlsx");
        let mut w = SheetWriter::new(&AssemblyConfig::default());
        w.write_row(0, &["图片"]).unwrap();
        w.save(&path).unwrap();
        assert!(read_column_a_images(&path).unwrap().is_empty());
    }
}
