//! Shared fixtures: minimal `.xlsx` workbooks written with the zip writer.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::{SimpleFileOptions, ZipWriter};

/// A cell in a fixture row.
#[derive(Debug, Clone)]
pub enum Cell {
    /// Inline string.
    Text(&'static str),
    /// Plain number.
    Number(f64),
    /// Serial number styled with a built-in date format.
    Date(f64),
    /// Boolean.
    Bool(bool),
    /// Nothing written for this column.
    Blank,
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="xml" ContentType="application/xml"/>
</Types>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>"#;

// Style 1 is the built-in short date format.
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"/></cellXfs>
</styleSheet>"#;

fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap()
}

fn worksheet(rows: &[Vec<Cell>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (row_index, cells) in rows.iter().enumerate() {
        if cells.iter().all(|c| matches!(c, Cell::Blank)) {
            continue;
        }
        let r = row_index + 1;
        xml.push_str(&format!(r#"<row r="{r}">"#));
        for (col, cell) in cells.iter().enumerate() {
            let reference = format!("{}{}", column_letters(col), r);
            match cell {
                Cell::Text(s) => xml.push_str(&format!(
                    r#"<c r="{reference}" t="inlineStr"><is><t>{s}</t></is></c>"#
                )),
                Cell::Number(n) => xml.push_str(&format!(r#"<c r="{reference}"><v>{n}</v></c>"#)),
                Cell::Date(n) => {
                    xml.push_str(&format!(r#"<c r="{reference}" s="1"><v>{n}</v></c>"#))
                }
                Cell::Bool(b) => xml.push_str(&format!(
                    r#"<c r="{reference}" t="b"><v>{}</v></c>"#,
                    u8::from(*b)
                )),
                Cell::Blank => {}
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Encode `rows` as a single-sheet workbook. Row 0 is the header row.
pub fn workbook_bytes(rows: &[Vec<Cell>]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let sheet = worksheet(rows);
    for (name, body) in [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ("xl/styles.xml", STYLES),
        ("xl/worksheets/sheet1.xml", sheet.as_str()),
    ] {
        zip.start_file(name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Write `rows` as a workbook at `path`, replacing any existing file.
pub fn write_workbook(path: &Path, rows: &[Vec<Cell>]) {
    std::fs::write(path, workbook_bytes(rows)).unwrap();
}

/// The two-row name/score sheet most tests start from.
pub fn name_score_rows() -> Vec<Vec<Cell>> {
    vec![
        vec![Cell::Text("name"), Cell::Text("score")],
        vec![Cell::Text("a"), Cell::Number(1.0)],
        vec![Cell::Text("b"), Cell::Number(2.0)],
    ]
}
