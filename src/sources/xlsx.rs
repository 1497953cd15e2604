//! `.xlsx` sheet source.
//!
//! Reads the workbook parts straight out of the zip container with
//! `quick-xml`: the sheet list and date system from `xl/workbook.xml`, the
//! worksheet location from its relationships, shared strings, and the cell
//! formats from `xl/styles.xml` so date-formatted numbers can be told apart
//! from plain ones.

use super::sheet::{DateSystem, RawCell, Sheet, SheetSource};
use crate::error::{Result, SheetError};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use quick_xml::Reader as XmlReader;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::warn;
use zip::ZipArchive;
use zip::result::ZipError;

/// Sheet source for Office Open XML workbooks.
///
/// Only the first worksheet (in workbook order) is read.
///
/// # Examples
///
/// ```rust,no_run
/// use sheetwatch::sources::{SheetSource, XlsxSource};
/// use std::path::Path;
///
/// let sheet = XlsxSource::new().read_sheet(Path::new("data/records.xlsx"))?;
/// println!("{} rows", sheet.row_count());
/// # Ok::<(), sheetwatch::error::SheetError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxSource;

impl XlsxSource {
    /// Create a new xlsx source.
    pub fn new() -> Self {
        Self
    }
}

impl SheetSource for XlsxSource {
    fn read_sheet(&self, path: &Path) -> Result<Sheet> {
        let file = File::open(path).map_err(|e| SheetError::unreadable(path, e))?;
        read_workbook(BufReader::new(file)).map_err(|e| match e {
            // Decoding errors carry no path; attach it here.
            DecodeError::Unreadable(reason) => SheetError::unreadable(path, reason),
            DecodeError::NoWorksheet => SheetError::SourceFormatInvalid(format!(
                "{}: workbook contains no worksheet",
                path.display()
            )),
        })
    }

    fn name(&self) -> String {
        "xlsx".to_string()
    }
}

#[derive(Debug)]
enum DecodeError {
    Unreadable(String),
    NoWorksheet,
}

impl From<ZipError> for DecodeError {
    fn from(e: ZipError) -> Self {
        DecodeError::Unreadable(e.to_string())
    }
}

impl From<quick_xml::Error> for DecodeError {
    fn from(e: quick_xml::Error) -> Self {
        DecodeError::Unreadable(e.to_string())
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::Unreadable(e.to_string())
    }
}

fn read_workbook<R: Read + Seek>(reader: R) -> std::result::Result<Sheet, DecodeError> {
    let mut archive = ZipArchive::new(reader)?;

    let workbook = read_entry(&mut archive, "xl/workbook.xml")?
        .ok_or_else(|| DecodeError::Unreadable("missing xl/workbook.xml".to_string()))?;
    let (first_sheet_rid, date_system) = parse_workbook(&workbook)?;
    let rid = first_sheet_rid.ok_or(DecodeError::NoWorksheet)?;

    let rels = read_entry(&mut archive, "xl/_rels/workbook.xml.rels")?
        .ok_or_else(|| DecodeError::Unreadable("missing workbook relationships".to_string()))?;
    let sheet_path = parse_workbook_rels(&rels)?
        .remove(&rid)
        .ok_or(DecodeError::NoWorksheet)?;

    let shared_strings = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(bytes) => parse_shared_strings(&bytes)?,
        None => Vec::new(),
    };

    let date_styles = match read_entry(&mut archive, "xl/styles.xml")? {
        Some(bytes) => parse_date_styles(&bytes)?,
        None => Vec::new(),
    };

    let sheet_xml = read_entry(&mut archive, &sheet_path)?
        .ok_or_else(|| DecodeError::Unreadable(format!("missing worksheet part {sheet_path}")))?;

    parse_worksheet(&sheet_xml, &shared_strings, &date_styles, date_system)
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> std::result::Result<Option<Vec<u8>>, DecodeError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn attr_val(attr: &Attribute) -> String {
    attr.unescape_value()
        .map(|v| v.into_owned())
        .unwrap_or_default()
}

fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .map(|a| attr_val(&a))
}

/// Returns the relationship id of the first sheet and the workbook date system.
fn parse_workbook(bytes: &[u8]) -> std::result::Result<(Option<String>, DateSystem), DecodeError> {
    let mut xml = XmlReader::from_reader(bytes);
    xml.config_mut().trim_text(true);

    let mut first_rid = None;
    let mut date_system = DateSystem::Excel1900;
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"workbookPr" => {
                    if matches!(attr(e, b"date1904").as_deref(), Some("1" | "true")) {
                        date_system = DateSystem::Excel1904;
                    }
                }
                b"sheet" if first_rid.is_none() => {
                    // r:id is namespaced; match on the local part.
                    first_rid = attr(e, b"id");
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok((first_rid, date_system))
}

fn parse_workbook_rels(bytes: &[u8]) -> std::result::Result<HashMap<String, String>, DecodeError> {
    let mut xml = XmlReader::from_reader(bytes);
    xml.config_mut().trim_text(true);

    let mut map = HashMap::new();
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let is_sheet = attr(e, b"Type").is_some_and(|t| t.ends_with("/worksheet"));
                if let (true, Some(id), Some(target)) =
                    (is_sheet, attr(e, b"Id"), attr(e, b"Target"))
                {
                    map.insert(id, normalize_path(&target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(map)
}

fn normalize_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn parse_shared_strings(bytes: &[u8]) -> std::result::Result<Vec<String>, DecodeError> {
    let mut xml = XmlReader::from_reader(bytes);
    xml.config_mut().trim_text(false);

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut in_phonetic = false;
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(ref e) if in_t && !in_phonetic => {
                current.push_str(&e.unescape().unwrap_or_default());
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// For every entry of `cellXfs`, whether its number format is a date format.
fn parse_date_styles(bytes: &[u8]) -> std::result::Result<Vec<bool>, DecodeError> {
    let mut xml = XmlReader::from_reader(bytes);
    xml.config_mut().trim_text(true);

    let mut custom_formats: HashMap<u32, String> = HashMap::new();
    let mut xf_format_ids: Vec<u32> = Vec::new();
    let mut in_cell_xfs = false;
    let mut buf = Vec::new();

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Event::End(ref e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"numFmt" => {
                    let id = attr(e, b"numFmtId").and_then(|v| v.parse::<u32>().ok());
                    if let (Some(id), Some(code)) = (id, attr(e, b"formatCode")) {
                        custom_formats.insert(id, code);
                    }
                }
                b"xf" if in_cell_xfs => {
                    let id = attr(e, b"numFmtId")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    xf_format_ids.push(id);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(xf_format_ids
        .into_iter()
        .map(|id| is_date_format(id, custom_formats.get(&id).map(String::as_str)))
        .collect())
}

/// Whether number format `id` (with its custom format code, if any) renders a date.
pub(crate) fn is_date_format(id: u32, code: Option<&str>) -> bool {
    match code {
        Some(code) => is_date_format_code(code),
        None => matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58),
    }
}

fn is_date_format_code(code: &str) -> bool {
    if code.eq_ignore_ascii_case("general") {
        return false;
    }

    let mut in_quotes = false;
    let mut skip_next = false;
    let mut bracket: Option<String> = None;

    // Only the first section decides; later sections style negatives and text.
    for ch in code.chars() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if let Some(content) = bracket.as_mut() {
            if ch == ']' {
                // [h], [mm], [ss] are elapsed-time formats; [Red] or [$-409] are not.
                let elapsed = !content.is_empty()
                    && content.chars().all(|c| matches!(c.to_ascii_lowercase(), 'h' | 'm' | 's'));
                if elapsed {
                    return true;
                }
                bracket = None;
            } else {
                content.push(ch);
            }
            continue;
        }
        match ch {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '\\' | '_' | '*' => skip_next = true,
            '[' => bracket = Some(String::new()),
            ';' => break,
            'y' | 'Y' | 'm' | 'M' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }

    false
}

/// Widest sheet a workbook may declare (column `XFD`).
const MAX_COLUMNS: u32 = 16_384;

#[derive(Clone, Copy)]
enum CellType {
    Number,
    SharedStr,
    Inline,
    Bool,
    Str,
    Error,
    IsoDate,
}

struct CellState {
    col: u32,
    cell_type: CellType,
    date_formatted: bool,
    value: String,
    capture: bool,
}

/// Lookup tables shared by every cell of a worksheet.
struct CellContext<'a> {
    shared_strings: &'a [String],
    date_system: DateSystem,
}

fn parse_worksheet(
    bytes: &[u8],
    shared_strings: &[String],
    date_styles: &[bool],
    date_system: DateSystem,
) -> std::result::Result<Sheet, DecodeError> {
    let mut xml = XmlReader::from_reader(bytes);
    xml.config_mut().trim_text(false);

    let ctx = CellContext {
        shared_strings,
        date_system,
    };
    let mut sheet = Sheet::new(date_system);
    let mut row: Option<(u32, Vec<RawCell>)> = None;
    let mut next_row = Some(0u32);
    let mut cell: Option<CellState> = None;
    let mut in_phonetic = false;
    let mut skipped_cells = 0usize;
    let mut buf = Vec::new();

    loop {
        let event = xml.read_event_into(&mut buf)?;
        let self_closing = matches!(event, Event::Empty(_));
        match event {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                let index = attr(e, b"r")
                    .and_then(|r| r.parse::<u32>().ok())
                    .and_then(|r| r.checked_sub(1))
                    .or(next_row);
                next_row = index.and_then(|i| i.checked_add(1));
                match index {
                    Some(index) if self_closing => sheet.insert_row(index, Vec::new()),
                    Some(index) => row = Some((index, Vec::new())),
                    // A row without a number after row u32::MAX has nowhere to go
                    None => row = None,
                }
            }

            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                let next_col = row.as_ref().map_or(0, |(_, cells)| cells.len() as u32);
                let col = attr(e, b"r")
                    .and_then(|r| col_ref_to_index(&r))
                    .unwrap_or(next_col);
                if col >= MAX_COLUMNS {
                    skipped_cells += 1;
                    cell = None;
                } else {
                    let cell_type = match attr(e, b"t").as_deref() {
                        Some("s") => CellType::SharedStr,
                        Some("inlineStr") => CellType::Inline,
                        Some("b") => CellType::Bool,
                        Some("str") => CellType::Str,
                        Some("e") => CellType::Error,
                        Some("d") => CellType::IsoDate,
                        _ => CellType::Number,
                    };
                    let date_formatted = attr(e, b"s")
                        .and_then(|s| s.parse::<usize>().ok())
                        .and_then(|s| date_styles.get(s).copied())
                        .unwrap_or(false);
                    let state = CellState {
                        col,
                        cell_type,
                        date_formatted,
                        value: String::new(),
                        capture: false,
                    };
                    if self_closing {
                        place_cell(&mut row, state, &ctx);
                    } else {
                        cell = Some(state);
                    }
                }
            }

            Event::Start(ref e) => match e.local_name().as_ref() {
                b"rPh" => in_phonetic = true,
                b"v" | b"t" if !in_phonetic => {
                    if let Some(state) = cell.as_mut() {
                        state.capture = true;
                    }
                }
                _ => {}
            },

            Event::Text(ref e) => {
                if let Some(state) = cell.as_mut().filter(|s| s.capture) {
                    state.value.push_str(&e.unescape().unwrap_or_default());
                }
            }

            Event::End(ref e) => match e.local_name().as_ref() {
                b"rPh" => in_phonetic = false,
                b"v" | b"t" => {
                    if let Some(state) = cell.as_mut() {
                        state.capture = false;
                    }
                }
                b"c" => {
                    if let Some(state) = cell.take() {
                        place_cell(&mut row, state, &ctx);
                    }
                }
                b"row" => {
                    if let Some((index, cells)) = row.take() {
                        sheet.insert_row(index, cells);
                    }
                }
                b"sheetData" => break,
                _ => {}
            },

            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if skipped_cells > 0 {
        warn!(
            skipped_cells,
            max_columns = MAX_COLUMNS,
            "ignored cells beyond the last worksheet column"
        );
    }

    Ok(sheet)
}

fn place_cell(row: &mut Option<(u32, Vec<RawCell>)>, state: CellState, ctx: &CellContext<'_>) {
    let Some((_, cells)) = row.as_mut() else {
        return;
    };
    let col = state.col as usize;
    if cells.len() <= col {
        cells.resize(col + 1, RawCell::Empty);
    }
    cells[col] = decode_cell(state, ctx);
}

fn decode_cell(state: CellState, ctx: &CellContext<'_>) -> RawCell {
    match state.cell_type {
        CellType::SharedStr => state
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| ctx.shared_strings.get(i))
            .map(|s| RawCell::Text(s.clone()))
            .unwrap_or(RawCell::Empty),
        CellType::Inline | CellType::Str => RawCell::Text(state.value),
        CellType::Bool => match state.value.trim() {
            "1" | "true" | "TRUE" => RawCell::Boolean(true),
            "0" | "false" | "FALSE" => RawCell::Boolean(false),
            _ => RawCell::Empty,
        },
        CellType::Error => RawCell::Error(state.value),
        CellType::IsoDate => match state.value.trim() {
            "" => RawCell::Empty,
            raw => parse_iso_datetime(raw)
                .and_then(|dt| ctx.date_system.to_serial(dt))
                .map(RawCell::date)
                .unwrap_or_else(|| RawCell::Text(raw.to_string())),
        },
        CellType::Number => match state.value.trim() {
            "" => RawCell::Empty,
            raw => raw
                .parse::<f64>()
                .map(|value| RawCell::Number {
                    value,
                    date_formatted: state.date_formatted,
                })
                .unwrap_or(RawCell::Empty),
        },
    }
}

/// Parse the ISO 8601 forms used by `t="d"` cells.
///
/// Offsets are dropped; the wall-clock time is kept as written.
fn parse_iso_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Zero-based column index of a cell reference such as `"AB12"`.
///
/// Saturates at `u32::MAX` for references with too many letters.
fn col_ref_to_index(cell_ref: &str) -> Option<u32> {
    let mut col = 0u32;
    let mut seen = false;
    for b in cell_ref.bytes().take_while(u8::is_ascii_alphabetic) {
        col = col
            .saturating_mul(26)
            .saturating_add(u32::from(b.to_ascii_uppercase() - b'A') + 1);
        seen = true;
    }
    seen.then(|| col - 1)
}
