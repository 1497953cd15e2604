//! Header inference and row-to-record conversion.

use crate::core::record::{CellValue, Record, RecordSet};
use crate::error::{Result, SheetError};
use crate::sources::{DateSystem, RawCell, Sheet, SheetSource};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do with columns whose header cell is missing or blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPolicy {
    /// Keep the column under the empty-string key, logging a warning.
    #[default]
    KeepAnonymous,
    /// Leave the column out of every record.
    DropAnonymous,
}

/// Turns the first worksheet of a file into a [`RecordSet`].
///
/// Row 0 is the header row. Every later row that is absent or entirely blank
/// is skipped; every other row becomes one [`Record`] keyed by the headers.
/// Parsing is synchronous and keeps no state between calls.
///
/// # Examples
///
/// ```rust,no_run
/// use sheetwatch::core::{HeaderPolicy, TabularReader};
/// use sheetwatch::sources::XlsxSource;
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let reader = TabularReader::new(Arc::new(XlsxSource::new()), HeaderPolicy::default());
/// let records = reader.parse(Path::new("data/records.xlsx"))?;
/// println!("{} records", records.len());
/// # Ok::<(), sheetwatch::error::SheetError>(())
/// ```
#[derive(Clone)]
pub struct TabularReader {
    source: Arc<dyn SheetSource>,
    headers: HeaderPolicy,
}

impl TabularReader {
    /// Create a reader over `source`.
    pub fn new(source: Arc<dyn SheetSource>, headers: HeaderPolicy) -> Self {
        Self { source, headers }
    }

    /// The header policy in effect.
    pub fn header_policy(&self) -> HeaderPolicy {
        self.headers
    }

    /// Read and convert the file at `path`.
    ///
    /// # Errors
    ///
    /// - `SourceUnreadable` if the source cannot be opened or decoded
    /// - `SourceFormatInvalid` if there is no worksheet or the header row is
    ///   absent or blank
    pub fn parse(&self, path: &Path) -> Result<RecordSet> {
        let sheet = self.source.read_sheet(path)?;
        let records = self.convert(&sheet).map_err(|reason| {
            SheetError::SourceFormatInvalid(format!("{}: {}", path.display(), reason))
        })?;

        debug!(
            path = %path.display(),
            source = %self.source.name(),
            rows = records.len(),
            "parsed sheet"
        );
        Ok(records)
    }

    fn convert(&self, sheet: &Sheet) -> std::result::Result<RecordSet, &'static str> {
        let header_row = sheet.row(0).ok_or("no header row")?;
        if header_row.iter().all(RawCell::is_blank) {
            return Err("header row is blank");
        }

        let headers: Vec<String> = header_row.iter().map(header_text).collect();

        // One width per sheet so every record carries the same keys
        let data_rows: Vec<(&[RawCell], usize)> = sheet
            .rows()
            .filter(|(index, _)| *index > 0)
            .filter_map(|(_, cells)| {
                let last_populated = cells.iter().rposition(|c| !c.is_blank())?;
                Some((cells, last_populated + 1))
            })
            .collect();
        let width = data_rows
            .iter()
            .map(|(_, populated)| *populated)
            .fold(headers.len(), usize::max);

        let plan = ColumnPlan::new(&headers, width, self.headers);
        let records: Vec<Record> = data_rows
            .iter()
            .map(|(cells, _)| plan.build(cells, sheet.date_system()))
            .collect();

        if !records.is_empty() {
            if plan.anonymous_seen {
                warn!(
                    policy = ?self.headers,
                    "sheet has columns without a header name"
                );
            }
            if plan.duplicate_seen {
                warn!("sheet has repeated header names; later columns overwrite earlier ones");
            }
        }

        Ok(RecordSet::new(records))
    }
}

/// Column to key mapping shared by every row of a sheet.
struct ColumnPlan {
    keys: Vec<String>,
    /// Key slot per column; `None` for dropped columns.
    slots: Vec<Option<usize>>,
    anonymous_seen: bool,
    duplicate_seen: bool,
}

impl ColumnPlan {
    fn new(headers: &[String], width: usize, policy: HeaderPolicy) -> Self {
        let mut keys: Vec<String> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut slots = Vec::with_capacity(width);
        let mut anonymous_seen = false;
        let mut duplicate_seen = false;

        for col in 0..width {
            let header = headers.get(col).map(String::as_str).unwrap_or("");
            if header.is_empty() {
                anonymous_seen = true;
                if policy == HeaderPolicy::DropAnonymous {
                    slots.push(None);
                    continue;
                }
            }
            let slot = match positions.get(header) {
                Some(&slot) => {
                    duplicate_seen = true;
                    slot
                }
                None => {
                    positions.insert(header, keys.len());
                    keys.push(header.to_string());
                    keys.len() - 1
                }
            };
            slots.push(Some(slot));
        }

        Self {
            keys,
            slots,
            anonymous_seen,
            duplicate_seen,
        }
    }

    fn build(&self, cells: &[RawCell], date_system: DateSystem) -> Record {
        let mut values = vec![CellValue::Empty; self.keys.len()];
        for (col, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                // Later columns overwrite earlier ones sharing a key
                values[*slot] = CellValue::infer(cells.get(col), date_system);
            }
        }
        Record::from_unique(self.keys.iter().cloned().zip(values).collect())
    }
}

fn header_text(cell: &RawCell) -> String {
    match cell {
        RawCell::Text(s) => s.trim().to_string(),
        RawCell::Number { value, .. } => value.to_string(),
        RawCell::Boolean(b) => String::from(if *b { "TRUE" } else { "FALSE" }),
        RawCell::Error(_) | RawCell::Empty => String::new(),
    }
}
