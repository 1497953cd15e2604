//! Sheet source trait and the raw grid it produces.

use crate::error::Result;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::collections::BTreeMap;
use std::path::Path;

/// Trait for tabular sources.
///
/// Implement this trait to read other spreadsheet formats. A source returns
/// the first worksheet of the file as raw cells; header detection and type
/// inference happen in [`TabularReader`](crate::core::TabularReader).
///
/// Implementations open the file read-only on every call and keep no state
/// between calls, so the same source can serve concurrent reads.
pub trait SheetSource: Send + Sync {
    /// Read the first worksheet of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceUnreadable`](crate::error::SheetError::SourceUnreadable)
    /// when the file cannot be opened or decoded, and
    /// [`SourceFormatInvalid`](crate::error::SheetError::SourceFormatInvalid)
    /// when it decodes but contains no worksheet.
    fn read_sheet(&self, path: &Path) -> Result<Sheet>;

    /// Get a human-readable name for this source (for logging/debugging).
    fn name(&self) -> String;
}

/// Epoch used to interpret date serial numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateSystem {
    /// Serial 1 is 1900-01-01, including the phantom 1900-02-29.
    #[default]
    Excel1900,
    /// Serial 0 is 1904-01-01.
    Excel1904,
}

impl DateSystem {
    /// Convert a date serial into a timestamp.
    ///
    /// Returns `None` for negative or out-of-range serials.
    pub fn to_datetime(self, serial: f64) -> Option<NaiveDateTime> {
        if !serial.is_finite() || serial < 0.0 {
            return None;
        }

        let days = serial.trunc() as i64;
        let millis = ((serial - serial.trunc()) * 86_400_000.0).round() as i64;

        let epoch = match self {
            Self::Excel1904 => NaiveDate::from_ymd_opt(1904, 1, 1)?,
            // Serials below 60 predate the phantom leap day.
            Self::Excel1900 if days < 60 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
            Self::Excel1900 => NaiveDate::from_ymd_opt(1899, 12, 30)?,
        };

        epoch
            .and_hms_opt(0, 0, 0)?
            .checked_add_signed(TimeDelta::try_days(days)?)?
            .checked_add_signed(TimeDelta::try_milliseconds(millis)?)
    }

    /// Convert a timestamp into a date serial. Inverse of [`to_datetime`](Self::to_datetime).
    ///
    /// Returns `None` for timestamps before the epoch.
    pub fn to_serial(self, datetime: NaiveDateTime) -> Option<f64> {
        let leap_day_end = NaiveDate::from_ymd_opt(1900, 3, 1)?;
        let epoch = match self {
            Self::Excel1904 => NaiveDate::from_ymd_opt(1904, 1, 1)?,
            Self::Excel1900 if datetime.date() < leap_day_end => {
                NaiveDate::from_ymd_opt(1899, 12, 31)?
            }
            Self::Excel1900 => NaiveDate::from_ymd_opt(1899, 12, 30)?,
        };

        let millis = datetime
            .signed_duration_since(epoch.and_hms_opt(0, 0, 0)?)
            .num_milliseconds();
        (millis >= 0).then(|| millis as f64 / 86_400_000.0)
    }
}

/// A single cell as reported by the source, before inference.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawCell {
    /// No value.
    #[default]
    Empty,
    /// String content.
    Text(String),
    /// Numeric content, with whether the cell's number format is a date format.
    Number {
        /// The stored number
        value: f64,
        /// True when the source styles this cell as a date
        date_formatted: bool,
    },
    /// Boolean content.
    Boolean(bool),
    /// An error value such as `#DIV/0!`.
    Error(String),
}

impl RawCell {
    /// Plain numeric cell.
    pub fn number(value: f64) -> Self {
        Self::Number {
            value,
            date_formatted: false,
        }
    }

    /// Numeric cell with date formatting.
    pub fn date(serial: f64) -> Self {
        Self::Number {
            value: serial,
            date_formatted: true,
        }
    }

    /// Text cell.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// True when the cell carries nothing a reader would show.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// The first worksheet of a workbook as sparse rows.
///
/// Rows are keyed by zero-based index; rows absent from the file are simply
/// missing from the map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    rows: BTreeMap<u32, Vec<RawCell>>,
    date_system: DateSystem,
}

impl Sheet {
    /// Create an empty sheet using the given date system.
    pub fn new(date_system: DateSystem) -> Self {
        Self {
            rows: BTreeMap::new(),
            date_system,
        }
    }

    /// Add a row at a zero-based index, replacing any existing row there.
    pub fn with_row(mut self, index: u32, cells: Vec<RawCell>) -> Self {
        self.insert_row(index, cells);
        self
    }

    /// Insert a row at a zero-based index, replacing any existing row there.
    pub fn insert_row(&mut self, index: u32, cells: Vec<RawCell>) {
        self.rows.insert(index, cells);
    }

    /// Get a row by zero-based index.
    pub fn row(&self, index: u32) -> Option<&[RawCell]> {
        self.rows.get(&index).map(Vec::as_slice)
    }

    /// Iterate rows in ascending index order.
    pub fn rows(&self) -> impl Iterator<Item = (u32, &[RawCell])> {
        self.rows.iter().map(|(index, cells)| (*index, cells.as_slice()))
    }

    /// Number of rows present in the file.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The date system used to interpret date serials.
    pub fn date_system(&self) -> DateSystem {
        self.date_system
    }
}
