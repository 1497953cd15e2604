//! Parsed records and their cell values.

use crate::sources::{DateSystem, RawCell};
use chrono::NaiveDateTime;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// String content.
    Text(String),
    /// Numeric content without date formatting.
    Number(f64),
    /// Boolean content.
    Boolean(bool),
    /// Numeric content the source styles as a date.
    Date(NaiveDateTime),
    /// Absent, error, or unrecognized content.
    #[default]
    Empty,
}

impl CellValue {
    /// Apply the inference rule to a raw cell.
    ///
    /// A number becomes [`CellValue::Date`] only when the source reports date
    /// formatting for it and the serial maps to a real timestamp; otherwise it
    /// stays a [`CellValue::Number`].
    pub fn infer(raw: Option<&RawCell>, date_system: DateSystem) -> Self {
        match raw {
            Some(RawCell::Text(s)) => Self::Text(s.clone()),
            Some(RawCell::Boolean(b)) => Self::Boolean(*b),
            Some(RawCell::Number {
                value,
                date_formatted: true,
            }) => date_system
                .to_datetime(*value)
                .map_or(Self::Number(*value), Self::Date),
            Some(RawCell::Number { value, .. }) => Self::Number(*value),
            Some(RawCell::Error(_) | RawCell::Empty) | None => Self::Empty,
        }
    }

    /// True for [`CellValue::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Date(at) => serializer.collect_str(&at.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::Empty => serializer.serialize_none(),
        }
    }
}

/// One data row, keyed by header name in column order.
///
/// Records are built by [`TabularReader`](crate::core::TabularReader) and are
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, CellValue)>,
}

impl Record {
    /// Build a record from `(header, value)` pairs.
    ///
    /// A repeated header keeps its first position and takes the later value.
    pub fn from_fields<K: Into<String>>(fields: impl IntoIterator<Item = (K, CellValue)>) -> Self {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut record = Self::default();
        for (key, value) in fields {
            let key = key.into();
            match positions.get(&key) {
                Some(&slot) => record.fields[slot].1 = value,
                None => {
                    positions.insert(key.clone(), record.fields.len());
                    record.fields.push((key, value));
                }
            }
        }
        record
    }

    /// Wrap fields whose keys are already unique.
    pub(crate) fn from_unique(fields: Vec<(String, CellValue)>) -> Self {
        Self { fields }
    }

    /// Look up a field by header name.
    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Header names in column order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// `(header, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// All data rows from one read of the source, in file order.
///
/// Cloning is cheap: the records live behind an `Arc` and are never mutated.
/// A re-read produces a new `RecordSet` rather than changing an existing one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    records: Arc<[Record]>,
}

impl RecordSet {
    /// Wrap parsed records.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// An empty record set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Records in file row order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Iterate the records.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no data rows were read.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize to the JSON body served by the pull endpoint.
    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::error::SheetError::Other(format!("Failed to serialize records: {}", e)))
    }
}

impl Serialize for RecordSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.records.iter())
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
