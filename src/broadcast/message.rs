//! Broadcast payloads.

use crate::core::RecordSet;
use crate::error::{Result, SheetError};
use serde::Serialize;

/// Body of a broadcast.
///
/// Serializes untagged: a record set becomes a JSON array of objects and text
/// becomes a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// A complete read of the watched sheet.
    Records(RecordSet),
    /// A free-form message.
    Text(String),
}

impl Payload {
    /// Serialize to the JSON sent over the wire.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SheetError::Other(format!("Failed to serialize payload: {}", e)))
    }

    /// The record set, if this payload carries one.
    pub fn records(&self) -> Option<&RecordSet> {
        match self {
            Self::Records(records) => Some(records),
            Self::Text(_) => None,
        }
    }

    /// The text, if this payload carries one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Records(_) => None,
            Self::Text(text) => Some(text),
        }
    }
}

/// A payload addressed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Destination topic.
    pub topic: String,
    /// What is being delivered.
    pub payload: Payload,
}

impl Message {
    /// Create a message.
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}
