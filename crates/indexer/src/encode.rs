//! Bulk line-format encoding
//!
//! Each event becomes two newline-terminated JSON lines: a `create` action
//! carrying the destination index, then the source document. Encoding is
//! pure and happens on the caller's task in `process_batch`, before any
//! channel send, so serialization errors surface promptly.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use ship_model::Event;

use crate::error::Error;

/// Source document keys owned by the encoder. Events whose custom fields
/// collide with these fail encoding.
const RESERVED_KEYS: [&str; 4] = [
    "@timestamp",
    "data_stream.type",
    "data_stream.dataset",
    "data_stream.namespace",
];

/// One event encoded into the bulk wire format.
///
/// Both lines are newline-terminated and ready to append to a bulk buffer.
#[derive(Debug, Clone)]
pub struct EncodedItem {
    action: Vec<u8>,
    source: Vec<u8>,
}

impl EncodedItem {
    /// The action line, e.g. `{"create":{"_index":"logs-app-prod"}}\n`.
    pub fn action(&self) -> &[u8] {
        &self.action
    }

    /// The source document line.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Total uncompressed size of both lines.
    pub fn uncompressed_size(&self) -> usize {
        self.action.len() + self.source.len()
    }
}

/// Encode one event into its action and source lines.
///
/// The `@timestamp` field is rendered in RFC3339 UTC with millisecond
/// precision; sub-millisecond digits are truncated, not rounded. The data
/// stream triple is serialized as dotted top-level keys.
pub fn encode(event: &Event) -> Result<EncodedItem, Error> {
    for key in RESERVED_KEYS {
        if event.fields.contains_key(key) {
            return Err(Error::encode(format!("field {key:?} is reserved")));
        }
    }

    let action = json!({"create": {"_index": event.data_stream.index_name()}});
    let mut action = serde_json::to_vec(&action).map_err(|e| Error::encode(e.to_string()))?;
    action.push(b'\n');

    let mut doc = Map::with_capacity(4 + event.fields.len());
    doc.insert(
        "@timestamp".to_owned(),
        Value::String(format_timestamp(event.timestamp)),
    );
    doc.insert(
        "data_stream.type".to_owned(),
        Value::String(event.data_stream.stream_type.clone()),
    );
    doc.insert(
        "data_stream.dataset".to_owned(),
        Value::String(event.data_stream.dataset.clone()),
    );
    doc.insert(
        "data_stream.namespace".to_owned(),
        Value::String(event.data_stream.namespace.clone()),
    );
    for (key, value) in &event.fields {
        doc.insert(key.clone(), value.clone());
    }

    let mut source =
        serde_json::to_vec(&Value::Object(doc)).map_err(|e| Error::encode(e.to_string()))?;
    source.push(b'\n');

    Ok(EncodedItem { action, source })
}

/// RFC3339 with exactly three fractional digits. Sub-millisecond digits
/// are truncated, not rounded.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
#[path = "encode_test.rs"]
mod encode_test;
