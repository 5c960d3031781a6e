//! Event and data stream types
//!
//! An event is immutable after intake: the pipeline never mutates it, only
//! encodes it into the bulk wire format.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// The (type, dataset, namespace) triple that determines where an event
/// is indexed.
///
/// The destination index name is `"<type>-<dataset>-<namespace>"`, e.g.
/// `logs-app_server-production`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataStream {
    /// Data stream type, e.g. `logs`, `metrics`, `traces`.
    pub stream_type: String,

    /// Dataset within the type, typically the producing service.
    pub dataset: String,

    /// Namespace, typically the deployment environment.
    pub namespace: String,
}

impl DataStream {
    /// Create a new data stream triple.
    pub fn new(
        stream_type: impl Into<String>,
        dataset: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            stream_type: stream_type.into(),
            dataset: dataset.into(),
            namespace: namespace.into(),
        }
    }

    /// The destination index name: `"<type>-<dataset>-<namespace>"`.
    pub fn index_name(&self) -> String {
        format!("{}-{}-{}", self.stream_type, self.dataset, self.namespace)
    }
}

/// A single APM event.
///
/// `fields` is the opaque document body: its entries are merged into the
/// source document at top level alongside `@timestamp` and the
/// `data_stream.*` keys.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event timestamp. Serialized as `@timestamp` in RFC3339 with
    /// millisecond precision (sub-millisecond digits are truncated).
    pub timestamp: DateTime<Utc>,

    /// Destination data stream.
    pub data_stream: DataStream,

    /// Event-specific document fields.
    pub fields: Map<String, Value>,
}

impl Event {
    /// Create an event with an empty document body.
    pub fn new(timestamp: DateTime<Utc>, data_stream: DataStream) -> Self {
        Self {
            timestamp,
            data_stream,
            fields: Map::new(),
        }
    }

    /// Add a document field, builder-style.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod event_test;
