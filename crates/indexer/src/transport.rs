//! Bulk transport boundary
//!
//! The indexer core never speaks HTTP itself: it hands finalized bulk
//! payloads to a [`BulkTransport`] and interprets the structured response.
//! Concrete transports own connection pooling, authentication, TLS, and
//! any retry policy; the core's accounting reflects terminal outcomes
//! only.

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Header every transport must attach to bulk requests.
pub const PRODUCT_ORIGIN_HEADER: &str = "X-Elastic-Product-Origin";

/// Value for [`PRODUCT_ORIGIN_HEADER`].
pub const PRODUCT_ORIGIN_VALUE: &str = "observability";

/// A finalized bulk request ready to send.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    /// The framed payload: newline-delimited action/source line pairs,
    /// gzip-encoded when `compressed` is set.
    pub body: Bytes,

    /// Number of items in the payload.
    pub items: usize,

    /// Whether `body` is gzip-encoded; transports must set
    /// `Content-Encoding: gzip` accordingly.
    pub compressed: bool,
}

/// An HTTP-shaped response to a bulk request.
#[derive(Debug, Clone)]
pub struct BulkResponse {
    /// HTTP status.
    pub status: StatusCode,

    /// Raw response body. For 2xx responses this is the JSON bulk result;
    /// for errors it is surfaced verbatim in the flush error.
    pub body: Bytes,
}

impl BulkResponse {
    /// Parse the body as a bulk result. Unknown fields (e.g.
    /// `ingest_took`) are ignored; a body without `errors` or `items`
    /// parses as a full success.
    pub fn parse_body(&self) -> Result<BulkResponseBody, Error> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Transport(format!("failed to decode bulk response: {e}")))
    }
}

/// Structured bulk result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkResponseBody {
    /// Whether any item carries a non-success status.
    #[serde(rename = "errors", default)]
    pub has_errors: bool,

    /// Per-item results, keyed by action (`create`).
    #[serde(default)]
    pub items: Vec<BulkResponseItem>,
}

/// One per-item result: a single-key map from action name to detail.
pub type BulkResponseItem = std::collections::HashMap<String, BulkItemDetail>;

/// Status and optional error for one item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkItemDetail {
    /// HTTP-style status for this item.
    #[serde(default)]
    pub status: u16,

    /// Error detail, present when the item failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

/// Error detail for a failed item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Error classification, e.g. `mapper_parsing_exception`.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Human-readable reason.
    #[serde(default)]
    pub reason: String,
}

/// Sends finalized bulk payloads to the downstream store.
///
/// Implementations must attach the
/// [`PRODUCT_ORIGIN_HEADER`]`: `[`PRODUCT_ORIGIN_VALUE`] header and set
/// `Content-Encoding: gzip` when the request is compressed. A transport
/// may retry transient failures internally (typically 429); whatever it
/// ultimately returns is accounted as the terminal outcome.
#[async_trait]
pub trait BulkTransport: Send + Sync {
    /// Send one bulk request and return the downstream response.
    async fn send_bulk(&self, request: BulkRequest) -> Result<BulkResponse, Error>;
}
