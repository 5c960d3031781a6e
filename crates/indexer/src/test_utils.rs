//! Test support: a mock bulk transport and payload decoding helpers.
//!
//! The mock mirrors a real bulk endpoint closely enough for integration
//! tests: it decodes the (optionally gzipped) newline-delimited payload
//! into action/source pairs and hands them to a response handler. Gating
//! and latency hooks let tests hold flushes in flight or simulate a slow
//! downstream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::Error;
use crate::transport::{
    BulkItemDetail, BulkItemError, BulkRequest, BulkResponse, BulkResponseBody, BulkTransport,
};

/// One decoded action/source pair from a bulk payload.
#[derive(Debug, Clone)]
pub struct BulkDoc {
    /// The action line, e.g. `{"create":{"_index":"..."}}`.
    pub action: Value,
    /// The source document.
    pub source: Value,
}

/// A decoded bulk request.
#[derive(Debug, Clone)]
pub struct BulkPayload {
    pub docs: Vec<BulkDoc>,
    pub compressed: bool,
}

/// Decode a bulk request body into action/source pairs, gunzipping when
/// the request is compressed. Panics on malformed payloads; this is test
/// support.
pub fn decode_bulk_request(request: &BulkRequest) -> BulkPayload {
    let raw: Vec<u8> = if request.compressed {
        use std::io::Read;
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&request.body[..])
            .read_to_end(&mut decoded)
            .expect("bulk payload must be valid gzip");
        decoded
    } else {
        request.body.to_vec()
    };

    let mut docs = Vec::new();
    let mut lines = raw
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty());
    while let Some(action) = lines.next() {
        let source = lines.next().expect("action line without source line");
        docs.push(BulkDoc {
            action: serde_json::from_slice(action).expect("action line must be JSON"),
            source: serde_json::from_slice(source).expect("source line must be JSON"),
        });
    }
    BulkPayload {
        docs,
        compressed: request.compressed,
    }
}

/// Build a per-item detail for [`items_response`].
pub fn item(status: u16, error: Option<(&str, &str)>) -> BulkItemDetail {
    BulkItemDetail {
        status,
        error: error.map(|(kind, reason)| BulkItemError {
            kind: kind.to_owned(),
            reason: reason.to_owned(),
        }),
    }
}

/// Build a 200 response whose body reports the given per-item details
/// under the `create` action. `errors` is set when any item is >= 400.
pub fn items_response(details: Vec<BulkItemDetail>) -> BulkResponse {
    let has_errors = details.iter().any(|d| d.status >= 400);
    let body = BulkResponseBody {
        has_errors,
        items: details
            .into_iter()
            .map(|detail| {
                let mut item = std::collections::HashMap::new();
                item.insert("create".to_owned(), detail);
                item
            })
            .collect(),
    };
    BulkResponse {
        status: StatusCode::OK,
        body: Bytes::from(serde_json::to_vec(&body).expect("response body serializes")),
    }
}

/// Build a full-success response: one `201` per decoded doc.
pub fn ok_response(payload: &BulkPayload) -> BulkResponse {
    items_response(payload.docs.iter().map(|_| item(201, None)).collect())
}

/// Build an empty-bodied response with an arbitrary status.
pub fn status_response(status: StatusCode) -> BulkResponse {
    BulkResponse {
        status,
        body: Bytes::new(),
    }
}

/// Request counters shared between a test and the indexer-owned mock.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub requests: AtomicU64,
    pub bytes_total: AtomicU64,
}

impl TransportStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }
}

type Handler = dyn Fn(&BulkPayload) -> BulkResponse + Send + Sync;

/// A scriptable in-memory bulk transport.
pub struct MockTransport {
    handler: Box<Handler>,
    latency: Duration,
    gate: Option<Arc<Semaphore>>,
    started: Option<async_channel::Sender<()>>,
    stats: Arc<TransportStats>,
}

impl MockTransport {
    /// A transport that answers every request with per-item successes.
    pub fn success() -> Self {
        Self::new(ok_response)
    }

    /// A transport driven by the given response handler.
    pub fn new(handler: impl Fn(&BulkPayload) -> BulkResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            gate: None,
            started: None,
            stats: Arc::new(TransportStats::default()),
        }
    }

    /// Sleep this long before answering, simulating a slow downstream.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Hold every request until a permit is added to the semaphore. A
    /// semaphore that never receives permits models a downstream that
    /// never replies.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Send `()` on this channel as each request arrives, before any
    /// gate or latency.
    #[must_use]
    pub fn with_started_channel(mut self, started: async_channel::Sender<()>) -> Self {
        self.started = Some(started);
        self
    }

    /// Shared counters, valid after the transport moves into the indexer.
    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl BulkTransport for MockTransport {
    async fn send_bulk(&self, request: BulkRequest) -> Result<BulkResponse, Error> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_total
            .fetch_add(request.body.len() as u64, Ordering::Relaxed);

        if let Some(started) = &self.started {
            let _ = started.send(()).await;
        }
        if let Some(gate) = &self.gate {
            // A closed gate releases all requests.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let payload = decode_bulk_request(&request);
        Ok((self.handler)(&payload))
    }
}
