//! Active indexer task
//!
//! Each active indexer consumes encoded items from the pool's shared
//! inbox into one bulk buffer, flushing when the payload reaches the byte
//! threshold or when the oldest buffered item reaches the flush interval.
//! A flush detaches the sealed buffer into its own task so the indexer
//! keeps consuming while the bulk request is in flight; the free buffer
//! list caps how many flushes can be in flight at once.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::Instrument;

use crate::buffer::BulkBuffer;
use crate::error::Error;
use crate::pool::PoolInner;
use crate::transport::BulkRequest;

/// Idle sleep used when no flush deadline is armed; the branch is
/// disabled in that state, the value only keeps the timer future valid.
const FAR_FUTURE: Duration = Duration::from_secs(3600);

pub(crate) struct ActiveIndexer {
    id: u64,
    inner: Arc<PoolInner>,
    stop: oneshot::Receiver<()>,
}

impl ActiveIndexer {
    pub(crate) fn new(id: u64, inner: Arc<PoolInner>, stop: oneshot::Receiver<()>) -> Self {
        Self { id, inner, stop }
    }

    pub(crate) async fn run(self) {
        let Self { id, inner, mut stop } = self;
        tracing::debug!(indexer_id = id, "active indexer started");

        let flush_bytes = inner.config.flush_bytes;
        let flush_interval = inner.config.flush_interval;

        // The buffer is acquired lazily on the first item so an idle
        // indexer holds nothing back from the pool.
        let mut buffer: Option<BulkBuffer> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            let timer_at = deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE);
            tokio::select! {
                _ = &mut stop => break,
                recv = inner.items_rx.recv() => {
                    let item = match recv {
                        Ok(item) => item,
                        // Closed and fully drained: shut down.
                        Err(_) => break,
                    };
                    if buffer.is_none() {
                        buffer = Some(acquire_buffer(&inner).await);
                    }
                    let Some(buf) = buffer.as_mut() else { continue };
                    let first_item = buf.is_empty();
                    if let Err(error) = buf.append(&item) {
                        tracing::error!(indexer_id = id, %error, "failed to buffer event");
                        inner.metrics.record_failed(1);
                        continue;
                    }
                    if first_item {
                        deadline = Some(Instant::now() + flush_interval);
                    }
                    if buf.size() >= flush_bytes {
                        if let Some(full) = buffer.take() {
                            spawn_flush(&inner, full);
                        }
                        deadline = None;
                    }
                }
                _ = tokio::time::sleep_until(timer_at), if deadline.is_some() => {
                    if let Some(buf) = buffer.take() {
                        if buf.is_empty() {
                            let _ = inner.free_tx.send(buf).await;
                        } else {
                            spawn_flush(&inner, buf);
                        }
                    }
                    deadline = None;
                }
            }
        }

        // Stopped by the scaling controller or by close: flush whatever
        // is pending once, then exit. Remaining inbox items are picked up
        // by the surviving indexers (or were drained above on close).
        if let Some(buf) = buffer.take() {
            if buf.is_empty() {
                let _ = inner.free_tx.send(buf).await;
            } else {
                spawn_flush(&inner, buf);
            }
        }

        inner.metrics.record_indexer_stopped();
        tracing::debug!(indexer_id = id, "active indexer stopped");
    }
}

/// Take a buffer from the free list, waiting when all buffers are tied
/// up in in-flight flushes. The wait is recorded as a pressure signal
/// for the scaling controller.
async fn acquire_buffer(inner: &Arc<PoolInner>) -> BulkBuffer {
    match inner.free_rx.try_recv() {
        Ok(buf) => buf,
        Err(_) => {
            inner.buffer_waits.fetch_add(1, Ordering::Relaxed);
            match inner.free_rx.recv().await {
                Ok(buf) => buf,
                // The pool holds a sender for the free list, so it only
                // reports closed if the pool itself is gone.
                Err(_) => BulkBuffer::new(inner.config.compression_level),
            }
        }
    }
}

/// Detach a full buffer into its own flush task and keep consuming.
fn spawn_flush(inner: &Arc<PoolInner>, buffer: BulkBuffer) {
    let span = tracing::info_span!(
        "flush",
        items = buffer.items(),
        bytes_uncompressed = buffer.raw_bytes()
    );
    let guard = inner.task_guard();
    let inner = Arc::clone(inner);
    tokio::spawn(
        async move {
            let _guard = guard;
            run_flush(inner, buffer).await;
        }
        .instrument(span),
    );
}

async fn run_flush(inner: Arc<PoolInner>, mut buffer: BulkBuffer) {
    if let Err(error) = flush_buffer(&inner, &mut buffer).await {
        tracing::error!(%error, "bulk flush failed");
        inner.record_flush_error(error);
    }
    buffer.reset();
    // Cannot block: the free list capacity equals the number of buffers
    // in existence.
    let _ = inner.free_tx.send(buffer).await;
}

async fn flush_buffer(inner: &PoolInner, buffer: &mut BulkBuffer) -> Result<(), Error> {
    let items = buffer.items() as u64;
    if items == 0 {
        return Ok(());
    }
    if let Err(error) = buffer.seal() {
        inner.metrics.record_failed(items);
        inner.record_flush_outcome(items, 0);
        return Err(error.into());
    }
    let body = buffer.take_payload();
    let body_len = body.len() as u64;

    let request = BulkRequest {
        body,
        items: items as usize,
        compressed: inner.config.compression_level.is_enabled(),
    };

    let span = tracing::info_span!(
        "elasticsearch_bulk",
        otel.name = "Elasticsearch: POST _bulk",
        db.system = "elasticsearch",
        outcome = tracing::field::Empty,
    );
    let result = inner
        .transport
        .send_bulk(request)
        .instrument(span.clone())
        .await;

    // Requests are counted on completion, so stats never report a bulk
    // request that is still in flight.
    inner.metrics.record_bulk_request();
    let response = match result {
        Ok(response) => response,
        Err(error) => {
            span.record("outcome", "failure");
            inner.metrics.record_failed(items);
            inner.record_flush_outcome(items, 0);
            return Err(error);
        }
    };
    inner.metrics.record_bytes(body_len);
    let outcome = if response.status.is_success() {
        "success"
    } else {
        "failure"
    };
    span.record("outcome", outcome);

    if !response.status.is_success() {
        inner.metrics.record_failed(items);
        let throttled = if response.status == StatusCode::TOO_MANY_REQUESTS {
            inner.metrics.record_too_many_requests(items);
            items
        } else {
            0
        };
        inner.record_flush_outcome(items, throttled);
        return Err(Error::Flush {
            status: response.status,
            body: response.body,
        });
    }

    let parsed = match response.parse_body() {
        Ok(parsed) => parsed,
        Err(error) => {
            inner.metrics.record_failed(items);
            inner.record_flush_outcome(items, 0);
            return Err(error);
        }
    };

    let mut failed = 0u64;
    let mut throttled = 0u64;
    if parsed.has_errors {
        for item in &parsed.items {
            for detail in item.values() {
                if detail.status >= 400 {
                    failed += 1;
                    if detail.status == StatusCode::TOO_MANY_REQUESTS.as_u16() {
                        throttled += 1;
                    }
                    let (kind, reason) = match &detail.error {
                        Some(error) => (error.kind.as_str(), error.reason.as_str()),
                        None => ("", ""),
                    };
                    inner.limiter.log_failed_item(kind, reason);
                }
            }
        }
    }

    let indexed = items.saturating_sub(failed);
    inner.metrics.record_indexed(indexed);
    if failed > 0 {
        inner.metrics.record_failed(failed);
    }
    if throttled > 0 {
        inner.metrics.record_too_many_requests(throttled);
    }
    inner.record_flush_outcome(items, throttled);

    tracing::debug!(
        items,
        indexed,
        failed,
        status = response.status.as_u16(),
        "bulk request completed"
    );
    Ok(())
}
