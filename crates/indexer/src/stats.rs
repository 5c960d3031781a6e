//! Indexer statistics
//!
//! Atomic counters updated from `process_batch` and from flush completion,
//! exposed via a point-in-time snapshot. The snapshot is not linearizable
//! across fields, but no field is ever double-counted.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for the indexing pipeline.
#[derive(Debug, Default)]
pub(crate) struct IndexerMetrics {
    /// Events successfully enqueued via `process_batch`.
    added: AtomicU64,

    /// Bulk requests sent to the transport.
    bulk_requests: AtomicU64,

    /// Events that failed indexing (per-item failures plus whole flushes
    /// that errored).
    failed: AtomicU64,

    /// Events successfully indexed.
    indexed: AtomicU64,

    /// Events rejected with HTTP 429, per item or per flush.
    too_many_requests: AtomicU64,

    /// Compressed payload bytes handed to the transport.
    bytes_total: AtomicU64,

    /// Currently running active indexers.
    indexers_active: AtomicU64,

    /// Active indexers created by the scaling controller.
    indexers_created: AtomicU64,

    /// Active indexers destroyed by the scaling controller.
    indexers_destroyed: AtomicU64,
}

impl IndexerMetrics {
    pub(crate) const fn new() -> Self {
        Self {
            added: AtomicU64::new(0),
            bulk_requests: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            indexed: AtomicU64::new(0),
            too_many_requests: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            indexers_active: AtomicU64::new(0),
            indexers_created: AtomicU64::new(0),
            indexers_destroyed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_added(&self, count: u64) {
        self.added.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_bulk_request(&self) {
        self.bulk_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_indexed(&self, count: u64) {
        self.indexed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_too_many_requests(&self, count: u64) {
        self.too_many_requests.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_bytes(&self, count: u64) {
        self.bytes_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_indexer_started(&self) {
        self.indexers_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_indexer_stopped(&self) {
        self.indexers_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_indexer_created(&self) {
        self.indexers_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_indexer_destroyed(&self) {
        self.indexers_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters. `available_bulk_requests` is the current
    /// length of the free buffer list, read by the caller.
    pub(crate) fn snapshot(&self, available_bulk_requests: u64) -> Stats {
        let added = self.added.load(Ordering::Relaxed);
        let indexed = self.indexed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        Stats {
            added,
            active: added.saturating_sub(indexed + failed),
            bulk_requests: self.bulk_requests.load(Ordering::Relaxed),
            failed,
            indexed,
            too_many_requests: self.too_many_requests.load(Ordering::Relaxed),
            available_bulk_requests,
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            indexers_active: self.indexers_active.load(Ordering::Relaxed),
            indexers_created: self.indexers_created.load(Ordering::Relaxed),
            indexers_destroyed: self.indexers_destroyed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of indexer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Events successfully enqueued via `process_batch`.
    pub added: u64,

    /// Events enqueued but not yet indexed or failed
    /// (`added - indexed - failed`).
    pub active: u64,

    /// Bulk requests sent to the transport.
    pub bulk_requests: u64,

    /// Events that failed indexing.
    pub failed: u64,

    /// Events successfully indexed.
    pub indexed: u64,

    /// Events rejected with HTTP 429.
    pub too_many_requests: u64,

    /// Bulk buffers currently on the free list.
    pub available_bulk_requests: u64,

    /// Compressed payload bytes handed to the transport.
    pub bytes_total: u64,

    /// Currently running active indexers.
    pub indexers_active: u64,

    /// Active indexers created by the scaling controller.
    pub indexers_created: u64,

    /// Active indexers destroyed by the scaling controller.
    pub indexers_destroyed: u64,
}

#[cfg(test)]
#[path = "stats_test.rs"]
mod stats_test;
