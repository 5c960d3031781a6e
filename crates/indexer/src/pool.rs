//! Indexer pool and public facade
//!
//! The pool owns the shared event channel, the free list of bulk buffers,
//! and the set of active indexer tasks. The free list doubles as the
//! capacity gate: buffers are created once at construction and recycled,
//! so in-flight bulk requests can never exceed `max_bulk_requests`, and
//! memory is bounded by the channel capacity plus
//! `max_bulk_requests x flush_bytes`.
//!
//! ```text
//! process_batch --encode--> [items channel] --> [active indexers] --flush--> transport
//!                                                     ^    |
//!                                             [free buffer list]
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use ship_model::Batch;

use crate::buffer::BulkBuffer;
use crate::config::Config;
use crate::encode::{encode, EncodedItem};
use crate::error::Error;
use crate::limiter::LogLimiter;
use crate::scaling::ScalingController;
use crate::stats::{IndexerMetrics, Stats};
use crate::transport::BulkTransport;
use crate::worker::ActiveIndexer;

// =============================================================================
// Shared pool state
// =============================================================================

pub(crate) struct PoolInner {
    pub(crate) config: Config,
    pub(crate) transport: Arc<dyn BulkTransport>,

    /// Shared inbox of encoded items. Every active indexer consumes from
    /// this one channel, so scale events only add or remove consumers.
    pub(crate) items_tx: async_channel::Sender<EncodedItem>,
    pub(crate) items_rx: async_channel::Receiver<EncodedItem>,

    /// Free list of bulk buffers. Its length is the
    /// `available_bulk_requests` statistic.
    pub(crate) free_tx: async_channel::Sender<BulkBuffer>,
    pub(crate) free_rx: async_channel::Receiver<BulkBuffer>,

    pub(crate) metrics: IndexerMetrics,
    pub(crate) limiter: LogLimiter,

    /// Set once by `close`; checked on the `process_batch` fast path.
    pub(crate) closed: AtomicBool,

    /// Broadcasts the closed transition to the scaling controller.
    pub(crate) shutdown_tx: watch::Sender<bool>,

    /// Effective CPU count for the active indexer limit. Mutable at
    /// runtime via `Indexer::set_cpu_count`.
    pub(crate) cpu_count: AtomicUsize,

    /// Incremented whenever an indexer had to wait for a free buffer;
    /// drained by the scaling controller as a pressure signal.
    pub(crate) buffer_waits: AtomicU64,

    /// Decayed window of recently processed and throttled items, feeding
    /// the 429-rate downscale signal.
    recent_docs: AtomicU64,
    recent_throttled: AtomicU64,

    /// First flush error observed; surfaced by `close`.
    first_flush_error: Mutex<Option<Error>>,

    /// Live task count (active indexers, in-flight flushes, scaling
    /// controller). `close` waits for it to reach zero.
    pub(crate) tasks: Arc<watch::Sender<usize>>,

    workers: Mutex<WorkerRegistry>,
}

#[derive(Default)]
struct WorkerRegistry {
    next_id: u64,
    stops: Vec<(u64, oneshot::Sender<()>)>,
}

impl PoolInner {
    pub(crate) fn task_guard(&self) -> TaskGuard {
        TaskGuard::new(Arc::clone(&self.tasks))
    }

    /// Spawn one active indexer. `scaled` marks creations performed by
    /// the scaling controller, which are the only ones counted in
    /// `indexers_created`.
    pub(crate) fn spawn_worker(self: &Arc<Self>, scaled: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let id = {
            let mut registry = self.workers.lock();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.stops.push((id, stop_tx));
            id
        };
        self.metrics.record_indexer_started();
        if scaled {
            self.metrics.record_indexer_created();
        }
        let guard = self.task_guard();
        let worker = ActiveIndexer::new(id, Arc::clone(self), stop_rx);
        tokio::spawn(async move {
            let _guard = guard;
            worker.run().await;
        });
    }

    /// Signal the most recently started indexer to flush and stop.
    /// Returns whether one was signaled; `indexers_destroyed` counts
    /// successful signals.
    pub(crate) fn stop_worker(&self) -> bool {
        let entry = self.workers.lock().stops.pop();
        match entry {
            Some((id, stop)) => {
                if stop.send(()).is_ok() {
                    self.metrics.record_indexer_destroyed();
                    tracing::debug!(indexer_id = id, "stopping active indexer");
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Number of indexers started and not yet signaled to stop. The
    /// scaling controller decides against this count rather than
    /// `indexers_active`, which lags while stopped workers drain.
    pub(crate) fn worker_count(&self) -> u64 {
        self.workers.lock().stops.len() as u64
    }

    /// Maximum concurrent active indexers: `max(1, cpus / 4)`.
    pub(crate) fn active_limit(&self) -> u64 {
        let cpus = self.cpu_count.load(Ordering::Relaxed) as u64;
        (cpus / 4).max(1)
    }

    pub(crate) fn record_flush_error(&self, error: Error) {
        let mut slot = self.first_flush_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub(crate) fn record_flush_outcome(&self, docs: u64, throttled: u64) {
        self.recent_docs.fetch_add(docs, Ordering::Relaxed);
        self.recent_throttled.fetch_add(throttled, Ordering::Relaxed);
    }

    /// Sample the recent 429 rate and age the window. Called only from
    /// the scaling controller tick; the halving store may lose a
    /// concurrent flush update, which only delays the signal by a tick.
    pub(crate) fn sample_throttle_rate(&self) -> f64 {
        let docs = self.recent_docs.load(Ordering::Relaxed);
        let throttled = self.recent_throttled.load(Ordering::Relaxed);
        self.recent_docs.store(docs / 2, Ordering::Relaxed);
        self.recent_throttled.store(throttled / 2, Ordering::Relaxed);
        if docs == 0 {
            0.0
        } else {
            throttled as f64 / docs as f64
        }
    }
}

/// Increments the live task count on creation and decrements it on drop,
/// so `close` can wait for every spawned task even across panics.
pub(crate) struct TaskGuard {
    tasks: Arc<watch::Sender<usize>>,
}

impl TaskGuard {
    fn new(tasks: Arc<watch::Sender<usize>>) -> Self {
        tasks.send_modify(|n| *n += 1);
        Self { tasks }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tasks.send_modify(|n| *n -= 1);
    }
}

// =============================================================================
// Public facade
// =============================================================================

/// Bulk event indexer.
///
/// Cheap to clone; all clones share one pool. Must be created and used
/// within a tokio runtime. Call [`close`](Self::close) before dropping
/// the last clone: the indexer tasks keep running until told to drain.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<PoolInner>,
}

impl Indexer {
    /// Create an indexer and start its initial active indexer (and the
    /// scaling controller unless scaling is disabled).
    pub fn new(transport: impl BulkTransport + 'static, config: Config) -> Result<Self, Error> {
        config.validate()?;

        let (items_tx, items_rx) = async_channel::bounded(config.event_buffer_size);
        let (free_tx, free_rx) = async_channel::bounded(config.max_bulk_requests);
        for _ in 0..config.max_bulk_requests {
            // Always succeeds: the channel was just created with exactly
            // this capacity.
            let _ = free_tx.try_send(BulkBuffer::new(config.compression_level));
        }

        let cpus = config.cpu_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });

        let (shutdown_tx, _) = watch::channel(false);
        let (tasks_tx, _) = watch::channel(0usize);

        let inner = Arc::new(PoolInner {
            transport: Arc::new(transport),
            items_tx,
            items_rx,
            free_tx,
            free_rx,
            metrics: IndexerMetrics::new(),
            limiter: LogLimiter::default(),
            closed: AtomicBool::new(false),
            shutdown_tx,
            cpu_count: AtomicUsize::new(cpus),
            buffer_waits: AtomicU64::new(0),
            recent_docs: AtomicU64::new(0),
            recent_throttled: AtomicU64::new(0),
            first_flush_error: Mutex::new(None),
            tasks: Arc::new(tasks_tx),
            workers: Mutex::new(WorkerRegistry::default()),
            config,
        });

        inner.spawn_worker(false);
        if !inner.config.scaling.disabled {
            ScalingController::spawn(Arc::clone(&inner));
        }

        tracing::info!(
            flush_bytes = inner.config.flush_bytes,
            flush_interval_ms = inner.config.flush_interval.as_millis() as u64,
            max_bulk_requests = inner.config.max_bulk_requests,
            compression = ?inner.config.compression_level,
            scaling_disabled = inner.config.scaling.disabled,
            "bulk indexer started"
        );

        Ok(Self { inner })
    }

    /// Encode and enqueue every event in the batch.
    ///
    /// Events are encoded on the caller's task before any channel send,
    /// so encoding errors surface promptly even under backpressure. When
    /// the shared channel is full and all bulk buffers are in flight this
    /// call blocks; that is the designed backpressure mechanism. A batch
    /// interrupted mid-way (cancellation or close) may be partially
    /// enqueued; there is no rollback.
    pub async fn process_batch(&self, batch: &Batch) -> Result<(), Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        for event in batch.events() {
            let item = encode(event)?;
            if self.inner.items_tx.send(item).await.is_err() {
                return Err(Error::Closed);
            }
            self.inner.metrics.record_added(1);
        }
        Ok(())
    }

    /// Non-blocking variant of [`process_batch`](Self::process_batch):
    /// fails with [`Error::QueueFull`] instead of waiting for channel
    /// capacity. Events enqueued before the full queue was hit stay
    /// enqueued.
    pub fn try_process_batch(&self, batch: &Batch) -> Result<(), Error> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        for event in batch.events() {
            let item = encode(event)?;
            match self.inner.items_tx.try_send(item) {
                Ok(()) => self.inner.metrics.record_added(1),
                Err(async_channel::TrySendError::Full(_)) => return Err(Error::QueueFull),
                Err(async_channel::TrySendError::Closed(_)) => return Err(Error::Closed),
            }
        }
        Ok(())
    }

    /// Close the indexer: reject further batches, flush everything
    /// already enqueued, and wait for all in-flight bulk requests.
    ///
    /// Returns the first flush error observed over the indexer's
    /// lifetime, if any. Idempotent: a second call returns `Ok` once
    /// shutdown has completed. Callers needing a deadline should race
    /// this future with a timer; an abandoned `close` keeps draining in
    /// the background.
    pub async fn close(&self) -> Result<(), Error> {
        let first = !self.inner.closed.swap(true, Ordering::AcqRel);
        if first {
            self.inner.items_tx.close();
            // send_replace updates the value even when the controller has
            // not subscribed yet.
            self.inner.shutdown_tx.send_replace(true);
            tracing::info!("bulk indexer closing, draining in-flight events");
        }

        let mut tasks = self.inner.tasks.subscribe();
        // The sender lives in the pool, so this cannot fail.
        let _ = tasks.wait_for(|count| *count == 0).await;

        if first {
            let stats = self.stats();
            tracing::info!(
                added = stats.added,
                indexed = stats.indexed,
                failed = stats.failed,
                bulk_requests = stats.bulk_requests,
                bytes_total = stats.bytes_total,
                failure_lines = self.inner.limiter.emitted_count(),
                failures_suppressed = self.inner.limiter.suppressed_count(),
                "bulk indexer closed"
            );
        }

        match self.inner.first_flush_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Snapshot of the indexing statistics.
    pub fn stats(&self) -> Stats {
        self.inner.metrics.snapshot(self.inner.free_rx.len() as u64)
    }

    /// Override the CPU count used to derive the active indexer limit
    /// (`max(1, cpus / 4)`). Intended for embedders whose effective CPU
    /// budget differs from the host count, e.g. under cgroup quotas.
    pub fn set_cpu_count(&self, cpus: usize) {
        self.inner.cpu_count.store(cpus.max(1), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish()
    }
}
