//! Ship - Indexer
//!
//! Bulk event indexing pipeline: batches events, compresses them, and
//! streams them to an Elasticsearch-compatible bulk endpoint with
//! adaptive concurrency, backpressure, and graceful shutdown.
//!
//! # Architecture
//!
//! ```text
//! [producers] --process_batch--> [items channel] --> [active indexers]
//!                                                         |  ^
//!                                                   flush |  | buffers
//!                                                         v  |
//!                                  [transport] <-- [bulk buffers pool]
//! ```
//!
//! - Events are encoded to the bulk line format on the caller's task,
//!   then enqueued on one shared bounded channel.
//! - A dynamic set of active indexers consumes the channel, each filling
//!   one pooled bulk buffer at a time and flushing on a byte or age
//!   trigger. Flushes detach into their own tasks; the buffer pool caps
//!   in-flight bulk requests and provides backpressure.
//! - A scaling controller grows the indexer set under pressure and
//!   shrinks it when idle or when the downstream throttles, within
//!   `max(1, cpus / 4)`.
//!
//! # Example
//!
//! ```ignore
//! use ship_indexer::{Config, Indexer};
//! use ship_model::{Batch, DataStream, Event};
//!
//! let indexer = Indexer::new(transport, Config::default())?;
//!
//! let mut batch = Batch::new();
//! batch.push(Event::new(now, DataStream::new("logs", "app", "prod")));
//! indexer.process_batch(&batch).await?;
//!
//! // Flushes everything in flight and stops all tasks.
//! indexer.close().await?;
//! ```

// =============================================================================
// Pipeline internals
// =============================================================================

mod buffer;
mod limiter;
mod pool;
mod scaling;
mod worker;

// =============================================================================
// Public surface
// =============================================================================

/// Configuration: flush triggers, pooling, compression, scaling.
pub mod config;

/// Bulk line-format encoding.
pub mod encode;

/// Error types.
pub mod error;

/// Statistics counters and snapshots.
pub mod stats;

/// The transport boundary to the downstream store.
pub mod transport;

/// Mock transport and payload decoding for tests.
pub mod test_utils;

pub use config::{CompressionLevel, Config, ScaleActionConfig, ScalingConfig};
pub use encode::{encode, EncodedItem};
pub use error::Error;
pub use pool::Indexer;
pub use stats::Stats;
pub use transport::{
    BulkItemDetail, BulkItemError, BulkRequest, BulkResponse, BulkResponseBody, BulkTransport,
    PRODUCT_ORIGIN_HEADER, PRODUCT_ORIGIN_VALUE,
};
