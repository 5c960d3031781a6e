//! Rate-limited failure logging
//!
//! Bulk responses can report hundreds of per-item failures that share a
//! handful of distinct causes. The limiter emits at most one log line per
//! `(error type, error reason)` key per window, with a suppressed count on
//! the next emission for that key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default window during which repeats of a failure key are suppressed.
pub(crate) const DEFAULT_LOG_WINDOW: Duration = Duration::from_secs(10);

/// Entries are pruned once the key map grows past this size.
const MAX_TRACKED_KEYS: usize = 1024;

#[derive(Debug)]
struct Entry {
    last_emit: Instant,
    suppressed: u64,
}

/// Per-key rate-limited logger for per-item indexing failures.
pub(crate) struct LogLimiter {
    window: Duration,
    entries: Mutex<HashMap<(String, String), Entry>>,
    emitted: AtomicU64,
    suppressed: AtomicU64,
}

impl LogLimiter {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
            emitted: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Record one failed item and log it unless its key was already logged
    /// within the window. Returns whether a line was emitted.
    pub(crate) fn log_failed_item(&self, error_type: &str, error_reason: &str) -> bool {
        let now = Instant::now();
        let suppressed = {
            let mut entries = self.entries.lock();
            if entries.len() > MAX_TRACKED_KEYS {
                let window = self.window;
                entries.retain(|_, e| now.duration_since(e.last_emit) < window);
            }
            match entries.get_mut(&(error_type.to_owned(), error_reason.to_owned())) {
                Some(entry) if now.duration_since(entry.last_emit) < self.window => {
                    entry.suppressed += 1;
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                Some(entry) => {
                    entry.last_emit = now;
                    std::mem::take(&mut entry.suppressed)
                }
                None => {
                    entries.insert(
                        (error_type.to_owned(), error_reason.to_owned()),
                        Entry {
                            last_emit: now,
                            suppressed: 0,
                        },
                    );
                    0
                }
            }
        };

        self.emitted.fetch_add(1, Ordering::Relaxed);
        if suppressed > 0 {
            tracing::error!(
                error.kind = error_type,
                error.reason = error_reason,
                suppressed,
                "failed to index event"
            );
        } else {
            tracing::error!(
                error.kind = error_type,
                error.reason = error_reason,
                "failed to index event"
            );
        }
        true
    }

    /// Total log lines emitted.
    pub(crate) fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Total failures suppressed.
    pub(crate) fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl Default for LogLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_WINDOW)
    }
}

#[cfg(test)]
#[path = "limiter_test.rs"]
mod limiter_test;
