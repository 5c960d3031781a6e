//! Indexer configuration
//!
//! Flush triggers, buffer pool sizing, compression, and autoscaling knobs.

use std::time::Duration;

use crate::error::Error;

// =============================================================================
// Constants
// =============================================================================

/// Default compressed-size flush trigger (5 MiB).
pub const DEFAULT_FLUSH_BYTES: usize = 5 * 1024 * 1024;

/// Default age flush trigger, measured from the first buffered item.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of pooled bulk buffers, which caps in-flight bulk requests.
pub const DEFAULT_MAX_BULK_REQUESTS: usize = 10;

/// Default capacity of the shared event channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Default scaling evaluation interval.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of pressured ticks before scaling up.
pub const DEFAULT_SCALE_UP_THRESHOLD: u32 = 60;

/// Default minimum time between two scale-ups.
pub const DEFAULT_SCALE_UP_COOL_DOWN: Duration = Duration::from_secs(60);

/// Default number of idle ticks before scaling down.
pub const DEFAULT_SCALE_DOWN_THRESHOLD: u32 = 30;

/// Default minimum time between two scale-downs.
pub const DEFAULT_SCALE_DOWN_COOL_DOWN: Duration = Duration::from_secs(30);

// =============================================================================
// Compression
// =============================================================================

/// Gzip compression level for bulk payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    /// No compression; payloads are sent as plain newline-delimited JSON.
    None,
    /// Fastest compression.
    BestSpeed,
    /// Balanced compression.
    #[default]
    Default,
    /// Smallest output.
    BestCompression,
}

impl CompressionLevel {
    /// Whether payloads are gzip-encoded at this level.
    pub fn is_enabled(self) -> bool {
        !matches!(self, CompressionLevel::None)
    }

    /// The flate2 compression setting, or `None` when disabled.
    pub(crate) fn to_flate2(self) -> Option<flate2::Compression> {
        match self {
            CompressionLevel::None => None,
            CompressionLevel::BestSpeed => Some(flate2::Compression::fast()),
            CompressionLevel::Default => Some(flate2::Compression::default()),
            CompressionLevel::BestCompression => Some(flate2::Compression::best()),
        }
    }
}

// =============================================================================
// Scaling
// =============================================================================

/// Threshold and cooldown for one scaling direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleActionConfig {
    /// Consecutive qualifying ticks required before acting.
    pub threshold: u32,

    /// Minimum elapsed time between two actions in this direction.
    pub cool_down: Duration,
}

/// Autoscaling configuration for the active indexer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingConfig {
    /// Disable autoscaling entirely; the pool keeps exactly one active
    /// indexer.
    pub disabled: bool,

    /// How often pressure and idleness are evaluated.
    pub idle_interval: Duration,

    /// Scale-up thresholds.
    pub scale_up: ScaleActionConfig,

    /// Scale-down thresholds.
    pub scale_down: ScaleActionConfig,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            scale_up: ScaleActionConfig {
                threshold: DEFAULT_SCALE_UP_THRESHOLD,
                cool_down: DEFAULT_SCALE_UP_COOL_DOWN,
            },
            scale_down: ScaleActionConfig {
                threshold: DEFAULT_SCALE_DOWN_THRESHOLD,
                cool_down: DEFAULT_SCALE_DOWN_COOL_DOWN,
            },
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the bulk indexer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Flush when a bulk buffer's payload reaches this many bytes
    /// (compressed size when compression is enabled).
    pub flush_bytes: usize,

    /// Flush when the oldest buffered item reaches this age.
    pub flush_interval: Duration,

    /// Number of pooled bulk buffers. This caps concurrent in-flight bulk
    /// requests and, together with `flush_bytes`, bounds memory.
    pub max_bulk_requests: usize,

    /// Capacity of the shared event channel. When it is full and all bulk
    /// buffers are in flight, `process_batch` blocks: this is the designed
    /// backpressure mechanism.
    pub event_buffer_size: usize,

    /// Gzip level for bulk payloads.
    pub compression_level: CompressionLevel,

    /// Autoscaling knobs for the active indexer pool.
    pub scaling: ScalingConfig,

    /// Override for the detected CPU count used to derive the active
    /// indexer limit (`max(1, cpus / 4)`). Embedders running under cgroup
    /// CPU quotas should set this to the effective quota.
    pub cpu_count: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_bytes: DEFAULT_FLUSH_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_bulk_requests: DEFAULT_MAX_BULK_REQUESTS,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            compression_level: CompressionLevel::default(),
            scaling: ScalingConfig::default(),
            cpu_count: None,
        }
    }
}

impl Config {
    /// Set the byte-size flush trigger.
    #[must_use]
    pub fn with_flush_bytes(mut self, bytes: usize) -> Self {
        self.flush_bytes = bytes;
        self
    }

    /// Set the age flush trigger.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the number of pooled bulk buffers.
    #[must_use]
    pub fn with_max_bulk_requests(mut self, max: usize) -> Self {
        self.max_bulk_requests = max;
        self
    }

    /// Set the shared event channel capacity.
    #[must_use]
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Set the compression level.
    #[must_use]
    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the scaling configuration.
    #[must_use]
    pub fn with_scaling(mut self, scaling: ScalingConfig) -> Self {
        self.scaling = scaling;
        self
    }

    /// Override the detected CPU count.
    #[must_use]
    pub fn with_cpu_count(mut self, cpus: usize) -> Self {
        self.cpu_count = Some(cpus);
        self
    }

    /// Validate the configuration.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.flush_bytes == 0 {
            return Err(Error::config("flush_bytes must be greater than zero"));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::config("flush_interval must be greater than zero"));
        }
        if self.max_bulk_requests == 0 {
            return Err(Error::config("max_bulk_requests must be greater than zero"));
        }
        if self.event_buffer_size == 0 {
            return Err(Error::config("event_buffer_size must be greater than zero"));
        }
        if self.cpu_count == Some(0) {
            return Err(Error::config("cpu_count must be greater than zero"));
        }
        if !self.scaling.disabled {
            if self.scaling.idle_interval.is_zero() {
                return Err(Error::config("scaling.idle_interval must be greater than zero"));
            }
            if self.scaling.scale_up.threshold == 0 {
                return Err(Error::config("scaling.scale_up.threshold must be greater than zero"));
            }
            if self.scaling.scale_down.threshold == 0 {
                return Err(Error::config(
                    "scaling.scale_down.threshold must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
