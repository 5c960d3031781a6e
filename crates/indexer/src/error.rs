//! Indexer errors

use bytes::Bytes;
use http::StatusCode;

/// Errors from the bulk indexing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation on a closed indexer.
    #[error("indexer is closed")]
    Closed,

    /// Non-blocking enqueue found the event queue full.
    #[error("event queue is full")]
    QueueFull,

    /// An event could not be encoded into the bulk line format.
    #[error("failed to encode event: {0}")]
    Encode(String),

    /// The downstream store rejected a bulk request outright (non-2xx).
    #[error(
        "flush failed: [{} {}] {}",
        .status.as_u16(),
        .status.canonical_reason().unwrap_or("Unknown"),
        String::from_utf8_lossy(.body)
    )]
    Flush {
        /// HTTP status of the bulk response.
        status: StatusCode,
        /// Raw response body.
        body: Bytes,
    },

    /// The transport failed before a response was produced, or produced a
    /// response body the indexer could not decode.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error while framing a bulk payload.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an encode error.
    pub(crate) fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a configuration error.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_error_display() {
        let err = Error::Flush {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Bytes::new(),
        };
        assert_eq!(err.to_string(), "flush failed: [500 Internal Server Error] ");
    }

    #[test]
    fn test_flush_error_display_with_body() {
        let err = Error::Flush {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: Bytes::from_static(b"slow down"),
        };
        assert_eq!(
            err.to_string(),
            "flush failed: [429 Too Many Requests] slow down"
        );
    }

    #[test]
    fn test_closed_error_display() {
        assert_eq!(Error::Closed.to_string(), "indexer is closed");
    }
}
