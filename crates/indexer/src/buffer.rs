//! Bulk request buffer
//!
//! An append-only framed byte sink for encoded items, optionally writing
//! through a streaming gzip encoder whose underlying sink is the raw
//! buffer. Compressing in place gives an accurate compressed `size()` for
//! the byte-based flush trigger without a second copy.
//!
//! Buffers are pooled: while in use a buffer is exclusively owned by one
//! active indexer or one in-flight flush task; `reset()` retains the
//! allocation so the pool reuses it across bulk requests.

use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::GzEncoder;

use crate::config::CompressionLevel;
use crate::encode::EncodedItem;

/// Initial capacity for a pooled buffer; it grows on demand and the
/// allocation is retained across resets.
const INITIAL_CAPACITY: usize = 4 * 1024;

enum Writer {
    Plain(bytes::buf::Writer<BytesMut>),
    Gzip(GzEncoder<bytes::buf::Writer<BytesMut>>),
    Sealed(BytesMut),
}

/// A pooled buffer accumulating one bulk request payload.
pub(crate) struct BulkBuffer {
    compression: CompressionLevel,
    writer: Writer,
    items: usize,
    raw_bytes: usize,
}

impl BulkBuffer {
    pub(crate) fn new(compression: CompressionLevel) -> Self {
        Self {
            compression,
            writer: wrap(BytesMut::with_capacity(INITIAL_CAPACITY), compression),
            items: 0,
            raw_bytes: 0,
        }
    }

    /// Append one encoded item (action line + source line).
    pub(crate) fn append(&mut self, item: &EncodedItem) -> io::Result<()> {
        let write = |w: &mut dyn Write| {
            w.write_all(item.action())?;
            w.write_all(item.source())
        };
        match &mut self.writer {
            Writer::Plain(w) => write(w)?,
            Writer::Gzip(w) => write(w)?,
            Writer::Sealed(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "append to sealed bulk buffer",
                ));
            }
        }
        self.items += 1;
        self.raw_bytes += item.uncompressed_size();
        Ok(())
    }

    /// Number of items appended since the last reset.
    pub(crate) fn items(&self) -> usize {
        self.items
    }

    /// Uncompressed bytes appended since the last reset.
    pub(crate) fn raw_bytes(&self) -> usize {
        self.raw_bytes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Current payload size: bytes that have reached the raw buffer. With
    /// compression enabled this is the compressed size so far (the gzip
    /// encoder may still hold a partial block internally until sealed).
    pub(crate) fn size(&self) -> usize {
        match &self.writer {
            Writer::Plain(w) => w.get_ref().len(),
            Writer::Gzip(w) => w.get_ref().get_ref().len(),
            Writer::Sealed(b) => b.len(),
        }
    }

    /// Finalize the payload framing. With compression enabled this
    /// flushes the gzip stream and writes its trailer.
    pub(crate) fn seal(&mut self) -> io::Result<()> {
        let writer = std::mem::replace(&mut self.writer, Writer::Sealed(BytesMut::new()));
        let raw = match writer {
            Writer::Plain(w) => w.into_inner(),
            Writer::Gzip(w) => w.finish()?.into_inner(),
            Writer::Sealed(b) => b,
        };
        self.writer = Writer::Sealed(raw);
        Ok(())
    }

    /// Detach the finalized payload. Valid only after `seal()`; the
    /// returned `Bytes` shares the buffer's allocation, which is
    /// reclaimed on the next append once the payload is dropped.
    pub(crate) fn take_payload(&mut self) -> Bytes {
        match &mut self.writer {
            Writer::Sealed(b) => b.split().freeze(),
            _ => {
                debug_assert!(false, "take_payload on unsealed bulk buffer");
                Bytes::new()
            }
        }
    }

    /// Clear to empty, retaining the allocation for reuse.
    pub(crate) fn reset(&mut self) {
        let writer = std::mem::replace(&mut self.writer, Writer::Sealed(BytesMut::new()));
        let mut raw = match writer {
            Writer::Plain(w) => w.into_inner(),
            Writer::Gzip(w) => w.finish().map(|w| w.into_inner()).unwrap_or_default(),
            Writer::Sealed(b) => b,
        };
        raw.clear();
        self.writer = wrap(raw, self.compression);
        self.items = 0;
        self.raw_bytes = 0;
    }
}

fn wrap(raw: BytesMut, compression: CompressionLevel) -> Writer {
    match compression.to_flate2() {
        Some(level) => Writer::Gzip(GzEncoder::new(raw.writer(), level)),
        None => Writer::Plain(raw.writer()),
    }
}

impl std::fmt::Debug for BulkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkBuffer")
            .field("compression", &self.compression)
            .field("items", &self.items)
            .field("raw_bytes", &self.raw_bytes)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
