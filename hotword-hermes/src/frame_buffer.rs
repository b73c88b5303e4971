/// Frame buffer module for persistent PCM accumulation
///
/// Incoming audio frames rarely line up with the detector chunk size, so raw
/// bytes are appended here and handed out as fixed-size chunks in arrival
/// order. Whatever does not fill a whole chunk stays behind for the next frame.

use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Default detector chunk size in bytes (480 samples of 16-bit mono audio)
pub const DEFAULT_CHUNK_SIZE: usize = 960;

/// FIFO byte buffer that yields whole chunks only
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    /// Create an empty frame buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw PCM bytes to the tail of the buffer
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        trace!("Appended {} byte(s), {} buffered", data.len(), self.buffer.len());
    }

    /// Remove and return every complete chunk currently buffered
    ///
    /// Chunks come out in the order their bytes were appended. The remainder
    /// (always shorter than `chunk_size`) is retained. A zero chunk size
    /// yields nothing.
    pub fn drain_chunks(&mut self, chunk_size: usize) -> Vec<Bytes> {
        if chunk_size == 0 {
            return Vec::new();
        }

        let count = self.buffer.len() / chunk_size;
        let mut chunks = Vec::with_capacity(count);

        for _ in 0..count {
            chunks.push(self.buffer.split_to(chunk_size).freeze());
        }

        if count > 0 {
            trace!("Drained {} chunk(s), {} byte(s) retained", count, self.buffer.len());
        }

        chunks
    }

    /// Number of bytes waiting for a full chunk
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
