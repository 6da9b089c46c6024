//! Sequential byte reader over a source that produces variably-sized chunks.
//!
//! Both AFF4 decoders (image streams and maps) naturally produce their data
//! one unit at a time: a whole decompressed bevy, or a whole resolved extent.
//! [`ChunkReader`] turns such a [`ChunkSource`] into a plain [`std::io::Read`]
//! by keeping the unconsumed tail of the last chunks around between calls.

use std::io::{self, Read};

use crate::error::Result;

/// Something that yields the next unit of data on demand.
pub trait ChunkSource {
    /// Returns the next chunk, or `None` once the source is exhausted.
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Puts the source back at its very first chunk.
    fn rewind(&mut self);
}

/// Leftover bytes produced by the source but not yet handed to a caller.
#[derive(Clone, Default)]
struct Leftover {
    data: Vec<u8>,
    /// Read pointer inside `data`.
    ptr: usize,
}

impl Leftover {
    #[inline]
    fn available(&self) -> usize {
        self.data.len() - self.ptr
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.ptr > 0 {
            self.data.drain(..self.ptr);
            self.ptr = 0;
        }
        self.data.extend_from_slice(chunk);
    }

    fn take_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.available());
        buf[..n].copy_from_slice(&self.data[self.ptr..self.ptr + n]);
        self.ptr += n;
        if self.ptr == self.data.len() {
            self.data.clear();
            self.ptr = 0;
        }
        n
    }
}

/// Buffers a [`ChunkSource`] into a forward-only byte stream.
///
/// A call to [`ChunkReader::fill`] pulls chunks until the caller buffer can be
/// satisfied or the source runs dry. Trailing bytes are never dropped: when
/// the source ends, whatever is buffered is returned first and the end of data
/// shows up on the following call as `Ok(0)`.
#[derive(Clone)]
pub struct ChunkReader<S> {
    source: S,
    leftover: Leftover,
    exhausted: bool,
}

impl<S: ChunkSource> ChunkReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            leftover: Leftover::default(),
            exhausted: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Copies up to `buf.len()` bytes into `buf` and returns how many were written.
    ///
    /// Source errors abort the fill and are returned as is. Bytes that were
    /// already buffered stay buffered, so nothing is lost if the caller decides
    /// to keep going.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        while self.leftover.available() < buf.len() && !self.exhausted {
            match self.source.next_chunk()? {
                Some(chunk) => self.leftover.push(&chunk),
                None => self.exhausted = true,
            }
        }
        Ok(self.leftover.take_into(buf))
    }

    /// Drops all buffered bytes and restarts the underlying source.
    pub fn rewind(&mut self) {
        self.source.rewind();
        self.leftover = Leftover::default();
        self.exhausted = false;
    }
}

impl<S: ChunkSource> Read for ChunkReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf)?)
    }
}
