//! AFF4 `ImageStream` decoding.
//!
//! An image stream is a run of fixed-size logical chunks, each compressed on
//! its own and packed into bevies. Decoding walks the bevies in order and, for
//! each, decompresses every indexed chunk and hands the concatenation out as
//! one unit through the [`ChunkSource`] interface.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::bevy::{check_contiguous, BevyIndex};
use crate::chunked::ChunkSource;
use crate::codec::{decode_or_literal, Codec};
use crate::container::{bevy_id, blob_path, BlobStore};
use crate::error::{Aff4Error, Result};
use crate::graph::MetadataGraph;

/// Default AFF4 chunk size, used when the metadata does not declare one.
pub const DEFAULT_CHUNK_SIZE: u32 = 32 * 1024;

/// Largest declared chunk size taken at face value.
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct ImageStream {
    uri: String,
    /// Declared logical chunk size (informational, chunks carry their own length).
    chunk_size: u32,
    /// Declared logical size of the stream.
    size: u64,
    index: BevyIndex,
    store: Arc<dyn BlobStore>,
    codec: Arc<dyn Codec>,
    /// Next bevy to decode.
    bevy_no: u64,
}

impl ImageStream {
    /// Builds the decoder for `uri` by loading all of its bevy indexes.
    pub fn open(
        store: Arc<dyn BlobStore>,
        graph: &MetadataGraph,
        uri: &str,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        if !graph.contains(uri) {
            return Err(Aff4Error::not_found(uri));
        }
        let chunk_size = match graph.first_u64(uri, "chunkSize") {
            Some(v) if v > 0 && v <= MAX_CHUNK_SIZE as u64 => v as u32,
            Some(v) => {
                warn!(
                    "{} declares an implausible chunk size {}, assuming {}",
                    uri, v, DEFAULT_CHUNK_SIZE
                );
                DEFAULT_CHUNK_SIZE
            }
            None => DEFAULT_CHUNK_SIZE,
        };
        let size = graph.first_u64(uri, "size").unwrap_or(0);

        if let Some(method) = graph.first(uri, "compressionMethod") {
            if !method.to_ascii_lowercase().contains(codec.name()) {
                warn!(
                    "{} declares compression '{}' but chunks are decoded with {}",
                    uri,
                    method,
                    codec.name()
                );
            }
        }

        let index = BevyIndex::load(store.as_ref(), uri)?;
        debug!(
            "ImageStream {}: size {}, chunk size {}, {} bevies, {} chunks",
            uri,
            size,
            chunk_size,
            index.bevy_count(),
            index.chunk_count()
        );

        Ok(Self {
            uri: uri.to_string(),
            chunk_size,
            size,
            index,
            store,
            codec,
            bevy_no: 0,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn index(&self) -> &BevyIndex {
        &self.index
    }

    /// Decodes every chunk of bevy `n` out of its raw blob.
    fn decode_bevy(&self, n: u64, blob: &[u8]) -> Result<Vec<u8>> {
        let entries = usize::try_from(n)
            .ok()
            .and_then(|n| self.index.bevy(n))
            .ok_or_else(|| {
                Aff4Error::corruption(format!("{}: bevy {} has no index", self.uri, bevy_id(n)))
            })?;
        check_contiguous(entries).map_err(|e| {
            Aff4Error::corruption(format!("{}: bevy {}: {}", self.uri, bevy_id(n), e))
        })?;

        let mut out = Vec::with_capacity(blob.len());
        for entry in entries {
            let chunk = usize::try_from(entry.bevy_offset)
                .ok()
                .zip(usize::try_from(entry.end()).ok())
                .and_then(|(start, end)| blob.get(start..end))
                .ok_or_else(|| {
                    Aff4Error::corruption(format!(
                        "{}: chunk at {}+{} lies outside bevy {} ({} bytes)",
                        self.uri,
                        entry.bevy_offset,
                        entry.chunk_size,
                        bevy_id(n),
                        blob.len()
                    ))
                })?;
            out.extend(decode_or_literal(self.codec.as_ref(), chunk));
        }
        Ok(out)
    }
}

impl ChunkSource for ImageStream {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let name = blob_path(&self.uri, &bevy_id(self.bevy_no));
        let blob = match self.store.read_blob(&name)? {
            Some(blob) => blob,
            None => {
                debug!("{}: no bevy {}, end of stream", self.uri, bevy_id(self.bevy_no));
                return Ok(None);
            }
        };
        let data = self.decode_bevy(self.bevy_no, &blob)?;
        debug!(
            "{}: bevy {} decoded to {} bytes",
            self.uri,
            bevy_id(self.bevy_no),
            data.len()
        );
        self.bevy_no += 1;
        Ok(Some(data))
    }

    fn rewind(&mut self) {
        self.bevy_no = 0;
    }
}

impl fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStream")
            .field("uri", &self.uri)
            .field("size", &self.size)
            .field("chunk_size", &self.chunk_size)
            .field("bevies", &self.index.bevy_count())
            .field("bevy_no", &self.bevy_no)
            .finish()
    }
}
