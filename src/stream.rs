//! Stream objects and their construction from the metadata graph.
//!
//! A readable AFF4 object is either an `ImageStream` or a `Map`, and a map may
//! in turn read from further image streams or maps. [`Stream`] is the closed
//! set of those decoders; [`Resolver`] builds them bottom-up, dependents first.

use std::io::{self, Read};
use std::sync::Arc;

use log::debug;

use crate::chunked::ChunkReader;
use crate::codec::{Codec, Snappy};
use crate::container::BlobStore;
use crate::error::{Aff4Error, Result};
use crate::graph::MetadataGraph;
use crate::image_stream::ImageStream;
use crate::map::MapStream;

/// How a container is opened.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// Codec tried on every image stream chunk.
    pub codec: Arc<dyn Codec>,
    /// Prefix removed from stream URIs to form their public names.
    pub scheme: String,
    /// How deep maps may nest before the container is considered broken.
    pub max_depth: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            codec: Arc::new(Snappy),
            scheme: "aff4://".to_string(),
            max_depth: 16,
        }
    }
}

impl OpenOptions {
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// What kind of decoder backs a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Image,
    Map,
}

/// A forward-only reader over one AFF4 stream object.
///
/// Each value owns a single read cursor. [`Stream::rewind`] starts it over;
/// cloning one gives an independent copy that continues from the same point.
#[derive(Clone)]
pub enum Stream {
    Image(ChunkReader<ImageStream>),
    Map(ChunkReader<MapStream>),
}

impl Stream {
    pub fn uri(&self) -> &str {
        match self {
            Stream::Image(r) => r.get_ref().uri(),
            Stream::Map(r) => r.get_ref().uri(),
        }
    }

    /// Declared logical size.
    pub fn size(&self) -> u64 {
        match self {
            Stream::Image(r) => r.get_ref().size(),
            Stream::Map(r) => r.get_ref().size(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            Stream::Image(_) => StreamKind::Image,
            Stream::Map(_) => StreamKind::Map,
        }
    }

    /// Like [`Read::read`] but keeps the typed error.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Stream::Image(r) => r.fill(buf),
            Stream::Map(r) => r.fill(buf),
        }
    }

    pub fn rewind(&mut self) {
        match self {
            Stream::Image(r) => r.rewind(),
            Stream::Map(r) => r.rewind(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf)?)
    }
}

/// Builds [`Stream`]s out of the metadata graph.
///
/// Keeps the chain of objects currently being built so that a map which
/// (directly or not) depends on itself is reported instead of recursing forever.
pub struct Resolver<'a> {
    store: Arc<dyn BlobStore>,
    graph: &'a MetadataGraph,
    options: &'a OpenOptions,
    path: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        store: Arc<dyn BlobStore>,
        graph: &'a MetadataGraph,
        options: &'a OpenOptions,
    ) -> Self {
        Self {
            store,
            graph,
            options,
            path: Vec::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.store)
    }

    pub fn graph(&self) -> &'a MetadataGraph {
        self.graph
    }

    /// Builds the decoder for `uri`, dispatching on its declared `type`.
    pub fn resolve(&mut self, uri: &str) -> Result<Stream> {
        if self.path.iter().any(|p| p == uri) {
            return Err(Aff4Error::corruption(format!(
                "dependency cycle: {} -> {}",
                self.path.join(" -> "),
                uri
            )));
        }
        if self.path.len() >= self.options.max_depth {
            return Err(Aff4Error::corruption(format!(
                "streams nested deeper than {} levels at {}",
                self.options.max_depth, uri
            )));
        }
        if !self.graph.contains(uri) {
            return Err(Aff4Error::not_found(uri));
        }

        self.path.push(uri.to_string());
        let stream = self.build(uri);
        self.path.pop();
        stream
    }

    fn build(&mut self, uri: &str) -> Result<Stream> {
        if self.graph.has_value(uri, "type", "Map") {
            debug!("Resolving {} as Map (depth {})", uri, self.path.len());
            let map = MapStream::open(self, uri)?;
            Ok(Stream::Map(ChunkReader::new(map)))
        } else if self.graph.has_value(uri, "type", "ImageStream") {
            debug!("Resolving {} as ImageStream (depth {})", uri, self.path.len());
            let image = ImageStream::open(
                self.store(),
                self.graph,
                uri,
                Arc::clone(&self.options.codec),
            )?;
            Ok(Stream::Image(ChunkReader::new(image)))
        } else {
            Err(Aff4Error::UnknownType {
                uri: uri.to_string(),
                types: self.graph.values(uri, "type").to_vec(),
            })
        }
    }
}
