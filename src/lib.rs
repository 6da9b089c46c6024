//! Read-only access to the streams stored in AFF4 forensic containers.
//!
//! An AFF4 container is a Zip archive holding an RDF description of its
//! objects (`information.turtle`) and the data of those objects. This crate
//! rebuilds the logical byte streams out of it:
//!
//! * [`image_stream`] decodes chunked, compressed `ImageStream` objects,
//! * [`map`] composes `Map` objects out of fill extents and other streams,
//! * [`volume`] ties both to the metadata and exposes the top-level images.
//!
//! ```no_run
//! use std::io::Read;
//! use exhume_aff4::{OpenOptions, Volume};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let volume = Volume::open_path("/evidence/disk.aff4", OpenOptions::default())?;
//! for name in volume.names() {
//!     let mut stream = volume.open_stream(name)?;
//!     let mut first_sector = [0u8; 512];
//!     stream.read_exact(&mut first_sector)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod bevy;
pub mod chunked;
pub mod codec;
pub mod container;
pub mod error;
pub mod graph;
pub mod image_stream;
pub mod map;
pub mod stream;
pub mod volume;

pub use chunked::{ChunkReader, ChunkSource};
pub use codec::{Codec, Snappy};
pub use container::{BlobStore, ZipContainer};
pub use error::{Aff4Error, Result};
pub use graph::MetadataGraph;
pub use stream::{OpenOptions, Stream, StreamKind};
pub use volume::{DirEntry, DirListing, Node, Volume};
