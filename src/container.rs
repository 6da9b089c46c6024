//! Access to the named blobs of an AFF4 container.
//!
//! An AFF4 volume is a Zip64 archive. Every stream object stores its parts
//! under a directory named after its percent-encoded URI:
//!
//! ```text
//! aff4%3A%2F%2F<uuid>/00000000         (bevy 0)
//! aff4%3A%2F%2F<uuid>/00000000.index   (bevy 0 index)
//! aff4%3A%2F%2F<uuid>/map              (map extents)
//! aff4%3A%2F%2F<uuid>/idx              (map targets)
//! ```
//!
//! Decoders only see the [`BlobStore`] trait, so anything able to hand out
//! whole blobs by name can back them.

use std::io::{Read, Seek};
use std::sync::Mutex;

use log::{debug, info};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{Aff4Error, Result};

/// Bytes left untouched in blob directory names (the RFC 3986 unreserved set).
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Named-blob access to a container.
pub trait BlobStore: Send + Sync {
    /// Reads the whole blob called `name`.
    ///
    /// A missing blob is `Ok(None)`: callers use it to detect the end of
    /// numbered sequences. Only real access failures are errors.
    fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Path of the `suffix` part belonging to the object `uri`.
pub fn blob_path(uri: &str, suffix: &str) -> String {
    format!("{}/{}", utf8_percent_encode(uri, URI_COMPONENT), suffix)
}

/// Name of bevy `n` (and, with `.index` appended, of its index).
#[inline]
pub fn bevy_id(n: u64) -> String {
    format!("{:08}", n)
}

/// [`BlobStore`] over a Zip archive.
///
/// The archive needs `&mut` access to read members, so it sits behind a
/// mutex; reads are short and strictly sequential per decoder.
pub struct ZipContainer<R> {
    archive: Mutex<ZipArchive<R>>,
}

impl<R: Read + Seek> ZipContainer<R> {
    pub fn new(reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader)?;
        info!("Zip container opened with {} members", archive.len());
        for name in archive.file_names() {
            debug!("Found {:?} in AFF4 Zip Central Directory", name);
        }
        Ok(Self {
            archive: Mutex::new(archive),
        })
    }
}

impl<R: Read + Seek + Send> BlobStore for ZipContainer<R> {
    fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut archive = self
            .archive
            .lock()
            .map_err(|_| Aff4Error::Io(std::io::Error::other("zip archive lock poisoned")))?;
        let mut member = match archive.by_name(name) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // The header size is not trusted for preallocation.
        let mut data = Vec::new();
        member.read_to_end(&mut data)?;
        Ok(Some(data))
    }
}
