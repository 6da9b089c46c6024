//! The volume: a container's top-level view over its images.
//!
//! Opening a volume resolves every `Image` object the volume `contains` down
//! to the stream holding its bytes (its `dataStream`) and builds a decoder for
//! it. Those streams are then exposed as a flat, read-only directory whose
//! entries are named after the stream URIs without their scheme.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::container::{BlobStore, ZipContainer};
use crate::error::{Aff4Error, Result};
use crate::graph::MetadataGraph;
use crate::stream::{OpenOptions, Resolver, Stream};

pub const ROOT: &str = ".";

const VERSION_BLOB: &str = "version.txt";
const DESCRIPTION_BLOB: &str = "container.description";
const INFORMATION_BLOB: &str = "information.turtle";

/// Size and type of a directory entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Restartable, paginated enumeration of the volume root.
#[derive(Clone, Debug)]
pub struct DirListing {
    entries: Vec<DirEntry>,
    pos: usize,
}

impl DirListing {
    /// Returns the next page of at most `n` entries.
    ///
    /// With `n == 0` every remaining entry is returned at once, possibly none,
    /// and the listing never reports itself exhausted. With `n > 0` the result
    /// is `None` once all entries have been handed out.
    pub fn read_dir(&mut self, n: usize) -> Option<Vec<DirEntry>> {
        let remaining = &self.entries[self.pos..];
        if n == 0 {
            self.pos = self.entries.len();
            return Some(remaining.to_vec());
        }
        if remaining.is_empty() {
            return None;
        }
        let page = remaining[..n.min(remaining.len())].to_vec();
        self.pos += page.len();
        Some(page)
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of [`Volume::open`].
pub enum Node {
    Directory(DirListing),
    File(Stream),
}

pub struct Volume {
    uri: String,
    graph: MetadataGraph,
    options: OpenOptions,
    /// Top-level streams by public name.
    streams: BTreeMap<String, Stream>,
}

/// Rejects identifiers that are empty or carry control characters; anything
/// else (relative references included) is taken as is.
fn check_uri(uri: &str) -> Result<()> {
    if uri.is_empty() || uri.chars().any(|c| c.is_ascii_control()) {
        return Err(Aff4Error::corruption(format!(
            "invalid volume identifier {:?}",
            uri
        )));
    }
    Ok(())
}

impl Volume {
    /// Resolves every image of the volume `uri` against `graph`.
    pub fn new(
        store: Arc<dyn BlobStore>,
        graph: MetadataGraph,
        uri: &str,
        options: OpenOptions,
    ) -> Result<Self> {
        let uri = uri.trim();
        check_uri(uri)?;
        info!("Volume {}", uri);

        let mut streams = BTreeMap::new();
        {
            let mut resolver = Resolver::new(store, &graph, &options);
            for object in graph.values(uri, "contains") {
                if !graph.contains(object) {
                    return Err(Aff4Error::not_found(object.as_str()));
                }
                if !graph.has_value(object, "type", "Image") {
                    debug!("{} is not an image, skipping", object);
                    continue;
                }
                let data = graph.first(object, "dataStream").ok_or_else(|| {
                    Aff4Error::not_found(format!("dataStream of {}", object))
                })?;
                let stream = resolver.resolve(data)?;
                let name = data.strip_prefix(options.scheme.as_str()).unwrap_or(data);
                info!("Image {} exposes {} as '{}' ({} bytes)", object, data, name, stream.size());
                streams.insert(name.to_string(), stream);
            }
        }

        Ok(Self {
            uri: uri.to_string(),
            graph,
            options,
            streams,
        })
    }

    /// Opens a volume from any seekable source holding the zip container.
    pub fn from_reader<R>(reader: R, options: OpenOptions) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let store = ZipContainer::new(reader)?;
        if let Some(version) = store.read_blob(VERSION_BLOB)? {
            info!(
                "Container version: {}",
                String::from_utf8_lossy(&version).trim().replace('\n', ", ")
            );
        }
        let description = store
            .read_blob(DESCRIPTION_BLOB)?
            .ok_or_else(|| Aff4Error::not_found(DESCRIPTION_BLOB))?;
        let uri = String::from_utf8(description).map_err(|e| {
            Aff4Error::corruption(format!("{} is not UTF-8: {}", DESCRIPTION_BLOB, e))
        })?;
        let turtle = store
            .read_blob(INFORMATION_BLOB)?
            .ok_or_else(|| Aff4Error::not_found(INFORMATION_BLOB))?;
        let graph = MetadataGraph::from_turtle(turtle.as_slice())?;

        Self::new(Arc::new(store), graph, &uri, options)
    }

    pub fn open_path(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening AFF4 container {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn graph(&self) -> &MetadataGraph {
        &self.graph
    }

    /// Public names of the top-level streams, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Opens the root directory (`"."`) or a top-level stream.
    ///
    /// Streams are handed out with a fresh cursor; the volume itself is never modified.
    pub fn open(&self, name: &str) -> Result<Node> {
        if name == ROOT {
            return Ok(Node::Directory(self.list_root()));
        }
        self.open_stream(name).map(Node::File)
    }

    pub fn open_stream(&self, name: &str) -> Result<Stream> {
        let stream = self
            .streams
            .get(name)
            .ok_or_else(|| Aff4Error::not_found(format!("{}{}", self.options.scheme, name)))?;
        let mut stream = stream.clone();
        stream.rewind();
        Ok(stream)
    }

    /// Size and type of `name` without reading any data.
    pub fn stat(&self, name: &str) -> Result<DirEntry> {
        if name == ROOT {
            return Ok(DirEntry {
                name: ROOT.to_string(),
                size: 0,
                is_dir: true,
            });
        }
        if let Some(stream) = self.streams.get(name) {
            return Ok(DirEntry {
                name: name.to_string(),
                size: stream.size(),
                is_dir: false,
            });
        }
        let uri = format!("{}{}", self.options.scheme, name);
        if self.graph.contains(&uri) {
            return Ok(DirEntry {
                name: name.to_string(),
                size: self.graph.first_u64(&uri, "size").unwrap_or(0),
                is_dir: false,
            });
        }
        Err(Aff4Error::not_found(uri))
    }

    pub fn list_root(&self) -> DirListing {
        DirListing {
            entries: self
                .streams
                .iter()
                .map(|(name, stream)| DirEntry {
                    name: name.clone(),
                    size: stream.size(),
                    is_dir: false,
                })
                .collect(),
            pos: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::container::blob_path;
    use crate::container::testing::{zip_bytes, MemoryStore};
    use crate::image_stream::testing::{snappy, write_stream};
    use crate::map::{encode_entries, MapEntry};

    const VOLUME: &str = "aff4://volume";

    fn extent(mapped_offset: u64, length: u64, target_offset: u64, target_id: u32) -> MapEntry {
        MapEntry {
            mapped_offset,
            length,
            target_offset,
            target_id,
        }
    }

    /// A volume with one image backed by a fill-only map.
    fn fill_map_members() -> Vec<(String, Vec<u8>)> {
        let turtle = r#"
@prefix aff4: <http://aff4.org/Schema#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .

<aff4://volume> a aff4:ZipVolume ;
    aff4:contains <aff4://image>, <aff4://map> .

<aff4://image> a aff4:Image, aff4:DiskImage ;
    aff4:dataStream <aff4://map> .

<aff4://map> a aff4:Map ;
    aff4:size "15"^^xsd:long .
"#;
        vec![
            ("version.txt".into(), b"major=1\nminor=0\ntool=exhume\n".to_vec()),
            ("container.description".into(), VOLUME.as_bytes().to_vec()),
            ("information.turtle".into(), turtle.as_bytes().to_vec()),
            (
                blob_path("aff4://map", "idx"),
                b"http://aff4.org/Schema#Zero\nhttp://aff4.org/Schema#SymbolicStream61\n".to_vec(),
            ),
            (
                blob_path("aff4://map", "map"),
                encode_entries(&[extent(0, 10, 0, 0), extent(10, 5, 0, 1)]),
            ),
        ]
    }

    fn zip_of(members: &[(String, Vec<u8>)]) -> Vec<u8> {
        let borrowed: Vec<(&str, &[u8])> = members
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();
        zip_bytes(&borrowed)
    }

    fn read_stream(volume: &Volume, name: &str) -> Vec<u8> {
        match volume.open(name).unwrap() {
            Node::File(mut stream) => {
                let mut out = Vec::new();
                stream.read_to_end(&mut out).unwrap();
                out
            }
            Node::Directory(_) => panic!("{} is a directory", name),
        }
    }

    #[test]
    fn test_end_to_end_fill_map() {
        let bytes = zip_of(&fill_map_members());
        let volume = Volume::from_reader(Cursor::new(bytes), OpenOptions::default()).unwrap();
        assert_eq!(volume.uri(), VOLUME);
        assert_eq!(volume.names().collect::<Vec<_>>(), vec!["map"]);

        let out = read_stream(&volume, "map");
        let mut expected = vec![0u8; 10];
        expected.extend_from_slice(b"aaaaa");
        assert_eq!(out, expected);
        assert_eq!(out.len(), 15);

        // Every open starts over.
        assert_eq!(read_stream(&volume, "map"), expected);
    }

    #[test]
    fn test_open_path_from_disk() {
        let bytes = zip_of(&fill_map_members());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let volume = Volume::open_path(file.path(), OpenOptions::default()).unwrap();
        assert_eq!(volume.stat("map").unwrap().size, 15);
        assert_eq!(read_stream(&volume, "map").len(), 15);
    }

    #[test]
    fn test_missing_description_is_not_found() {
        let members: Vec<(String, Vec<u8>)> = fill_map_members()
            .into_iter()
            .filter(|(n, _)| n != "container.description")
            .collect();
        let err = Volume::from_reader(Cursor::new(zip_of(&members)), OpenOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Aff4Error::NotFound(ref s) if s == "container.description"));
    }

    #[test]
    fn test_stat_and_not_found() {
        let volume = Volume::from_reader(
            Cursor::new(zip_of(&fill_map_members())),
            OpenOptions::default(),
        )
        .unwrap();

        let root = volume.stat(".").unwrap();
        assert!(root.is_dir);
        assert_eq!(root.size, 0);

        let map = volume.stat("map").unwrap();
        assert_eq!(
            map,
            DirEntry {
                name: "map".into(),
                size: 15,
                is_dir: false
            }
        );

        // Known to the graph but not a top-level stream.
        let image = volume.stat("image").unwrap();
        assert_eq!(image.size, 0);
        assert!(!image.is_dir);

        assert!(matches!(volume.stat("nope"), Err(Aff4Error::NotFound(_))));
        assert!(matches!(volume.open("nope"), Err(Aff4Error::NotFound(_))));
        assert!(matches!(volume.open("image"), Err(Aff4Error::NotFound(_))));
    }

    /// Three images, each backed directly by an image stream.
    fn three_image_volume() -> Volume {
        let mut store = MemoryStore::default();
        let mut graph = MetadataGraph::default();
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            let image = format!("aff4://image-{}", name);
            let data = format!("aff4://{}", name);
            graph.add(VOLUME, "contains", image.as_str());
            graph.add(VOLUME, "contains", data.as_str());
            graph.add(image.as_str(), "type", "Image");
            graph.add(image.as_str(), "dataStream", data.as_str());
            write_stream(
                &mut store,
                &mut graph,
                &data,
                &[vec![snappy(&vec![i as u8; 8])]],
                8,
            );
        }
        Volume::new(Arc::new(store), graph, VOLUME, OpenOptions::default()).unwrap()
    }

    #[test]
    fn test_image_streams_as_top_level() {
        let volume = three_image_volume();
        assert_eq!(volume.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(read_stream(&volume, "b"), vec![2u8; 8]);
        assert_eq!(read_stream(&volume, "c"), vec![0u8; 8]);
    }

    #[test]
    fn test_listing_pages_cover_every_entry_once() {
        let volume = three_image_volume();
        for page_size in 1..=5 {
            let mut listing = match volume.open(".").unwrap() {
                Node::Directory(listing) => listing,
                Node::File(_) => panic!("root is a directory"),
            };
            let mut names = Vec::new();
            let mut pages = 0;
            while let Some(page) = listing.read_dir(page_size) {
                assert!(!page.is_empty());
                assert!(page.len() <= page_size);
                names.extend(page.into_iter().map(|e| e.name));
                pages += 1;
            }
            assert_eq!(names, vec!["a", "b", "c"], "page size {}", page_size);
            assert_eq!(pages, (3 + page_size - 1) / page_size);
            assert!(listing.read_dir(page_size).is_none());

            listing.rewind();
            assert_eq!(listing.read_dir(page_size).unwrap()[0].name, "a");
        }
    }

    #[test]
    fn test_listing_read_all_never_exhausts() {
        let volume = three_image_volume();
        let mut listing = volume.list_root();
        assert_eq!(listing.len(), 3);
        assert_eq!(listing.read_dir(1).unwrap().len(), 1);
        assert_eq!(listing.read_dir(0).unwrap().len(), 2);
        assert_eq!(listing.read_dir(0), Some(vec![]));
        assert_eq!(listing.read_dir(0), Some(vec![]));
        assert!(listing.read_dir(2).is_none());
    }

    #[test]
    fn test_empty_volume() {
        let mut graph = MetadataGraph::default();
        graph.add(VOLUME, "type", "ZipVolume");
        let volume = Volume::new(
            Arc::new(MemoryStore::default()),
            graph,
            VOLUME,
            OpenOptions::default(),
        )
        .unwrap();
        let mut listing = volume.list_root();
        assert!(listing.is_empty());
        assert!(listing.read_dir(4).is_none());
        assert_eq!(listing.read_dir(0), Some(vec![]));
    }

    #[test]
    fn test_image_without_data_stream() {
        let mut graph = MetadataGraph::default();
        graph.add(VOLUME, "contains", "aff4://image");
        graph.add("aff4://image", "type", "Image");
        let err = Volume::new(
            Arc::new(MemoryStore::default()),
            graph,
            VOLUME,
            OpenOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Aff4Error::NotFound(_)));
    }

    #[test]
    fn test_contained_object_must_exist() {
        let mut graph = MetadataGraph::default();
        graph.add(VOLUME, "contains", "aff4://ghost");
        let err = Volume::new(
            Arc::new(MemoryStore::default()),
            graph,
            VOLUME,
            OpenOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Aff4Error::NotFound(ref s) if s == "aff4://ghost"));
    }

    #[test]
    fn test_volume_identifier_checks() {
        for uri in ["", "  \n", "aff4://vol\u{0}ume", "aff4://a\tb"] {
            let err = Volume::new(
                Arc::new(MemoryStore::default()),
                MetadataGraph::default(),
                uri,
                OpenOptions::default(),
            )
            .err()
            .unwrap();
            assert!(matches!(err, Aff4Error::Corruption(_)), "{:?}", uri);
        }

        for uri in ["no-scheme", "aff4:", "aff4://volume\n"] {
            let volume = Volume::new(
                Arc::new(MemoryStore::default()),
                MetadataGraph::default(),
                uri,
                OpenOptions::default(),
            )
            .unwrap();
            assert_eq!(volume.uri(), uri.trim());
            assert!(volume.list_root().is_empty());
        }
    }
}
