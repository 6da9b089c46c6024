//! AFF4 `Map` decoding.
//!
//! A map describes a logical stream as an ordered list of extents. Each extent
//! says "the next `length` bytes come from `target`, starting at
//! `target_offset`", where the target is one of the well-known fill streams
//! or another stream stored in the container (the map's dependent streams).
//!
//! Two blobs live under the map URI:
//!
//! * `map`: flat array of 28 byte little-endian records
//!   `mapped_offset u64 | length u64 | target_offset u64 | target_id u32`
//! * `idx`: newline separated target URIs, `target_id` being the line number.

use std::collections::HashMap;
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;

use crate::chunked::ChunkSource;
use crate::container::blob_path;
use crate::error::{Aff4Error, Result};
use crate::stream::{Resolver, Stream};

pub const ZERO_TARGET: &str = "http://aff4.org/Schema#Zero";
pub const UNKNOWN_DATA_TARGET: &str = "http://aff4.org/Schema#UnknownData";
pub const SYMBOLIC_STREAM_PREFIX: &str = "http://aff4.org/Schema#SymbolicStream";

/// Upper bound on the bytes produced per call, so huge sparse extents are
/// served in pieces rather than materialised at once.
const MAX_PIECE: u64 = 4 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapEntry {
    pub mapped_offset: u64,
    pub length: u64,
    pub target_offset: u64,
    pub target_id: u32,
}

impl MapEntry {
    pub const SIZE: usize = 28;

    fn parse(record: &[u8]) -> Self {
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&record[at..at + 8]);
            u64::from_le_bytes(b)
        };
        let mut id = [0u8; 4];
        id.copy_from_slice(&record[24..28]);
        Self {
            mapped_offset: u64_at(0),
            length: u64_at(8),
            target_offset: u64_at(16),
            target_id: u32::from_le_bytes(id),
        }
    }
}

/// Parses a whole `map` blob.
pub fn parse_entries(data: &[u8]) -> Result<Vec<MapEntry>> {
    if data.len() % MapEntry::SIZE != 0 {
        return Err(Aff4Error::corruption(format!(
            "map of {} bytes is not a whole number of {} byte records",
            data.len(),
            MapEntry::SIZE
        )));
    }
    Ok(data.chunks_exact(MapEntry::SIZE).map(MapEntry::parse).collect())
}

/// Where the bytes of an extent come from, decided once per `idx` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Zero,
    UnknownData,
    /// Endless repetition of one byte.
    Symbolic(u8),
    /// One of the map's dependent streams.
    Dependent(String),
    /// A symbolic stream whose byte suffix cannot be decoded.
    Malformed(String),
    /// Blank `idx` line (usually the one after the final newline).
    Empty,
    Unknown(String),
}

impl Target {
    pub fn classify(id: &str, is_dependent: impl Fn(&str) -> bool) -> Self {
        static SYMBOLIC: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"^http://aff4\.org/Schema#SymbolicStream((?:[0-9A-Fa-f]{2})+)$").unwrap()
        });

        let id = id.trim_end_matches('\r');
        if id == ZERO_TARGET {
            return Target::Zero;
        }
        if id == UNKNOWN_DATA_TARGET {
            return Target::UnknownData;
        }
        if id.starts_with(SYMBOLIC_STREAM_PREFIX) {
            return SYMBOLIC
                .captures(id)
                .and_then(|c| u8::from_str_radix(&c[1][..2], 16).ok())
                .map(Target::Symbolic)
                .unwrap_or_else(|| Target::Malformed(id.to_string()));
        }
        if id.is_empty() {
            return Target::Empty;
        }
        if is_dependent(id) {
            return Target::Dependent(id.to_string());
        }
        Target::Unknown(id.to_string())
    }
}

/// A dependent stream together with how far it has been consumed.
#[derive(Clone)]
struct Dependent {
    stream: Stream,
    position: u64,
}

impl Dependent {
    /// Moves the read position to `offset`, restarting the stream when it lies behind.
    ///
    /// Running out of data on the way fails the extent of `length` bytes that
    /// needed it, with none of its bytes read.
    fn seek_to(&mut self, uri: &str, offset: u64, length: u64) -> Result<()> {
        if offset < self.position {
            debug!("{}: rewinding to reach offset {}", uri, offset);
            self.stream.rewind();
            self.position = 0;
        }
        let mut scratch = vec![0u8; (offset - self.position).min(MAX_PIECE) as usize];
        while self.position < offset {
            let want = (offset - self.position).min(scratch.len() as u64) as usize;
            let got = self.stream.fill(&mut scratch[..want])?;
            if got == 0 {
                debug!(
                    "{}: ends at {} before the extent offset {}",
                    uri, self.position, offset
                );
                return Err(Aff4Error::ShortRead {
                    target: uri.to_string(),
                    expected: length,
                    actual: 0,
                });
            }
            self.position += got as u64;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MapStream {
    uri: String,
    size: u64,
    entries: Vec<MapEntry>,
    targets: Vec<Target>,
    dependents: HashMap<String, Dependent>,
    /// Logical offset where the next extent has to start.
    next: u64,
    entry_pos: usize,
    /// Bytes of the current extent already produced.
    consumed: u64,
}

impl MapStream {
    pub(crate) fn open(resolver: &mut Resolver<'_>, uri: &str) -> Result<Self> {
        let store = resolver.store();
        let idx_name = blob_path(uri, "idx");
        let idx = store
            .read_blob(&idx_name)?
            .ok_or_else(|| Aff4Error::not_found(idx_name))?;
        let map_name = blob_path(uri, "map");
        let raw = store
            .read_blob(&map_name)?
            .ok_or_else(|| Aff4Error::not_found(map_name))?;
        let entries = parse_entries(&raw)?;

        let mut dependents = HashMap::new();
        let dependent_uris = resolver.graph().values(uri, "dependentStream").to_vec();
        for dep in dependent_uris {
            let stream = resolver.resolve(&dep)?;
            dependents.insert(
                dep,
                Dependent {
                    stream,
                    position: 0,
                },
            );
        }

        let idx = String::from_utf8(idx)
            .map_err(|e| Aff4Error::corruption(format!("{}: idx is not UTF-8: {}", uri, e)))?;
        let targets: Vec<Target> = idx
            .split('\n')
            .map(|line| Target::classify(line, |id| dependents.contains_key(id)))
            .collect();
        for (i, t) in targets.iter().enumerate() {
            match t {
                Target::Unknown(id) => warn!("{}: target {} '{}' is not resolvable", uri, i, id),
                Target::Malformed(id) => warn!("{}: target {} '{}' is malformed", uri, i, id),
                Target::Empty if i + 1 != targets.len() => {
                    warn!("{}: target {} is an empty line", uri, i)
                }
                _ => {}
            }
        }

        let size = resolver.graph().first_u64(uri, "size").unwrap_or(0);
        debug!(
            "Map {}: size {}, {} extents, {} targets, {} dependent streams",
            uri,
            size,
            entries.len(),
            targets.len(),
            dependents.len()
        );

        Ok(Self {
            uri: uri.to_string(),
            size,
            entries,
            targets,
            dependents,
            next: 0,
            entry_pos: 0,
            consumed: 0,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Produces the next `len` bytes of `entry` from its target.
    fn produce(&mut self, entry: &MapEntry, len: usize) -> Result<Vec<u8>> {
        let target = self.targets.get(entry.target_id as usize).ok_or_else(|| {
            Aff4Error::corruption(format!(
                "{}: extent at {} uses target {} but idx only has {}",
                self.uri,
                entry.mapped_offset,
                entry.target_id,
                self.targets.len()
            ))
        })?;

        match target {
            Target::Zero | Target::UnknownData => Ok(vec![0u8; len]),
            Target::Symbolic(byte) => Ok(vec![*byte; len]),
            Target::Dependent(_) if len == 0 => Ok(Vec::new()),
            Target::Dependent(id) => {
                let dep = self
                    .dependents
                    .get_mut(id)
                    .ok_or_else(|| Aff4Error::UnresolvedTarget(id.clone()))?;
                if self.consumed == 0 {
                    dep.seek_to(id, entry.target_offset, entry.length)?;
                }
                let mut buf = vec![0u8; len];
                let got = dep.stream.fill(&mut buf)?;
                dep.position += got as u64;
                if got != len {
                    return Err(Aff4Error::ShortRead {
                        target: id.clone(),
                        expected: entry.length,
                        actual: self.consumed + got as u64,
                    });
                }
                Ok(buf)
            }
            Target::Malformed(id) => Err(Aff4Error::corruption(format!(
                "{}: cannot decode symbolic stream '{}'",
                self.uri, id
            ))),
            Target::Empty => Err(Aff4Error::UnresolvedTarget(format!(
                "<empty idx line {}>",
                entry.target_id
            ))),
            Target::Unknown(id) => Err(Aff4Error::UnresolvedTarget(id.clone())),
        }
    }
}

impl ChunkSource for MapStream {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let entry = match self.entries.get(self.entry_pos) {
            Some(entry) => *entry,
            None => return Ok(None),
        };

        if self.consumed == 0 {
            if entry.mapped_offset != self.next {
                return Err(Aff4Error::corruption(format!(
                    "{}: extent {} starts at {} but the previous one ended at {}",
                    self.uri, self.entry_pos, entry.mapped_offset, self.next
                )));
            }
            debug!(
                "{}: extent {} [{}..+{}) -> target {} @ {}",
                self.uri,
                self.entry_pos,
                entry.mapped_offset,
                entry.length,
                entry.target_id,
                entry.target_offset
            );
        }

        let piece = (entry.length - self.consumed).min(MAX_PIECE) as usize;
        let data = self.produce(&entry, piece)?;
        self.consumed += piece as u64;

        if self.consumed == entry.length {
            self.next = entry.mapped_offset.checked_add(entry.length).ok_or_else(|| {
                Aff4Error::corruption(format!(
                    "{}: extent {} overflows the address space",
                    self.uri, self.entry_pos
                ))
            })?;
            self.entry_pos += 1;
            self.consumed = 0;
        }
        Ok(Some(data))
    }

    fn rewind(&mut self) {
        self.next = 0;
        self.entry_pos = 0;
        self.consumed = 0;
        for dep in self.dependents.values_mut() {
            dep.stream.rewind();
            dep.position = 0;
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_entries(entries: &[MapEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * MapEntry::SIZE);
    for e in entries {
        out.extend_from_slice(&e.mapped_offset.to_le_bytes());
        out.extend_from_slice(&e.length.to_le_bytes());
        out.extend_from_slice(&e.target_offset.to_le_bytes());
        out.extend_from_slice(&e.target_id.to_le_bytes());
    }
    out
}
