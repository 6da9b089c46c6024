//! Bevy indexes: where each compressed chunk sits inside its bevy blob.
//!
//! Bevy `N` of a stream is stored as `<stream>/0000000N` and described by
//! `<stream>/0000000N.index`, a flat array of little-endian records:
//!
//! ```text
//! +----------------+-------------+
//! | bevy_offset u64| chunk_size  |
//! |                | u32         |
//! +----------------+-------------+   12 bytes, no padding
//! ```

use log::debug;

use crate::container::{bevy_id, blob_path, BlobStore};
use crate::error::{Aff4Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BevyIndexEntry {
    /// Offset of the chunk payload from the start of the bevy blob.
    pub bevy_offset: u64,
    /// Stored (possibly compressed) length of the chunk.
    pub chunk_size: u32,
}

impl BevyIndexEntry {
    pub const SIZE: usize = 12;

    fn parse(record: &[u8; Self::SIZE]) -> Self {
        let mut offset = [0u8; 8];
        let mut size = [0u8; 4];
        offset.copy_from_slice(&record[0..8]);
        size.copy_from_slice(&record[8..12]);
        Self {
            bevy_offset: u64::from_le_bytes(offset),
            chunk_size: u32::from_le_bytes(size),
        }
    }

    /// One past the last byte of the chunk inside the bevy.
    #[inline]
    pub fn end(&self) -> u64 {
        self.bevy_offset.saturating_add(self.chunk_size as u64)
    }
}

/// Parses a whole `.index` blob.
pub fn parse_index(data: &[u8]) -> Result<Vec<BevyIndexEntry>> {
    if data.len() % BevyIndexEntry::SIZE != 0 {
        return Err(Aff4Error::corruption(format!(
            "bevy index of {} bytes is not a whole number of {} byte records",
            data.len(),
            BevyIndexEntry::SIZE
        )));
    }
    Ok(data
        .chunks_exact(BevyIndexEntry::SIZE)
        .map(|record| {
            let mut buf = [0u8; BevyIndexEntry::SIZE];
            buf.copy_from_slice(record);
            BevyIndexEntry::parse(&buf)
        })
        .collect())
}

/// Checks that the entries tile the bevy from offset 0 without gaps or overlaps.
pub fn check_contiguous(entries: &[BevyIndexEntry]) -> Result<()> {
    let mut next = 0u64;
    for (i, entry) in entries.iter().enumerate() {
        if entry.bevy_offset != next {
            return Err(Aff4Error::corruption(format!(
                "bevy index entry {} starts at {} but the previous chunk ended at {}",
                i, entry.bevy_offset, next
            )));
        }
        next = entry.end();
    }
    Ok(())
}

/// The index entries of every bevy of one stream, bevy 0 first.
#[derive(Clone, Debug, Default)]
pub struct BevyIndex {
    bevies: Vec<Vec<BevyIndexEntry>>,
}

impl BevyIndex {
    /// Reads `00000000.index`, `00000001.index`, ... until one is missing.
    pub fn load(store: &dyn BlobStore, uri: &str) -> Result<Self> {
        let mut bevies = Vec::new();
        loop {
            let name = blob_path(uri, &format!("{}.index", bevy_id(bevies.len() as u64)));
            match store.read_blob(&name)? {
                Some(data) => {
                    let entries = parse_index(&data)?;
                    debug!("{}: {} chunks", name, entries.len());
                    bevies.push(entries);
                }
                None => break,
            }
        }
        debug!("Stream {} has {} bevies", uri, bevies.len());
        Ok(Self { bevies })
    }

    pub fn bevy(&self, n: usize) -> Option<&[BevyIndexEntry]> {
        self.bevies.get(n).map(Vec::as_slice)
    }

    pub fn bevy_count(&self) -> usize {
        self.bevies.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.bevies.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
pub(crate) fn encode_index(entries: &[BevyIndexEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * BevyIndexEntry::SIZE);
    for e in entries {
        out.extend_from_slice(&e.bevy_offset.to_le_bytes());
        out.extend_from_slice(&e.chunk_size.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::MemoryStore;

    fn entry(bevy_offset: u64, chunk_size: u32) -> BevyIndexEntry {
        BevyIndexEntry {
            bevy_offset,
            chunk_size,
        }
    }

    #[test]
    fn test_parse_index_layout() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0u64.to_le_bytes());
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(&100u64.to_le_bytes());
        raw.extend_from_slice(&0x1_0000u32.to_le_bytes());
        let entries = parse_index(&raw).unwrap();
        assert_eq!(entries, vec![entry(0, 100), entry(100, 0x1_0000)]);
        assert_eq!(entries[1].end(), 0x1_0064);
    }

    #[test]
    fn test_parse_index_rejects_truncated_record() {
        let err = parse_index(&[0u8; 13]).unwrap_err();
        assert!(matches!(err, Aff4Error::Corruption(_)));
        assert!(parse_index(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_contiguity() {
        assert!(check_contiguous(&[entry(0, 10), entry(10, 5), entry(15, 1)]).is_ok());
        assert!(check_contiguous(&[]).is_ok());
        assert!(check_contiguous(&[entry(1, 10)]).is_err());
        assert!(check_contiguous(&[entry(0, 10), entry(12, 5)]).is_err());
        assert!(check_contiguous(&[entry(0, 10), entry(8, 5)]).is_err());
    }

    #[test]
    fn test_load_stops_at_first_missing_index() {
        let uri = "aff4://stream";
        let mut store = MemoryStore::default();
        store.insert(
            blob_path(uri, "00000000.index"),
            encode_index(&[entry(0, 4), entry(4, 4)]),
        );
        store.insert(blob_path(uri, "00000001.index"), encode_index(&[entry(0, 7)]));
        // Not reachable: 00000002.index is missing.
        store.insert(blob_path(uri, "00000003.index"), encode_index(&[entry(0, 1)]));

        let index = BevyIndex::load(&store, uri).unwrap();
        assert_eq!(index.bevy_count(), 2);
        assert_eq!(index.chunk_count(), 3);
        assert_eq!(index.bevy(1).unwrap(), &[entry(0, 7)]);
        assert!(index.bevy(2).is_none());
    }

    #[test]
    fn test_load_without_any_index() {
        let index = BevyIndex::load(&MemoryStore::default(), "aff4://empty").unwrap();
        assert_eq!(index.bevy_count(), 0);
    }
}
