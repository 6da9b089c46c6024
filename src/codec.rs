//! Decompression capability used by image streams.
//!
//! A stream is made of chunks that are either compressed with the volume codec
//! or stored verbatim (when compression would not have made them smaller).
//! Nothing on disk tells the two apart, so the decoder tries the codec first
//! and keeps the raw bytes when it refuses them.

use std::fmt;

/// A decompressor for individual chunks.
pub trait Codec: fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Decompresses one chunk. An error means the input is not valid for this codec.
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, String>;
}

/// Raw (unframed) Snappy, the default AFF4 chunk compressor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Snappy;

impl Codec for Snappy {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, String> {
        snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| e.to_string())
    }
}

/// Decodes `chunk` with `codec`, falling back to the literal bytes.
pub fn decode_or_literal(codec: &dyn Codec, chunk: &[u8]) -> Vec<u8> {
    match codec.decompress(chunk) {
        Ok(data) => data,
        Err(e) => {
            log::trace!(
                "{} refused a {} byte chunk ({}), keeping it as stored data",
                codec.name(),
                chunk.len(),
                e
            );
            chunk.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snappy_roundtrip_through_decoder() {
        let plain = vec![0x41u8; 4096];
        let packed = snap::raw::Encoder::new().compress_vec(&plain).unwrap();
        assert!(packed.len() < plain.len());
        assert_eq!(decode_or_literal(&Snappy, &packed), plain);
    }

    #[test]
    fn test_invalid_chunk_is_passed_through() {
        // 0xff.. is not a valid snappy length preamble.
        let stored = vec![0xffu8, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01, 0x02];
        assert!(Snappy.decompress(&stored).is_err());
        assert_eq!(decode_or_literal(&Snappy, &stored), stored);
    }
}
