//! Decompression of archive parts.
//!
//! The codec is picked from the object's file extension; parts without a
//! known extension are read as-is.

use crate::utils::errors::{RestoreError, Result};
use std::io::Read;

pub type BoxedReader = Box<dyn Read + Send>;

pub trait Decompressor: Send + Sync {
    /// Extension (without dot) of objects this codec handles.
    fn file_extension(&self) -> &'static str;

    fn decompress(&self, src: BoxedReader) -> Result<BoxedReader>;
}

/// zstd frames, as written by the backup uploader.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdDecompressor;

impl Decompressor for ZstdDecompressor {
    fn file_extension(&self) -> &'static str {
        "zst"
    }

    fn decompress(&self, src: BoxedReader) -> Result<BoxedReader> {
        let decoder = zstd::stream::read::Decoder::new(src)
            .map_err(|e| RestoreError::Compression(format!("zstd decoder init failed: {e}")))?;
        Ok(Box::new(decoder))
    }
}

/// Brotli streams, from uploaders built with brotli compression.
#[cfg(feature = "brotli")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BrotliDecompressor;

#[cfg(feature = "brotli")]
impl Decompressor for BrotliDecompressor {
    fn file_extension(&self) -> &'static str {
        "br"
    }

    fn decompress(&self, src: BoxedReader) -> Result<BoxedReader> {
        Ok(Box::new(brotli::Decompressor::new(src, BROTLI_BUFFER_SIZE)))
    }
}

#[cfg(feature = "brotli")]
const BROTLI_BUFFER_SIZE: usize = 64 * 1024;

#[cfg(feature = "brotli")]
static DECOMPRESSORS: &[&dyn Decompressor] = &[&ZstdDecompressor, &BrotliDecompressor];

#[cfg(not(feature = "brotli"))]
static DECOMPRESSORS: &[&dyn Decompressor] = &[&ZstdDecompressor];

/// Codec for `object_name`, or `None` when the object is stored uncompressed.
pub fn find_decompressor(object_name: &str) -> Option<&'static dyn Decompressor> {
    let (_, ext) = object_name.rsplit_once('.')?;
    DECOMPRESSORS
        .iter()
        .copied()
        .find(|d| d.file_extension() == ext)
}

/// Wrap `src` in the codec matching `object_name`.
pub fn open_decompressed(object_name: &str, src: BoxedReader) -> Result<BoxedReader> {
    match find_decompressor(object_name) {
        Some(decompressor) => decompressor.decompress(src),
        None => Ok(src),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_find_by_extension() {
        assert!(find_decompressor("part_1.tar.zst").is_some());
        assert!(find_decompressor("part_1.tar").is_none());
        assert!(find_decompressor("part_1").is_none());
    }

    #[test]
    fn test_zstd_roundtrip_through_reader() -> Result<()> {
        let payload = b"tar bytes".repeat(100);
        let compressed = zstd::stream::encode_all(&payload[..], 3)?;

        let mut reader = open_decompressed("part_3.tar.zst", Box::new(Cursor::new(compressed)))?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;

        assert_eq!(out, payload);
        Ok(())
    }

    #[test]
    fn test_plain_objects_pass_through() -> Result<()> {
        let raw = Box::new(Cursor::new(b"raw".to_vec()));
        let mut reader = open_decompressed("part_1.tar", raw)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        assert_eq!(out, b"raw");
        Ok(())
    }

    #[cfg(feature = "brotli")]
    #[test]
    fn test_brotli_part() -> Result<()> {
        use std::io::Write;

        let payload = b"brotli tar bytes".repeat(64);
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(&payload)?;
        }

        assert!(find_decompressor("part_2.tar.br").is_some());
        let mut reader = open_decompressed("part_2.tar.br", Box::new(Cursor::new(compressed)))?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;

        assert_eq!(out, payload);
        Ok(())
    }
}
