use std::io::{Read, Write};

use blobext_core::compress::{
    CompressionType, Compressor, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL,
};
use blobext_core::{Result, ShortenError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip compressor.
///
/// Each blob becomes one complete gzip member (the encoder is finished on
/// every call), so any stored file can be read back with plain `gunzip`.
/// Level 1 (fastest) is the default; blobs are usually written once and
/// read rarely.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self {
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl GzipCompressor {
    /// `level` must be within `0..=9`.
    pub fn new(level: u32) -> Result<Self> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(ShortenError::InvalidCompressionLevel {
                kind: CompressionType::Gzip,
                level,
            });
        }
        Ok(Self { level })
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Compressor for GzipCompressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Gzip
    }

    fn compress(&self, original: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        let mut enc = GzEncoder::new(out, Compression::new(self.level));
        enc.write_all(original).map_err(ShortenError::Compression)?;
        enc.finish().map_err(ShortenError::Compression)?;
        Ok(())
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        GzDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(ShortenError::Compression)?;
        Ok(raw)
    }
}
