use blobext_core::compress::{CompressionType, Compressor};
use blobext_core::Result;

/// Identity compressor: blobs are stored verbatim.
///
/// Useful for payloads that are already compressed (JPEG, MP4) where a
/// second pass would only grow them.
pub struct PassThroughCompressor;

impl Compressor for PassThroughCompressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::None
    }

    fn compress(&self, original: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        out.extend_from_slice(original);
        Ok(())
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
