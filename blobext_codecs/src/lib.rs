mod gzip_codec;
mod passthrough;

pub use gzip_codec::GzipCompressor;
pub use passthrough::PassThroughCompressor;

use blobext_core::{
    CompressedSink, CompressionType, Compressor, DecompressingSource, FsBlobStore, Result,
    RowMapper, RowRestorer, ShortenConfig, ShortenError,
};
use blobext_core::store::{BlobSink, BlobSource};
use tracing::debug;

/// Mapper assembled from configuration: compress, then write to the filesystem.
pub type FsRowMapper = RowMapper<CompressedSink<FsBlobStore, Box<dyn Compressor>>>;

/// Restorer assembled from configuration: read from the filesystem, then decompress.
pub type FsRowRestorer = RowRestorer<DecompressingSource<FsBlobStore, Box<dyn Compressor>>>;

/// Resolve a compressor from its configured type.
///
/// `level` is only meaningful for gzip. `bzip2` is a known name without a
/// bundled implementation and fails with
/// [`ShortenError::UnsupportedCompressionType`].
pub fn compressor_for(kind: CompressionType, level: u32) -> Result<Box<dyn Compressor>> {
    match kind {
        CompressionType::None => Ok(Box::new(PassThroughCompressor)),
        CompressionType::Gzip => Ok(Box::new(GzipCompressor::new(level)?)),
        CompressionType::Bzip2 => Err(ShortenError::UnsupportedCompressionType(kind)),
    }
}

/// Validate `cfg` and resolve its compressor, in that order.
fn resolve(cfg: &ShortenConfig) -> Result<Box<dyn Compressor>> {
    cfg.validate()?;
    let kind = cfg.compression_type()?;
    let compressor = compressor_for(kind, cfg.compression_level)?;
    debug!(compression = %kind, level = cfg.compression_level, "compressor resolved");
    Ok(compressor)
}

/// Build the shorten-side mapper described by `cfg`.
pub fn build_mapper(cfg: &ShortenConfig) -> Result<FsRowMapper> {
    let compressor = resolve(cfg)?;
    let sink = FsBlobStore::new(cfg.path_config()).with_compression(compressor);
    Ok(RowMapper::new(cfg.mapper_config()?, sink))
}

/// Build the restore-side counterpart of [`build_mapper`].
pub fn build_restorer(cfg: &ShortenConfig) -> Result<FsRowRestorer> {
    let compressor = resolve(cfg)?;
    let source = FsBlobStore::new(cfg.path_config()).with_decompression(compressor);
    Ok(RowRestorer::new(cfg.mapper_config()?, source))
}
