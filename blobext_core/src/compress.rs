use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ShortenError};

/// Default gzip level: fastest.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// Highest accepted deflate level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Compression applied to blob payloads before they reach the store.
///
/// `Bzip2` is a recognized name that no bundled compressor implements;
/// resolving it yields [`ShortenError::UnsupportedCompressionType`], which is
/// kept apart from a plain typo ([`ShortenError::InvalidCompressionType`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    None,
    Gzip,
    Bzip2,
}

impl CompressionType {
    pub const ALL: [CompressionType; 3] =
        [CompressionType::None, CompressionType::Gzip, CompressionType::Bzip2];

    /// Configuration name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Bzip2 => "bzip2",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionType {
    type Err = ShortenError;

    /// Exact, case-sensitive lookup.
    fn from_str(s: &str) -> Result<Self> {
        CompressionType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| ShortenError::InvalidCompressionType(s.to_string()))
    }
}

/// Byte transform applied to every blob before it is stored.
///
/// A compressor is selected once from configuration and reused for every
/// row of a run, so `compress` must give a complete, independently decodable
/// output for each call. The output buffer is owned by the caller and reused
/// across calls; implementations clear it before writing.
pub trait Compressor: Send + Sync {
    fn compression_type(&self) -> CompressionType;

    /// Compress `original` into `out`, replacing its previous contents.
    fn compress(&self, original: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Inverse of [`compress`](Compressor::compress), used by the restore path.
    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}

impl<C: Compressor + ?Sized> Compressor for Box<C> {
    fn compression_type(&self) -> CompressionType {
        (**self).compression_type()
    }

    fn compress(&self, original: &[u8], out: &mut Vec<u8>) -> Result<()> {
        (**self).compress(original, out)
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        (**self).decompress(compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_exactly() {
        assert_eq!("none".parse::<CompressionType>().unwrap(), CompressionType::None);
        assert_eq!("gzip".parse::<CompressionType>().unwrap(), CompressionType::Gzip);
        assert_eq!("bzip2".parse::<CompressionType>().unwrap(), CompressionType::Bzip2);
    }

    #[test]
    fn unknown_names_are_invalid() {
        for name in ["", "GZIP", "gz", "zstd", " none"] {
            let err = name.parse::<CompressionType>().unwrap_err();
            assert!(
                matches!(err, ShortenError::InvalidCompressionType(ref s) if s == name),
                "unexpected error for {name:?}: {err}"
            );
        }
    }

    #[test]
    fn display_matches_name() {
        for t in CompressionType::ALL {
            assert_eq!(t.to_string().parse::<CompressionType>().unwrap(), t);
        }
    }
}
