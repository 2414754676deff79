use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use crate::compress::Compressor;
use crate::error::{Result, ShortenError};
use crate::id::BlobId;

/// An identifier paired with the blob bytes to persist.
///
/// Borrowed from the row for the duration of one save call.
#[derive(Debug, Clone, Copy)]
pub struct BlobInfo<'a> {
    pub id: &'a BlobId,
    pub blob: &'a [u8],
}

impl<'a> BlobInfo<'a> {
    pub fn new(id: &'a BlobId, blob: &'a [u8]) -> Self {
        Self { id, blob }
    }
}

/// Persists a blob and confirms the identifier it was stored under.
///
/// The returned id is what the row mapper writes back into the row. A
/// backend may rewrite it (e.g. on a collision policy); the bundled ones echo
/// the input id.
pub trait BlobSink {
    fn save(&mut self, info: BlobInfo<'_>) -> Result<BlobId>;

    /// Wrap this sink so every payload is compressed before it is stored.
    fn with_compression<C: Compressor>(self, compressor: C) -> CompressedSink<Self, C>
    where
        Self: Sized,
    {
        CompressedSink::new(self, compressor)
    }
}

impl<S: BlobSink + ?Sized> BlobSink for &mut S {
    fn save(&mut self, info: BlobInfo<'_>) -> Result<BlobId> {
        (**self).save(info)
    }
}

impl<S: BlobSink + ?Sized> BlobSink for Box<S> {
    fn save(&mut self, info: BlobInfo<'_>) -> Result<BlobId> {
        (**self).save(info)
    }
}

/// Read side of a blob store.
pub trait BlobSource {
    fn load(&self, id: &BlobId) -> Result<Vec<u8>>;

    /// Wrap this source so every payload is decompressed after loading.
    fn with_decompression<C: Compressor>(self, compressor: C) -> DecompressingSource<Self, C>
    where
        Self: Sized,
    {
        DecompressingSource {
            inner: self,
            compressor,
        }
    }
}

impl<S: BlobSource + ?Sized> BlobSource for &S {
    fn load(&self, id: &BlobId) -> Result<Vec<u8>> {
        (**self).load(id)
    }
}

impl<S: BlobSource + ?Sized> BlobSource for Box<S> {
    fn load(&self, id: &BlobId) -> Result<Vec<u8>> {
        (**self).load(id)
    }
}

/// Sink adapter that compresses each payload before delegating.
///
/// One scratch buffer is reused for every save. `save` takes `&mut self`, so
/// a single instance can never serve two rows at once; parallel callers need
/// one `CompressedSink` each.
pub struct CompressedSink<S, C> {
    inner: S,
    compressor: C,
    scratch: Vec<u8>,
}

impl<S: BlobSink, C: Compressor> CompressedSink<S, C> {
    pub fn new(inner: S, compressor: C) -> Self {
        Self {
            inner,
            compressor,
            scratch: Vec::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: BlobSink, C: Compressor> BlobSink for CompressedSink<S, C> {
    fn save(&mut self, info: BlobInfo<'_>) -> Result<BlobId> {
        self.compressor.compress(info.blob, &mut self.scratch)?;
        self.inner.save(BlobInfo::new(info.id, &self.scratch))
    }
}

pub struct DecompressingSource<S, C> {
    inner: S,
    compressor: C,
}

impl<S: BlobSource, C: Compressor> BlobSource for DecompressingSource<S, C> {
    fn load(&self, id: &BlobId) -> Result<Vec<u8>> {
        let stored = self.inner.load(id)?;
        self.compressor.decompress(&stored)
    }
}

/// In-memory store, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<BlobId, Vec<u8>>,
    saves: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &BlobId) -> Option<&[u8]> {
        self.blobs.get(id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of save calls, including overwrites of the same id.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl BlobSink for MemoryBlobStore {
    fn save(&mut self, info: BlobInfo<'_>) -> Result<BlobId> {
        self.saves += 1;
        self.blobs.insert(info.id.clone(), info.blob.to_vec());
        Ok(info.id.clone())
    }
}

impl BlobSource for MemoryBlobStore {
    fn load(&self, id: &BlobId) -> Result<Vec<u8>> {
        self.get(id)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ShortenError::Storage {
                path: PathBuf::from(id.to_string()),
                source: io::Error::new(io::ErrorKind::NotFound, "no blob stored for this id"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::CompressionType;

    /// Reverses the payload, so tests can see the transform was applied.
    struct Reverse;

    impl Compressor for Reverse {
        fn compression_type(&self) -> CompressionType {
            CompressionType::None
        }

        fn compress(&self, original: &[u8], out: &mut Vec<u8>) -> Result<()> {
            out.clear();
            out.extend(original.iter().rev());
            Ok(())
        }

        fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
            Ok(compressed.iter().rev().copied().collect())
        }
    }

    #[test]
    fn compressed_sink_transforms_before_delegating() {
        let mut sink = MemoryBlobStore::new().with_compression(Reverse);
        let id = BlobId::Int(1);
        let saved = sink.save(BlobInfo::new(&id, b"abc")).unwrap();
        assert_eq!(saved, id);
        assert_eq!(sink.inner().get(&id), Some(&b"cba"[..]));
    }

    #[test]
    fn scratch_reuse_does_not_leak_previous_payload() {
        let mut sink = MemoryBlobStore::new().with_compression(Reverse);
        let (a, b) = (BlobId::Int(1), BlobId::Int(2));
        sink.save(BlobInfo::new(&a, b"a much longer payload")).unwrap();
        sink.save(BlobInfo::new(&b, b"xy")).unwrap();
        assert_eq!(sink.inner().get(&b), Some(&b"yx"[..]));
    }

    #[test]
    fn decompressing_source_inverts_the_sink() {
        let mut sink = MemoryBlobStore::new().with_compression(Reverse);
        let id = BlobId::from("k");
        sink.save(BlobInfo::new(&id, b"payload")).unwrap();
        let source = sink.into_inner().with_decompression(Reverse);
        assert_eq!(source.load(&id).unwrap(), b"payload");
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryBlobStore::new();
        let id = BlobId::Int(9);
        store.save(BlobInfo::new(&id, b"1")).unwrap();
        store.save(BlobInfo::new(&id, b"2")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.saves(), 2);
        assert!(store.load(&BlobId::Int(10)).is_err());
    }
}
