use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, ShortenError};
use crate::id::BlobId;
use crate::store::{BlobInfo, BlobSink, BlobSource};

/// Permission bits of newly created blob files (unix only).
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Where blobs land: `<dir>/<id text>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    pub dir: PathBuf,
    pub ext: String,
}

impl PathConfig {
    pub fn new(dir: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            ext: ext.into(),
        }
    }

    /// Derive the storage path of `id`.
    ///
    /// String ids that would not stay a single path component (empty, `.`,
    /// `..`, containing a separator or NUL) are rejected, so two distinct ids
    /// of one variant never share a path and no path leaves `dir`.
    pub fn path_for(&self, id: &BlobId) -> Result<PathBuf> {
        if let BlobId::Str(s) = id {
            if s.is_empty() || s == "." || s == ".." {
                return Err(ShortenError::invalid_id(format!(
                    "'{}' cannot be used as a file name",
                    s
                )));
            }
            if s.contains(['/', '\\', '\0']) {
                return Err(ShortenError::invalid_id(format!(
                    "'{}' contains a path separator or NUL",
                    s
                )));
            }
        }
        Ok(self.dir.join(format!("{}.{}", id, self.ext)))
    }
}

/// Filesystem blob store.
///
/// Each save is a whole-file create-or-truncate write. A failed write may
/// leave a truncated file behind; nothing is cleaned up.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    paths: PathConfig,
    mode: u32,
}

impl FsBlobStore {
    pub fn new(paths: PathConfig) -> Self {
        Self::with_mode(paths, DEFAULT_FILE_MODE)
    }

    pub fn with_mode(paths: PathConfig, mode: u32) -> Self {
        Self { paths, mode }
    }

    pub fn paths(&self) -> &PathConfig {
        &self.paths
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.mode);
        }
        let mut file = options.open(path)?;
        file.write_all(data)?;
        file.flush()
    }
}

impl BlobSink for FsBlobStore {
    fn save(&mut self, info: BlobInfo<'_>) -> Result<BlobId> {
        let path = self.paths.path_for(info.id)?;
        self.write_file(&path, info.blob)
            .map_err(|source| ShortenError::Storage {
                path: path.clone(),
                source,
            })?;
        debug!(id = %info.id, path = %path.display(), bytes = info.blob.len(), "blob stored");
        Ok(info.id.clone())
    }
}

impl BlobSource for FsBlobStore {
    fn load(&self, id: &BlobId) -> Result<Vec<u8>> {
        let path = self.paths.path_for(id)?;
        fs::read(&path).map_err(|source| ShortenError::Storage { path, source })
    }
}
