use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::compress::{CompressionType, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
use crate::error::{Result, ShortenError};
use crate::fs::PathConfig;
use crate::mapper::{BlobFieldPolicy, MapperConfig};

/// Default cap on a single variable-length field: 1 MiB.
pub const DEFAULT_BLOB_SIZE_MAX: usize = 1_048_576;

/// Room a record gets on top of one maximal blob when no record cap is set.
pub const DEFAULT_RECORD_HEADROOM: usize = 15 * 1_048_576;

/// Record cap under the default blob cap: 16 MiB.
pub const DEFAULT_RECORD_SIZE_MAX: usize = DEFAULT_BLOB_SIZE_MAX + DEFAULT_RECORD_HEADROOM;

/// Default cap on a schema source (file or embedded header): 1 MiB.
pub const DEFAULT_SCHEMA_SIZE_MAX: u64 = 1_048_576;

/// Memory bounds applied while decoding an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfig {
    blob_size_max: usize,
    /// `None` follows the blob cap.
    record_size_max: Option<usize>,
    schema_size_max: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            blob_size_max: DEFAULT_BLOB_SIZE_MAX,
            record_size_max: None,
            schema_size_max: DEFAULT_SCHEMA_SIZE_MAX,
        }
    }
}

impl InputConfig {
    pub fn with_blob_size_max(mut self, n: usize) -> Self {
        self.blob_size_max = n;
        self
    }

    /// Pin the record cap instead of deriving it from the blob cap.
    pub fn with_record_size_max(mut self, n: usize) -> Self {
        self.record_size_max = Some(n);
        self
    }

    pub fn with_schema_size_max(mut self, n: u64) -> Self {
        self.schema_size_max = n;
        self
    }

    pub fn blob_size_max(&self) -> usize {
        self.blob_size_max
    }

    /// Largest accepted record frame. Unless pinned, one blob at the blob cap
    /// plus [`DEFAULT_RECORD_HEADROOM`] for the other fields.
    pub fn record_size_max(&self) -> usize {
        self.record_size_max
            .unwrap_or_else(|| self.blob_size_max.saturating_add(DEFAULT_RECORD_HEADROOM))
    }

    pub fn schema_size_max(&self) -> u64 {
        self.schema_size_max
    }
}

/// Container of the record streams read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamFormat {
    /// Avro object container file.
    #[default]
    Avro,
    /// BXROWS1 frames with per-record checksums.
    Bxrows,
}

impl StreamFormat {
    pub fn name(&self) -> &'static str {
        match self {
            StreamFormat::Avro => "avro",
            StreamFormat::Bxrows => "bxrows",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "avro" => Ok(StreamFormat::Avro),
            "bxrows" => Ok(StreamFormat::Bxrows),
            other => Err(format!("unknown stream format '{}' (expected avro, bxrows)", other)),
        }
    }
}

/// What the encoder does with a row the pipeline failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the run on the first failure (no partial-success output).
    #[default]
    FailFast,
    /// Log and drop rows with data or backend errors; stream errors and
    /// cancellation still abort.
    SkipFailedRows,
}

/// Everything a shorten or restore run needs, read once at startup.
#[derive(Debug, Clone)]
pub struct ShortenConfig {
    pub blob_field: String,
    pub id_field: String,
    pub blob_policy: BlobFieldPolicy,
    /// Compression name as configured; resolved by [`ShortenConfig::compression_type`].
    pub compression: String,
    pub compression_level: u32,
    pub blob_dir: PathBuf,
    pub blob_ext: String,
    pub input: InputConfig,
    /// Output schema; `None` reuses the schema embedded in the input stream.
    pub schema_path: Option<PathBuf>,
    pub error_policy: ErrorPolicy,
}

impl ShortenConfig {
    pub fn new(
        blob_field: impl Into<String>,
        id_field: impl Into<String>,
        blob_dir: impl Into<PathBuf>,
        blob_ext: impl Into<String>,
    ) -> Self {
        Self {
            blob_field: blob_field.into(),
            id_field: id_field.into(),
            blob_policy: BlobFieldPolicy::default(),
            compression: CompressionType::None.name().to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            blob_dir: blob_dir.into(),
            blob_ext: blob_ext.into(),
            input: InputConfig::default(),
            schema_path: None,
            error_policy: ErrorPolicy::default(),
        }
    }

    pub fn with_compression(mut self, name: impl Into<String>, level: u32) -> Self {
        self.compression = name.into();
        self.compression_level = level;
        self
    }

    /// Check every plain setting and report all problems at once.
    ///
    /// Compression names are not checked here; [`compression_type`] keeps the
    /// unknown/unsupported distinction.
    ///
    /// [`compression_type`]: ShortenConfig::compression_type
    pub fn validate(&self) -> Result<()> {
        let mut problems = MapperConfig::problems(&self.blob_field, &self.id_field);
        if self.blob_dir.as_os_str().is_empty() {
            problems.push("blob directory is empty".to_string());
        }
        if self.blob_ext.is_empty() {
            problems.push("blob file extension is empty".to_string());
        } else if self.blob_ext.contains(['/', '\\', '\0']) {
            problems.push(format!("blob file extension '{}' contains a path separator", self.blob_ext));
        }
        // The level only means something to gzip.
        if self.compression == CompressionType::Gzip.name()
            && self.compression_level > MAX_COMPRESSION_LEVEL
        {
            problems.push(format!(
                "compression level {} is out of range 0..={}",
                self.compression_level, MAX_COMPRESSION_LEVEL
            ));
        }
        if self.input.blob_size_max == 0 {
            problems.push("blob size max must be positive".to_string());
        }
        if let Some(record_max) = self.input.record_size_max {
            if record_max < self.input.blob_size_max {
                problems.push(format!(
                    "record size max {} is below blob size max {}",
                    record_max, self.input.blob_size_max
                ));
            }
        }
        if self.input.schema_size_max == 0 {
            problems.push("schema size max must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ShortenError::InvalidConfig { problems })
        }
    }

    pub fn compression_type(&self) -> Result<CompressionType> {
        CompressionType::from_str(&self.compression)
    }

    pub fn mapper_config(&self) -> Result<MapperConfig> {
        Ok(MapperConfig::new(self.blob_field.clone(), self.id_field.clone())?
            .with_policy(self.blob_policy))
    }

    pub fn path_config(&self) -> PathConfig {
        PathConfig::new(self.blob_dir.clone(), self.blob_ext.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ShortenConfig {
        ShortenConfig::new("data", "pid", "/tmp/out", "bin")
    }

    #[test]
    fn defaults() {
        let cfg = valid();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.compression_type().unwrap(), CompressionType::None);
        assert_eq!(cfg.compression_level, 1);
        assert_eq!(cfg.input.blob_size_max(), 1_048_576);
        assert_eq!(cfg.error_policy, ErrorPolicy::FailFast);
        assert_eq!(cfg.blob_policy, BlobFieldPolicy::Keep);
    }

    #[test]
    fn problems_are_aggregated() {
        let cfg = ShortenConfig::new("", "", "", "").with_compression("gzip", 12);
        match cfg.validate().unwrap_err() {
            ShortenError::InvalidConfig { problems } => {
                assert_eq!(problems.len(), 5, "{problems:?}");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn compression_names_keep_their_error_kinds() {
        let cfg = valid().with_compression("lzma", 1);
        assert!(cfg.validate().is_ok());
        assert!(matches!(
            cfg.compression_type(),
            Err(ShortenError::InvalidCompressionType(_))
        ));
        let cfg = valid().with_compression("bzip2", 1);
        assert_eq!(cfg.compression_type().unwrap(), CompressionType::Bzip2);
    }

    #[test]
    fn level_is_only_checked_for_gzip() {
        assert!(valid().with_compression("none", 12).validate().is_ok());
        let err = valid().with_compression("gzip", 12).validate().unwrap_err();
        assert!(err.to_string().contains("compression level 12"), "{err}");
    }

    #[test]
    fn record_cap_follows_blob_cap() {
        let limits = InputConfig::default();
        assert_eq!(limits.record_size_max(), DEFAULT_RECORD_SIZE_MAX);

        let limits = InputConfig::default().with_blob_size_max(32 * 1_048_576);
        assert_eq!(limits.record_size_max(), 32 * 1_048_576 + DEFAULT_RECORD_HEADROOM);

        let pinned = limits.with_record_size_max(64);
        assert_eq!(pinned.record_size_max(), 64);
    }

    #[test]
    fn pinned_record_cap_below_blob_cap_is_rejected() {
        let mut cfg = valid();
        cfg.input = InputConfig::default()
            .with_blob_size_max(32 * 1_048_576)
            .with_record_size_max(DEFAULT_RECORD_SIZE_MAX);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("below blob size max"), "{err}");

        cfg.input = InputConfig::default().with_blob_size_max(32 * 1_048_576);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn stream_format_names() {
        assert_eq!(StreamFormat::default(), StreamFormat::Avro);
        for f in [StreamFormat::Avro, StreamFormat::Bxrows] {
            assert_eq!(f.name().parse::<StreamFormat>().unwrap(), f);
        }
        assert!("parquet".parse::<StreamFormat>().is_err());
    }

    #[test]
    fn path_config_follows_dir_and_ext() {
        let p = valid().path_config();
        assert_eq!(p.dir, PathBuf::from("/tmp/out"));
        assert_eq!(p.ext, "bin");
    }
}
