use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ShortenError};
use crate::id::BlobId;
use crate::store::{BlobInfo, BlobSink, BlobSource};
use crate::value::{Row, Value};

/// What happens to the blob field once its bytes are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlobFieldPolicy {
    /// Leave the blob bytes in the row; only the id field is rewritten.
    #[default]
    Keep,
    /// Replace the blob with `null`.
    Clear,
    /// Replace the blob with the stored id's value.
    ReplaceWithId,
}

impl BlobFieldPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            BlobFieldPolicy::Keep => "keep",
            BlobFieldPolicy::Clear => "clear",
            BlobFieldPolicy::ReplaceWithId => "replace-with-id",
        }
    }
}

impl fmt::Display for BlobFieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlobFieldPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "keep" => Ok(BlobFieldPolicy::Keep),
            "clear" => Ok(BlobFieldPolicy::Clear),
            "replace-with-id" => Ok(BlobFieldPolicy::ReplaceWithId),
            other => Err(format!(
                "unknown blob field policy '{}' (expected keep, clear, replace-with-id)",
                other
            )),
        }
    }
}

/// Which fields of a row hold the blob and its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    blob_field: String,
    id_field: String,
    policy: BlobFieldPolicy,
}

impl MapperConfig {
    /// Both names must be non-empty and distinct.
    pub fn new(blob_field: impl Into<String>, id_field: impl Into<String>) -> Result<Self> {
        let blob_field = blob_field.into();
        let id_field = id_field.into();
        let problems = Self::problems(&blob_field, &id_field);
        if !problems.is_empty() {
            return Err(ShortenError::InvalidConfig { problems });
        }
        Ok(Self {
            blob_field,
            id_field,
            policy: BlobFieldPolicy::default(),
        })
    }

    pub(crate) fn problems(blob_field: &str, id_field: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if blob_field.is_empty() {
            problems.push("blob field name is empty".to_string());
        }
        if id_field.is_empty() {
            problems.push("blob id field name is empty".to_string());
        }
        if !blob_field.is_empty() && blob_field == id_field {
            problems.push(format!(
                "blob field and blob id field are both '{}'",
                blob_field
            ));
        }
        problems
    }

    pub fn with_policy(mut self, policy: BlobFieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn blob_field(&self) -> &str {
        &self.blob_field
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn policy(&self) -> BlobFieldPolicy {
        self.policy
    }

    /// Extract the blob bytes. `null` reads as an empty blob.
    fn blob_of<'r>(&self, row: &'r Row) -> Result<&'r [u8]> {
        match row.get(&self.blob_field) {
            None => Err(ShortenError::BlobFieldMissing {
                field: self.blob_field.clone(),
            }),
            Some(Value::Null) => Ok(&[]),
            Some(Value::Bytes(b)) => Ok(b),
            Some(other) => Err(ShortenError::InvalidBlobType {
                field: self.blob_field.clone(),
                found: other.type_name(),
            }),
        }
    }

    fn id_of(&self, row: &Row) -> Result<BlobId> {
        let value = row
            .get(&self.id_field)
            .ok_or_else(|| ShortenError::IdentifierFieldMissing {
                field: self.id_field.clone(),
            })?;
        BlobId::from_value(value)
    }
}

/// Running totals of a [`RowMapper`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    pub blobs_saved: u64,
    /// Blob bytes before compression.
    pub bytes_saved: u64,
}

/// Moves the blob of each row into a [`BlobSink`].
pub struct RowMapper<S> {
    config: MapperConfig,
    sink: S,
    stats: MapStats,
}

impl<S: BlobSink> RowMapper<S> {
    pub fn new(config: MapperConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            stats: MapStats::default(),
        }
    }

    pub fn stats(&self) -> MapStats {
        self.stats
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Store the row's blob and rewrite the row.
    ///
    /// Exactly one save per row that passes validation; no retries. The row
    /// is only touched after the save succeeded, so on error it is exactly
    /// as the decoder produced it.
    pub fn map_row(&mut self, row: &mut Row) -> Result<BlobId> {
        let blob = self.config.blob_of(row)?;
        let id = self.config.id_of(row)?;
        let blob_len = blob.len();

        let saved = self.sink.save(BlobInfo::new(&id, blob))?;

        row.insert(self.config.id_field.clone(), saved.to_value());
        match self.config.policy {
            BlobFieldPolicy::Keep => {}
            BlobFieldPolicy::Clear => {
                row.insert(self.config.blob_field.clone(), Value::Null);
            }
            BlobFieldPolicy::ReplaceWithId => {
                row.insert(self.config.blob_field.clone(), saved.to_value());
            }
        }
        self.stats.blobs_saved += 1;
        self.stats.bytes_saved += blob_len as u64;
        tracing::trace!(id = %saved, bytes = blob_len, "row mapped");
        Ok(saved)
    }
}

/// Read path: puts stored blob bytes back into the blob field.
pub struct RowRestorer<S> {
    config: MapperConfig,
    source: S,
    empty_as_null: bool,
}

impl<S: BlobSource> RowRestorer<S> {
    pub fn new(config: MapperConfig, source: S) -> Self {
        Self {
            config,
            source,
            empty_as_null: false,
        }
    }

    /// Restore empty blobs as `null` instead of empty bytes.
    ///
    /// A `null` blob is stored as an empty file, so only the output schema
    /// can tell the two apart; turn this on when the blob field admits null.
    pub fn with_empty_as_null(mut self, on: bool) -> Self {
        self.empty_as_null = on;
        self
    }

    /// Load the blob of the row's id and write it into the blob field.
    ///
    /// A missing blob field is not an error here, since `Clear` may have
    /// written `null` or the field may have been dropped from the schema.
    pub fn restore_row(&self, row: &mut Row) -> Result<BlobId> {
        let id = self.config.id_of(row)?;
        let blob = self.source.load(&id)?;
        let value = if blob.is_empty() && self.empty_as_null {
            Value::Null
        } else {
            Value::Bytes(blob)
        };
        row.insert(self.config.blob_field.clone(), value);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryBlobStore;

    fn row(fields: &[(&str, Value)]) -> Row {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn mapper() -> RowMapper<MemoryBlobStore> {
        RowMapper::new(MapperConfig::new("blob", "id").unwrap(), MemoryBlobStore::new())
    }

    /// Sink that confirms every blob under a fixed, different id.
    struct Renaming(BlobId);

    impl BlobSink for Renaming {
        fn save(&mut self, _info: BlobInfo<'_>) -> Result<BlobId> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl BlobSink for Failing {
        fn save(&mut self, _info: BlobInfo<'_>) -> Result<BlobId> {
            Err(ShortenError::Storage {
                path: "full/1.bin".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }
    }

    #[test]
    fn config_rejects_empty_and_equal_names() {
        assert!(MapperConfig::new("", "id").is_err());
        assert!(MapperConfig::new("blob", "").is_err());
        let err = MapperConfig::new("x", "x").unwrap_err();
        assert!(err.to_string().contains("'x'"));
        match MapperConfig::new("", "").unwrap_err() {
            ShortenError::InvalidConfig { problems } => assert_eq!(problems.len(), 2),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn maps_blob_and_keeps_blob_field() {
        let mut m = mapper();
        let mut r = row(&[("blob", Value::Bytes(vec![1, 2, 3])), ("id", Value::Long(42))]);

        let id = m.map_row(&mut r).unwrap();

        assert_eq!(id, BlobId::Int(42));
        assert_eq!(r["id"], Value::Long(42));
        assert_eq!(r["blob"], Value::Bytes(vec![1, 2, 3]));
        assert_eq!(m.sink().get(&id), Some(&[1u8, 2, 3][..]));
        assert_eq!(m.stats(), MapStats { blobs_saved: 1, bytes_saved: 3 });
    }

    #[test]
    fn id_field_takes_the_sink_confirmed_id() {
        let mut m = RowMapper::new(
            MapperConfig::new("blob", "id").unwrap(),
            Renaming(BlobId::from("renamed")),
        );
        let mut r = row(&[("blob", Value::Bytes(vec![9])), ("id", Value::Long(1))]);
        m.map_row(&mut r).unwrap();
        assert_eq!(r["id"], Value::String("renamed".into()));
    }

    #[test]
    fn null_blob_is_stored_empty() {
        let mut m = mapper();
        let mut r = row(&[("blob", Value::Null), ("id", Value::String("empty".into()))]);
        m.map_row(&mut r).unwrap();
        assert_eq!(m.sink().get(&BlobId::from("empty")), Some(&[][..]));
    }

    #[test]
    fn missing_blob_field_leaves_row_untouched() {
        let mut m = mapper();
        let original = row(&[("id", Value::Long(1)), ("name", Value::from("run"))]);
        let mut r = original.clone();

        let err = m.map_row(&mut r).unwrap_err();

        assert!(matches!(err, ShortenError::BlobFieldMissing { ref field } if field == "blob"));
        assert_eq!(r, original);
        assert_eq!(m.sink().saves(), 0);
    }

    #[test]
    fn wrong_blob_type() {
        let mut m = mapper();
        let mut r = row(&[("blob", Value::from("text")), ("id", Value::Long(1))]);
        let err = m.map_row(&mut r).unwrap_err();
        assert!(matches!(err, ShortenError::InvalidBlobType { found: "string", .. }));
    }

    #[test]
    fn missing_id_field() {
        let mut m = mapper();
        let mut r = row(&[("blob", Value::Bytes(vec![1]))]);
        let err = m.map_row(&mut r).unwrap_err();
        assert!(matches!(err, ShortenError::IdentifierFieldMissing { ref field } if field == "id"));
    }

    #[test]
    fn float_id_is_invalid() {
        let mut m = mapper();
        let mut r = row(&[("blob", Value::Bytes(vec![1])), ("id", Value::Double(42.195))]);
        let err = m.map_row(&mut r).unwrap_err();
        assert!(matches!(err, ShortenError::InvalidIdentifier(_)));
        assert_eq!(m.sink().saves(), 0);
    }

    #[test]
    fn sink_failure_leaves_row_untouched() {
        let mut m = RowMapper::new(
            MapperConfig::new("blob", "id")
                .unwrap()
                .with_policy(BlobFieldPolicy::ReplaceWithId),
            Failing,
        );
        let original = row(&[("blob", Value::Bytes(vec![1])), ("id", Value::Long(1))]);
        let mut r = original.clone();
        let err = m.map_row(&mut r).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert_eq!(r, original);
    }

    #[test]
    fn clear_and_replace_policies() {
        let fixed = [3u8; 16];
        for (policy, expected) in [
            (BlobFieldPolicy::Clear, Value::Null),
            (BlobFieldPolicy::ReplaceWithId, Value::Fixed(fixed.to_vec())),
        ] {
            let mut m = RowMapper::new(
                MapperConfig::new("blob", "id").unwrap().with_policy(policy),
                MemoryBlobStore::new(),
            );
            let mut r = row(&[("blob", Value::Bytes(vec![5; 64])), ("id", Value::Fixed(fixed.to_vec()))]);
            m.map_row(&mut r).unwrap();
            assert_eq!(r["blob"], expected, "policy {policy}");
            assert_eq!(r["id"], Value::Fixed(fixed.to_vec()));
        }
    }

    #[test]
    fn restorer_reattaches_bytes() {
        let mut m = RowMapper::new(
            MapperConfig::new("blob", "id")
                .unwrap()
                .with_policy(BlobFieldPolicy::Clear),
            MemoryBlobStore::new(),
        );
        let mut r = row(&[("blob", Value::Bytes(b"helo".to_vec())), ("id", Value::Long(42))]);
        m.map_row(&mut r).unwrap();
        assert_eq!(r["blob"], Value::Null);

        let restorer = RowRestorer::new(m.config().clone(), m.into_sink());
        restorer.restore_row(&mut r).unwrap();
        assert_eq!(r["blob"], Value::Bytes(b"helo".to_vec()));
    }

    #[test]
    fn null_blob_comes_back_as_null_when_asked() {
        let mut m = mapper();
        let mut r = row(&[("blob", Value::Null), ("id", Value::Long(7))]);
        m.map_row(&mut r).unwrap();
        let store = m.into_sink();
        assert_eq!(store.get(&BlobId::Int(7)), Some(&[][..]));

        let cfg = MapperConfig::new("blob", "id").unwrap();
        let plain = RowRestorer::new(cfg.clone(), &store);
        plain.restore_row(&mut r).unwrap();
        assert_eq!(r["blob"], Value::Bytes(Vec::new()));

        let nullable = RowRestorer::new(cfg, &store).with_empty_as_null(true);
        nullable.restore_row(&mut r).unwrap();
        assert_eq!(r["blob"], Value::Null);
    }

    #[test]
    fn policy_names_parse() {
        for p in [BlobFieldPolicy::Keep, BlobFieldPolicy::Clear, BlobFieldPolicy::ReplaceWithId] {
            assert_eq!(p.name().parse::<BlobFieldPolicy>().unwrap(), p);
        }
        assert!("drop".parse::<BlobFieldPolicy>().is_err());
    }
}
