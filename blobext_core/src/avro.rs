use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::Path;

use apache_avro::schema::RecordField;
use apache_avro::types::Value as AvroValue;
use apache_avro::{Reader, Writer};

pub use apache_avro::Schema as AvroSchema;

use crate::config::InputConfig;
use crate::error::{Result, ShortenError};
use crate::format::MAX_NESTING;
use crate::schema::read_schema_source;
use crate::value::{Row, Value};
use crate::writer::RowEncoder;

/// Parse an Avro schema whose top level is a record.
pub fn parse_avro_schema(text: &str) -> Result<AvroSchema> {
    let schema = AvroSchema::parse_str(text).map_err(|e| ShortenError::InvalidSchema(e.to_string()))?;
    record_fields(&schema).map_err(|_| {
        ShortenError::InvalidSchema("top-level Avro type must be a record".to_string())
    })?;
    Ok(schema)
}

/// Read and parse an Avro schema file of at most `size_max` bytes.
pub fn load_avro_schema(path: &Path, size_max: u64) -> Result<AvroSchema> {
    parse_avro_schema(&read_schema_source(path, size_max)?)
}

fn record_fields(schema: &AvroSchema) -> Result<&[RecordField]> {
    match schema {
        AvroSchema::Record(record) => Ok(&record.fields),
        _ => Err(ShortenError::decode("top-level Avro type is not a record")),
    }
}

fn record_name(schema: &AvroSchema) -> String {
    match schema {
        AvroSchema::Record(record) => record.name.name.clone(),
        _ => String::new(),
    }
}

/// Whether field `name` of a record schema admits `null`.
pub fn field_admits_null(schema: &AvroSchema, name: &str) -> bool {
    let Ok(fields) = record_fields(schema) else {
        return false;
    };
    match fields.iter().find(|f| f.name == name).map(|f| &f.schema) {
        Some(AvroSchema::Null) => true,
        Some(AvroSchema::Union(union)) => union.variants().iter().any(|v| *v == AvroSchema::Null),
        _ => false,
    }
}

// ── Value conversion ───────────────────────────────────────────────────────

fn checked_len(len: usize, limits: &InputConfig) -> Result<()> {
    if len > limits.blob_size_max() {
        return Err(ShortenError::decode(format!(
            "field of {} bytes exceeds the {} byte limit",
            len,
            limits.blob_size_max()
        )));
    }
    Ok(())
}

/// Map a decoded Avro value onto [`Value`].
///
/// Unions collapse to their branch. Enums and UUIDs become strings; date,
/// time and UTC timestamp logical types become their underlying int or long.
/// Anything else (decimals, durations, records nested in fields) is rejected.
fn from_avro(value: AvroValue, limits: &InputConfig, depth: usize) -> Result<Value> {
    if depth > MAX_NESTING {
        return Err(ShortenError::decode("values nested too deeply"));
    }
    Ok(match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Boolean(b),
        AvroValue::Int(i) | AvroValue::Date(i) | AvroValue::TimeMillis(i) => Value::Int(i),
        AvroValue::Long(i)
        | AvroValue::TimeMicros(i)
        | AvroValue::TimestampMillis(i)
        | AvroValue::TimestampMicros(i) => Value::Long(i),
        AvroValue::Float(f) => Value::Float(f),
        AvroValue::Double(f) => Value::Double(f),
        AvroValue::Bytes(b) => {
            checked_len(b.len(), limits)?;
            Value::Bytes(b)
        }
        AvroValue::String(s) | AvroValue::Enum(_, s) => {
            checked_len(s.len(), limits)?;
            Value::String(s)
        }
        AvroValue::Fixed(_, b) => {
            checked_len(b.len(), limits)?;
            Value::Fixed(b)
        }
        AvroValue::Uuid(u) => Value::String(u.to_string()),
        AvroValue::Union(_, inner) => from_avro(*inner, limits, depth)?,
        AvroValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| from_avro(v, limits, depth + 1))
                .collect::<Result<_>>()?,
        ),
        AvroValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, from_avro(v, limits, depth + 1)?)))
                .collect::<Result<BTreeMap<_, _>>>()?,
        ),
        other => {
            return Err(ShortenError::decode(format!(
                "unsupported Avro value {:?}",
                other
            )))
        }
    })
}

fn to_avro(value: &Value) -> AvroValue {
    match value {
        Value::Null => AvroValue::Null,
        Value::Boolean(b) => AvroValue::Boolean(*b),
        Value::Int(i) => AvroValue::Int(*i),
        Value::Long(i) => AvroValue::Long(*i),
        Value::Float(f) => AvroValue::Float(*f),
        Value::Double(f) => AvroValue::Double(*f),
        Value::Bytes(b) => AvroValue::Bytes(b.clone()),
        Value::String(s) => AvroValue::String(s.clone()),
        Value::Fixed(b) => AvroValue::Fixed(b.len(), b.clone()),
        Value::Array(items) => AvroValue::Array(items.iter().map(to_avro).collect()),
        Value::Map(entries) => AvroValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_avro(v)))
                .collect::<HashMap<_, _>>(),
        ),
    }
}

// ── Reader ─────────────────────────────────────────────────────────────────

/// Streaming decoder for Avro object container files.
///
/// The writer schema comes from the file header and must be a record; every
/// datum becomes one [`Row`]. The first error ends the sequence.
pub struct AvroRowReader<R: Read> {
    inner: Reader<'static, R>,
    schema: AvroSchema,
    limits: InputConfig,
    records_read: u64,
    done: bool,
}

impl<R: Read> AvroRowReader<R> {
    pub fn new(reader: R, limits: InputConfig) -> Result<Self> {
        let inner = Reader::new(reader)
            .map_err(|e| ShortenError::decode(format!("invalid Avro header: {}", e)))?;
        let schema = inner.writer_schema().clone();
        let schema_len = schema.canonical_form().len() as u64;
        if schema_len > limits.schema_size_max() {
            return Err(ShortenError::decode(format!(
                "embedded schema of {} bytes exceeds the {} byte limit",
                schema_len,
                limits.schema_size_max()
            )));
        }
        record_fields(&schema)?;
        Ok(Self {
            inner,
            schema,
            limits,
            records_read: 0,
            done: false,
        })
    }

    /// Writer schema of the input.
    pub fn schema(&self) -> &AvroSchema {
        &self.schema
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn to_row(&self, datum: AvroValue) -> Result<Row> {
        match datum {
            AvroValue::Record(fields) => fields
                .into_iter()
                .map(|(name, v)| Ok((name, from_avro(v, &self.limits, 0)?)))
                .collect(),
            other => Err(ShortenError::decode(format!(
                "record {} is not an Avro record: {:?}",
                self.records_read, other
            ))),
        }
    }
}

impl<R: Read> Iterator for AvroRowReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.inner.next()? {
            Ok(datum) => self.to_row(datum),
            Err(e) => Err(ShortenError::decode(format!(
                "record {}: {}",
                self.records_read, e
            ))),
        };
        match item {
            Ok(_) => self.records_read += 1,
            Err(_) => self.done = true,
        }
        Some(item)
    }
}

// ── Writer ─────────────────────────────────────────────────────────────────

/// Streaming encoder for Avro object container files.
///
/// Each row is flushed as its own block, so a consumer on the other end of
/// a pipe sees it right away.
pub struct AvroRowWriter<'s, W: Write> {
    inner: Writer<'s, W>,
    schema: &'s AvroSchema,
    name: String,
    fields: Vec<String>,
    records_written: u64,
}

impl<'s, W: Write> AvroRowWriter<'s, W> {
    pub fn new(writer: W, schema: &'s AvroSchema) -> Result<Self> {
        let fields = record_fields(schema)
            .map_err(|_| ShortenError::InvalidSchema("top-level Avro type must be a record".to_string()))?
            .iter()
            .map(|f| f.name.clone())
            .collect();
        Ok(Self {
            inner: Writer::new(schema, writer),
            schema,
            name: record_name(schema),
            fields,
            records_written: 0,
        })
    }

    pub fn schema(&self) -> &AvroSchema {
        self.schema
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Resolve `row` against the schema and append it as one block.
    ///
    /// Resolution happens before anything is written, so a mismatch leaves
    /// the stream as it was.
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        if let Some(extra) = row.keys().find(|k| !self.fields.contains(k)) {
            return Err(self.mismatch(format!("unknown field '{}'", extra)));
        }
        let record = AvroValue::Record(
            self.fields
                .iter()
                .map(|name| (name.clone(), row.get(name).map_or(AvroValue::Null, to_avro)))
                .collect(),
        );
        let record = record
            .resolve(self.schema)
            .map_err(|e| self.mismatch(e.to_string()))?;

        self.inner
            .append(record)
            .map_err(|e| ShortenError::encode(e.to_string()))?;
        self.inner
            .flush()
            .map_err(|e| ShortenError::encode(e.to_string()))?;
        self.records_written += 1;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| ShortenError::encode(e.to_string()))
    }

    fn mismatch(&self, reason: String) -> ShortenError {
        ShortenError::SchemaMismatch {
            schema: self.name.clone(),
            reason,
        }
    }
}

impl<W: Write> RowEncoder for AvroRowWriter<'_, W> {
    fn write_row(&mut self, row: &Row) -> Result<()> {
        AvroRowWriter::write_row(self, row)
    }
}
