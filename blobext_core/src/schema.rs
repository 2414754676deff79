use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShortenError};
use crate::value::{Row, Value};

/// Primitive type names a field may admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Fixed,
    Array,
    Map,
}

impl ValueType {
    fn name(&self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Int => "int",
            ValueType::Long => "long",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::Bytes => "bytes",
            ValueType::String => "string",
            ValueType::Fixed => "fixed",
            ValueType::Array => "array",
            ValueType::Map => "map",
        }
    }
}

/// A type either by bare name (`"long"`) or as an object carrying a size
/// (`{"type": "fixed", "size": 16}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSpec {
    Name(ValueType),
    Detailed {
        #[serde(rename = "type")]
        ty: ValueType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
}

impl TypeSpec {
    fn admits(&self, value: &Value) -> bool {
        match self {
            TypeSpec::Name(ty) => ty.name() == value.type_name(),
            TypeSpec::Detailed { ty, size } => {
                if ty.name() != value.type_name() {
                    return false;
                }
                match (size, value) {
                    (Some(size), Value::Fixed(bytes)) => bytes.len() == *size,
                    _ => true,
                }
            }
        }
    }
}

/// A single type or a union (`["null", "bytes"]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldType {
    One(TypeSpec),
    Union(Vec<TypeSpec>),
}

impl FieldType {
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            FieldType::One(spec) => spec.admits(value),
            FieldType::Union(specs) => specs.iter().any(|s| s.admits(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

/// Record layout of a stream: field order and admitted types.
///
/// Written as JSON in the style of an Avro record schema:
///
/// ```json
/// {"type": "record", "name": "sample", "fields": [
///   {"name": "pid", "type": "long"},
///   {"name": "data", "type": ["null", "bytes"]}
/// ]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

static NULL: Value = Value::Null;

impl RecordSchema {
    pub fn parse(text: &str) -> Result<Self> {
        let schema: RecordSchema =
            serde_json::from_str(text).map_err(|e| ShortenError::InvalidSchema(e.to_string()))?;
        schema.check()?;
        Ok(schema)
    }

    fn check(&self) -> Result<()> {
        if self.kind != "record" {
            return Err(ShortenError::InvalidSchema(format!(
                "top-level type must be \"record\", got \"{}\"",
                self.kind
            )));
        }
        if self.fields.is_empty() {
            return Err(ShortenError::InvalidSchema(format!("record '{}' has no fields", self.name)));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(ShortenError::InvalidSchema("empty field name".to_string()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ShortenError::InvalidSchema(format!("duplicate field '{}'", field.name)));
            }
            if matches!(&field.ty, FieldType::Union(specs) if specs.is_empty()) {
                return Err(ShortenError::InvalidSchema(format!(
                    "field '{}' has an empty union",
                    field.name
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        // Serializing plain structs and enums cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Lay the row out in schema order, checking every value.
    ///
    /// A field absent from the row is written as `null` when the schema
    /// admits it. Row fields the schema does not know are an error, so no
    /// data is silently dropped.
    pub fn order<'r>(&'r self, row: &'r Row) -> Result<Vec<(&'r str, &'r Value)>> {
        if let Some(extra) = row.keys().find(|k| self.field(k).is_none()) {
            return Err(self.mismatch(format!("unknown field '{}'", extra)));
        }
        self.fields
            .iter()
            .map(|field| {
                let value = row.get(&field.name).unwrap_or(&NULL);
                if field.ty.admits(value) {
                    Ok((field.name.as_str(), value))
                } else if row.contains_key(&field.name) {
                    Err(self.mismatch(format!(
                        "field '{}' does not admit {}",
                        field.name,
                        value.type_name()
                    )))
                } else {
                    Err(self.mismatch(format!("required field '{}' is missing", field.name)))
                }
            })
            .collect()
    }

    fn mismatch(&self, reason: String) -> ShortenError {
        ShortenError::SchemaMismatch {
            schema: self.name.clone(),
            reason,
        }
    }
}

/// Read a schema source of at most `size_max` bytes.
pub(crate) fn read_schema_source(path: &Path, size_max: u64) -> Result<String> {
    let unreadable = |source| ShortenError::SchemaSource {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(unreadable)?;
    let mut text = String::new();
    file.take(size_max.saturating_add(1))
        .read_to_string(&mut text)
        .map_err(unreadable)?;
    if text.len() as u64 > size_max {
        return Err(ShortenError::SchemaTooLarge {
            path: path.to_path_buf(),
            limit: size_max,
        });
    }
    Ok(text)
}

/// Read and parse a schema file of at most `size_max` bytes.
pub fn load_schema(path: &Path, size_max: u64) -> Result<RecordSchema> {
    RecordSchema::parse(&read_schema_source(path, size_max)?)
}
