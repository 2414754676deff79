//! Binary encoding of a single row (the payload of one record frame).
//!
//! ```text
//! field_count:u32
//! repeated field_count times: name_len:u16, name (UTF-8), value
//! value = tag:u8 + body
//!   null     -
//!   boolean  u8 (0 | 1)
//!   int      i32 LE        long    i64 LE
//!   float    f32 LE        double  f64 LE
//!   bytes / string / fixed   len:u32 + data
//!   array    count:u32 + values
//!   map      count:u32 + (key_len:u32, key, value) pairs
//! ```

use std::collections::BTreeMap;

use crate::config::InputConfig;
use crate::error::{Result, ShortenError};
use crate::format::*;
use crate::value::{Row, Value};

/// Append the encoding of `fields` (already in schema order) to `out`.
pub(crate) fn encode_row(fields: &[(&str, &Value)], out: &mut Vec<u8>) -> Result<()> {
    out.extend_from_slice(&len_u32(fields.len(), "field count")?.to_le_bytes());
    for (name, value) in fields {
        let name_len = u16::try_from(name.len()).map_err(|_| {
            ShortenError::InvalidSchema(format!("field name '{}' is longer than 65535 bytes", name))
        })?;
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        encode_value(value, out)?;
    }
    Ok(())
}

fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(u8::from(*b));
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Long(i) => {
            out.push(TAG_LONG);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Double(f) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Value::Bytes(b) => encode_sized(TAG_BYTES, b, out)?,
        Value::String(s) => encode_sized(TAG_STRING, s.as_bytes(), out)?,
        Value::Fixed(b) => encode_sized(TAG_FIXED, b, out)?,
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&len_u32(items.len(), "array length")?.to_le_bytes());
            for item in items {
                encode_value(item, out)?;
            }
        }
        Value::Map(entries) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&len_u32(entries.len(), "map length")?.to_le_bytes());
            for (key, item) in entries {
                out.extend_from_slice(&len_u32(key.len(), "map key length")?.to_le_bytes());
                out.extend_from_slice(key.as_bytes());
                encode_value(item, out)?;
            }
        }
    }
    Ok(())
}

fn encode_sized(tag: u8, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.push(tag);
    out.extend_from_slice(&len_u32(data.len(), "value length")?.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        ShortenError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} {} does not fit the record format", what, len),
        ))
    })
}

/// Decode one record payload.
pub(crate) fn decode_row(payload: &[u8], limits: &InputConfig) -> Result<Row> {
    let mut dec = Decoder {
        buf: payload,
        pos: 0,
        field_max: limits.blob_size_max(),
    };
    let count = dec.u32()? as usize;
    let mut row = Row::new();
    for _ in 0..count {
        let name_len = u16::from_le_bytes(dec.array::<2>()?) as usize;
        let name = dec.utf8(name_len)?;
        let value = dec.value(0)?;
        if row.insert(name.clone(), value).is_some() {
            return Err(ShortenError::decode(format!("duplicate field '{}'", name)));
        }
    }
    if dec.pos != payload.len() {
        return Err(ShortenError::decode(format!(
            "{} trailing bytes after the last field",
            payload.len() - dec.pos
        )));
    }
    Ok(row)
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    field_max: usize,
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ShortenError::decode("record payload ends mid-value"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array::<4>()?))
    }

    /// Length prefix of a variable-size value, checked against the limit.
    fn sized_len(&mut self) -> Result<usize> {
        let len = self.u32()? as usize;
        if len > self.field_max {
            return Err(ShortenError::decode(format!(
                "field of {} bytes exceeds the {} byte limit",
                len, self.field_max
            )));
        }
        Ok(len)
    }

    fn utf8(&mut self, len: usize) -> Result<String> {
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| ShortenError::decode(format!("invalid UTF-8: {}", e)))
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_NESTING {
            return Err(ShortenError::decode("values nested too deeply"));
        }
        let tag = self.array::<1>()?[0];
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_BOOLEAN => match self.array::<1>()?[0] {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => return Err(ShortenError::decode(format!("invalid boolean byte {}", other))),
            },
            TAG_INT => Value::Int(i32::from_le_bytes(self.array()?)),
            TAG_LONG => Value::Long(i64::from_le_bytes(self.array()?)),
            TAG_FLOAT => Value::Float(f32::from_le_bytes(self.array()?)),
            TAG_DOUBLE => Value::Double(f64::from_le_bytes(self.array()?)),
            TAG_BYTES => {
                let len = self.sized_len()?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            TAG_STRING => {
                let len = self.sized_len()?;
                Value::String(self.utf8(len)?)
            }
            TAG_FIXED => {
                let len = self.sized_len()?;
                Value::Fixed(self.take(len)?.to_vec())
            }
            TAG_ARRAY => {
                let count = self.u32()? as usize;
                // Every element takes at least its tag byte.
                let mut items = Vec::with_capacity(count.min(self.buf.len() - self.pos));
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Value::Array(items)
            }
            TAG_MAP => {
                let count = self.u32()? as usize;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key_len = self.sized_len()?;
                    let key = self.utf8(key_len)?;
                    let item = self.value(depth + 1)?;
                    entries.insert(key, item);
                }
                Value::Map(entries)
            }
            other => return Err(ShortenError::decode(format!("unknown value tag {}", other))),
        };
        Ok(value)
    }
}
