use std::fmt;
use std::io::{self, Write};

use crate::error::{Result, ShortenError};
use crate::value::Value;

/// Size of a fixed binary identifier in bytes.
pub const FIXED_ID_LEN: usize = 16;

/// Compact reference that replaces a blob inside a row.
///
/// Every variant has a deterministic text rendering (its `Display` output,
/// also used as the storage file stem) and a deterministic binary rendering
/// ([`BlobId::write_to`]). Both are injective within a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobId {
    /// Text: decimal. Binary: 8 bytes big-endian.
    Int(i64),
    /// Text: 32 lowercase hex chars. Binary: the 16 bytes verbatim.
    Fixed([u8; FIXED_ID_LEN]),
    /// Text: itself. Binary: UTF-8 bytes.
    Str(String),
}

impl BlobId {
    /// Convert a row value into an identifier.
    ///
    /// Only `long`, 16-byte `fixed`, and `string` values are identifiers. A
    /// `fixed` of any other size is rejected rather than truncated or padded.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Long(i) => Ok(BlobId::Int(*i)),
            Value::String(s) => Ok(BlobId::Str(s.clone())),
            Value::Fixed(bytes) => {
                let token: [u8; FIXED_ID_LEN] = bytes.as_slice().try_into().map_err(|_| {
                    ShortenError::invalid_id(format!(
                        "fixed id must be {} bytes, got {}",
                        FIXED_ID_LEN,
                        bytes.len()
                    ))
                })?;
                Ok(BlobId::Fixed(token))
            }
            other => Err(ShortenError::invalid_id(format!(
                "{} is not a supported id type (long, fixed[16], string)",
                other.type_name()
            ))),
        }
    }

    /// The value stored back into a row after externalization.
    pub fn to_value(&self) -> Value {
        match self {
            BlobId::Int(i) => Value::Long(*i),
            BlobId::Fixed(token) => Value::Fixed(token.to_vec()),
            BlobId::Str(s) => Value::String(s.clone()),
        }
    }

    /// Write the canonical binary form, returning the number of bytes written.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<u64> {
        match self {
            BlobId::Int(i) => {
                let buf = i.to_be_bytes();
                w.write_all(&buf)?;
                Ok(buf.len() as u64)
            }
            BlobId::Fixed(token) => {
                w.write_all(token)?;
                Ok(token.len() as u64)
            }
            BlobId::Str(s) => {
                w.write_all(s.as_bytes())?;
                Ok(s.len() as u64)
            }
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobId::Int(i) => write!(f, "{}", i),
            BlobId::Fixed(token) => {
                for b in token {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            BlobId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for BlobId {
    fn from(i: i64) -> Self {
        BlobId::Int(i)
    }
}

impl From<[u8; FIXED_ID_LEN]> for BlobId {
    fn from(token: [u8; FIXED_ID_LEN]) -> Self {
        BlobId::Fixed(token)
    }
}

impl From<&str> for BlobId {
    fn from(s: &str) -> Self {
        BlobId::Str(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn text_rendering() {
        assert_eq!(BlobId::Int(42).to_string(), "42");
        assert_eq!(BlobId::Int(-7).to_string(), "-7");
        let mut token = [0u8; 16];
        token[0] = 0xab;
        token[15] = 0x01;
        assert_eq!(
            BlobId::Fixed(token).to_string(),
            "ab000000000000000000000000000001"
        );
        assert_eq!(BlobId::from("photo-1").to_string(), "photo-1");
    }

    #[test]
    fn binary_rendering() {
        assert_eq!(BlobId::Int(1).to_binary(), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(BlobId::Int(-1).to_binary(), vec![0xff; 8]);
        assert_eq!(BlobId::Fixed([7u8; 16]).to_binary(), vec![7u8; 16]);
        assert_eq!(BlobId::from("héllo").to_binary(), "héllo".as_bytes());

        let mut sink = Vec::new();
        let n = BlobId::Int(42).write_to(&mut sink).unwrap();
        assert_eq!(n, 8);
    }

    #[test]
    fn double_is_not_an_id() {
        let err = BlobId::from_value(&Value::Double(42.195)).unwrap_err();
        assert!(matches!(err, ShortenError::InvalidIdentifier(_)));
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn int_and_bytes_are_not_ids() {
        assert!(BlobId::from_value(&Value::Int(42)).is_err());
        assert!(BlobId::from_value(&Value::Bytes(vec![0; 16])).is_err());
        assert!(BlobId::from_value(&Value::Null).is_err());
    }

    #[test]
    fn wrong_length_fixed_is_rejected() {
        for len in [0usize, 15, 17, 32] {
            let err = BlobId::from_value(&Value::Fixed(vec![1; len])).unwrap_err();
            assert!(
                err.to_string().contains(&len.to_string()),
                "message should mention the bad length: {err}"
            );
        }
    }

    fn any_id() -> impl Strategy<Value = BlobId> {
        prop_oneof![
            any::<i64>().prop_map(BlobId::Int),
            any::<[u8; 16]>().prop_map(BlobId::Fixed),
            ".*".prop_map(BlobId::Str),
        ]
    }

    proptest! {
        #[test]
        fn value_round_trip(id in any_id()) {
            prop_assert_eq!(BlobId::from_value(&id.to_value()).unwrap(), id);
        }

        #[test]
        fn int_text_is_injective(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            prop_assert_ne!(BlobId::Int(a).to_string(), BlobId::Int(b).to_string());
        }

        #[test]
        fn fixed_text_is_lowercase_hex(token in any::<[u8; 16]>()) {
            let text = BlobId::Fixed(token).to_string();
            prop_assert_eq!(text.len(), 32);
            prop_assert!(text.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }
}
