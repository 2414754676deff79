/// Magic bytes opening every BXROWS1 stream.
pub const MAGIC: &[u8; 8] = b"BXROWS1\n";

/// Current (and only) format version.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed-size part of the stream header in bytes.
///   magic[8] + version:u16 + flags:u16 + schema_len:u32
///   = 8 + 2 + 2 + 4 = 16
/// The schema JSON (`schema_len` bytes) follows immediately.
pub const HEADER_SIZE: usize = 16;

/// Size of the prefix before each record payload.
///   record_len:u32 + checksum:u64 = 12
pub const FRAME_PREFIX_SIZE: usize = 12;

// ── Flags ──────────────────────────────────────────────────────────────────

/// Every record frame carries a valid xxhash3-64 of its payload.
pub const FLAG_HAS_CHECKSUM: u16 = 1 << 0;

// ── Value tags ─────────────────────────────────────────────────────────────

pub const TAG_NULL: u8 = 0;
pub const TAG_BOOLEAN: u8 = 1;
pub const TAG_INT: u8 = 2;
pub const TAG_LONG: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_DOUBLE: u8 = 5;
pub const TAG_BYTES: u8 = 6;
pub const TAG_STRING: u8 = 7;
pub const TAG_FIXED: u8 = 8;
pub const TAG_ARRAY: u8 = 9;
pub const TAG_MAP: u8 = 10;

/// Deepest nesting of arrays/maps the decoder accepts.
pub const MAX_NESTING: usize = 64;

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded fixed part of the stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u16,
    pub flags: u16,
    /// Length of the schema JSON that follows the header.
    pub schema_len: u32,
}

impl StreamHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.schema_len.to_le_bytes());
        buf
    }

    /// Parse the fixed header, checking magic and version.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, String> {
        if &buf[..8] != MAGIC {
            return Err("invalid magic bytes, not a BXROWS1 stream".to_string());
        }
        let header = Self {
            version: u16::from_le_bytes([buf[8], buf[9]]),
            flags: u16::from_le_bytes([buf[10], buf[11]]),
            schema_len: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        };
        if header.version != FORMAT_VERSION {
            return Err(format!(
                "unsupported BXROWS version {} (only version {} is supported)",
                header.version, FORMAT_VERSION
            ));
        }
        Ok(header)
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}
