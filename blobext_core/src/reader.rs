use std::io::{BufReader, ErrorKind, Read};

use xxhash_rust::xxh3::xxh3_64;

use crate::config::InputConfig;
use crate::error::{Result, ShortenError};
use crate::format::{StreamHeader, FLAG_HAS_CHECKSUM, FRAME_PREFIX_SIZE, HEADER_SIZE};
use crate::record::decode_row;
use crate::schema::RecordSchema;
use crate::value::Row;

/// Streaming decoder for BXROWS1 record streams.
///
/// # Open sequence
/// 1. Read the 16-byte header (magic, version, flags, schema length).
/// 2. Read and parse the embedded schema JSON.
///
/// # Iteration
/// Each `next` reads exactly one frame: the 12-byte prefix, then the payload
/// into a reused buffer, verifying the checksum before decoding. Only one
/// record is held in memory at a time. A clean EOF on a frame boundary ends
/// the sequence. The first error also ends it, since a damaged frame leaves
/// no way to find the next boundary.
pub struct RowReader<R> {
    inner: BufReader<R>,
    pub header: StreamHeader,
    schema: RecordSchema,
    limits: InputConfig,
    frame: Vec<u8>,
    records_read: u64,
    done: bool,
}

impl<R: Read> RowReader<R> {
    pub fn new(reader: R, limits: InputConfig) -> Result<Self> {
        let mut inner = BufReader::new(reader);

        let mut header_buf = [0u8; HEADER_SIZE];
        inner.read_exact(&mut header_buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ShortenError::decode("stream ends inside the header"),
            _ => ShortenError::Io(e),
        })?;
        let header = StreamHeader::from_bytes(&header_buf).map_err(ShortenError::Decode)?;

        if u64::from(header.schema_len) > limits.schema_size_max() {
            return Err(ShortenError::decode(format!(
                "embedded schema of {} bytes exceeds the {} byte limit",
                header.schema_len,
                limits.schema_size_max()
            )));
        }
        let mut schema_buf = vec![0u8; header.schema_len as usize];
        inner.read_exact(&mut schema_buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ShortenError::decode("stream ends inside the schema"),
            _ => ShortenError::Io(e),
        })?;
        let text = String::from_utf8(schema_buf)
            .map_err(|e| ShortenError::decode(format!("embedded schema is not UTF-8: {}", e)))?;
        let schema = RecordSchema::parse(&text)?;

        Ok(Self {
            inner,
            header,
            schema,
            limits,
            frame: Vec::new(),
            records_read: 0,
            done: false,
        })
    }

    /// Schema embedded in the stream header.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Fill the frame prefix; `None` on a clean EOF before its first byte.
    fn read_prefix(&mut self) -> Result<Option<[u8; FRAME_PREFIX_SIZE]>> {
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        let mut filled = 0;
        while filled < FRAME_PREFIX_SIZE {
            match self.inner.read(&mut prefix[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(ShortenError::decode(format!(
                        "record {} ends inside its frame prefix",
                        self.records_read
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(prefix))
    }

    fn read_record(&mut self) -> Result<Option<Row>> {
        let prefix = match self.read_prefix()? {
            Some(prefix) => prefix,
            None => return Ok(None),
        };
        let record_len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        let mut checksum_bytes = [0u8; 8];
        checksum_bytes.copy_from_slice(&prefix[4..12]);
        let checksum = u64::from_le_bytes(checksum_bytes);

        if record_len > self.limits.record_size_max() {
            return Err(ShortenError::decode(format!(
                "record {} of {} bytes exceeds the {} byte limit",
                self.records_read,
                record_len,
                self.limits.record_size_max()
            )));
        }

        self.frame.clear();
        self.frame.resize(record_len, 0);
        self.inner.read_exact(&mut self.frame).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ShortenError::decode(format!(
                "record {} is truncated (expected {} bytes)",
                self.records_read, record_len
            )),
            _ => ShortenError::Io(e),
        })?;

        if self.header.has_flag(FLAG_HAS_CHECKSUM) {
            let computed = xxh3_64(&self.frame);
            if computed != checksum {
                return Err(ShortenError::decode(format!(
                    "record {} checksum mismatch: expected {:016x}, got {:016x}",
                    self.records_read, checksum, computed
                )));
            }
        }

        let row = decode_row(&self.frame, &self.limits)?;
        self.records_read += 1;
        Ok(Some(row))
    }
}

impl<R: Read> Iterator for RowReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
