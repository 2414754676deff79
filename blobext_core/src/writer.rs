use std::io::{BufWriter, Write};

use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::ErrorPolicy;
use crate::error::{Result, ShortenError};
use crate::format::{StreamHeader, FLAG_HAS_CHECKSUM, FORMAT_VERSION};
use crate::pipeline::RowResult;
use crate::record::encode_row;
use crate::schema::RecordSchema;
use crate::value::Row;

/// Streaming encoder for BXROWS1 record streams.
///
/// # Layout written
/// ```text
/// [HEADER: 16 bytes][SCHEMA JSON]
/// [len:u32][xxh3:u64][ROW 0] [len:u32][xxh3:u64][ROW 1] ...
/// ```
///
/// Nothing is seeked back over, so the output may be a pipe. Every record is
/// flushed as soon as it is written; at most one encoded row is buffered.
pub struct RowWriter<W: Write> {
    out: BufWriter<W>,
    schema: RecordSchema,
    /// Encoded payload of the row being written, reused across rows.
    scratch: Vec<u8>,
    records_written: u64,
}

impl<W: Write> RowWriter<W> {
    /// Start a stream on `writer`, writing the header and schema.
    pub fn new(writer: W, schema: RecordSchema) -> Result<Self> {
        let mut out = BufWriter::new(writer);
        let schema_json = schema.to_json();
        let schema_len = u32::try_from(schema_json.len())
            .map_err(|_| ShortenError::InvalidSchema("schema JSON exceeds 4 GiB".to_string()))?;
        let header = StreamHeader {
            version: FORMAT_VERSION,
            flags: FLAG_HAS_CHECKSUM,
            schema_len,
        };
        out.write_all(&header.to_bytes())?;
        out.write_all(schema_json.as_bytes())?;
        out.flush()?;
        Ok(Self {
            out,
            schema,
            scratch: Vec::new(),
            records_written: 0,
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Validate `row` against the schema and append it as one record.
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        let fields = self.schema.order(row)?;
        self.scratch.clear();
        encode_row(&fields, &mut self.scratch)?;

        let record_len = u32::try_from(self.scratch.len()).map_err(|_| {
            ShortenError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("record of {} bytes exceeds 4 GiB", self.scratch.len()),
            ))
        })?;
        let checksum = xxh3_64(&self.scratch);

        self.out.write_all(&record_len.to_le_bytes())?;
        self.out.write_all(&checksum.to_le_bytes())?;
        self.out.write_all(&self.scratch)?;
        self.out.flush()?;
        self.records_written += 1;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.out
            .into_inner()
            .map_err(|e| ShortenError::Io(e.into_error()))
    }
}

/// Anything that appends rows to an output stream.
pub trait RowEncoder {
    fn write_row(&mut self, row: &Row) -> Result<()>;
}

impl<W: Write> RowEncoder for RowWriter<W> {
    fn write_row(&mut self, row: &Row) -> Result<()> {
        RowWriter::write_row(self, row)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows_written: u64,
    pub rows_skipped: u64,
}

/// Drain a pipeline into `writer`.
///
/// Under [`ErrorPolicy::FailFast`] the first failure aborts the run and is
/// returned. Under [`ErrorPolicy::SkipFailedRows`] rows that failed with a
/// data or backend error are logged and left out; stream errors and
/// cancellation abort either way.
pub fn write_rows<E, I>(writer: &mut E, rows: I, policy: ErrorPolicy) -> Result<RunSummary>
where
    E: RowEncoder + ?Sized,
    I: IntoIterator<Item = RowResult>,
{
    let mut summary = RunSummary::default();
    for item in rows {
        // Schema mismatches are caught before any byte of the row is written,
        // so they can be skipped like mapper failures.
        let error = match item {
            Ok(row) => match writer.write_row(&row) {
                Ok(()) => {
                    summary.rows_written += 1;
                    continue;
                }
                Err(e) => e,
            },
            Err(failure) => failure.into_error(),
        };
        if policy == ErrorPolicy::SkipFailedRows && error.is_row_scoped() {
            warn!(error = %error, "skipping row");
            summary.rows_skipped += 1;
            continue;
        }
        info!(
            rows_written = summary.rows_written,
            rows_skipped = summary.rows_skipped,
            "run aborted"
        );
        return Err(error);
    }
    Ok(summary)
}
