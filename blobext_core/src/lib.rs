pub mod avro;
pub mod compress;
pub mod config;
pub mod error;
pub mod format;
pub mod fs;
pub mod id;
pub mod mapper;
pub mod pipeline;
mod record;
pub mod reader;
pub mod schema;
pub mod store;
pub mod value;
pub mod writer;

pub use avro::{load_avro_schema, parse_avro_schema, AvroRowReader, AvroRowWriter, AvroSchema};
pub use compress::{CompressionType, Compressor};
pub use config::{ErrorPolicy, InputConfig, ShortenConfig, StreamFormat};
pub use error::{ErrorKind, Result, ShortenError};
pub use fs::{FsBlobStore, PathConfig};
pub use id::BlobId;
pub use mapper::{BlobFieldPolicy, MapStats, MapperConfig, RowMapper, RowRestorer};
pub use pipeline::{CancellationToken, Pipeline, RowFailure, RowResult, RowStage};
pub use reader::RowReader;
pub use schema::{load_schema, RecordSchema};
pub use store::{BlobInfo, BlobSink, BlobSource, CompressedSink, DecompressingSource, MemoryBlobStore};
pub use value::{Row, Value};
pub use writer::{write_rows, RowEncoder, RowWriter, RunSummary};
