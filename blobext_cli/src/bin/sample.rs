//! Sample stream generator
//!
//! Writes a small Avro (or BXROWS1) stream to feed `blobext shorten`, plus
//! the schema JSON it uses so the same file can be passed as `--schema`.
//!
//! The first two rows are fixed; `--rows` appends deterministic synthetic
//! rows with blobs that compress well.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blobext_core::{
    parse_avro_schema, AvroRowWriter, RecordSchema, Row, RowEncoder, RowWriter, StreamFormat, Value,
};

const SCHEMA: &str = r#"{
    "type": "record",
    "name": "sample_table1",
    "fields": [
        {"name": "pid", "type": "long"},
        {"name": "price", "type": "double"},
        {"name": "name", "type": "string"},
        {"name": "data", "type": ["null", "bytes", "long"]}
    ]
}"#;

const NAMES: &[&str] = &["run", "fuji", "helo", "mount", "river", "stone"];

#[derive(Parser)]
#[command(name = "blobext-sample", about = "Write a sample record stream")]
struct Cli {
    /// Output stream ("-" writes stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,
    /// Container format: avro | bxrows
    #[arg(long, default_value = "avro")]
    format: StreamFormat,
    /// Also write the schema JSON here
    #[arg(long)]
    schema_out: Option<PathBuf>,
    /// Synthetic rows to append after the two fixed ones
    #[arg(long, default_value_t = 0)]
    rows: u64,
    /// Size of each synthetic blob in bytes
    #[arg(long, default_value_t = 4096)]
    blob_size: usize,
}

fn row(pid: i64, price: f64, name: &str, data: Vec<u8>) -> Row {
    let mut row = Row::new();
    row.insert("pid".into(), Value::Long(pid));
    row.insert("price".into(), Value::Double(price));
    row.insert("name".into(), Value::from(name));
    row.insert("data".into(), Value::Bytes(data));
    row
}

/// Same `i` always yields the same row.
fn synthetic_row(i: u64, blob_size: usize) -> Row {
    let name = NAMES[(i as usize * 7 + 3) % NAMES.len()];
    let data: Vec<u8> = name.bytes().cycle().take(blob_size).collect();
    let price = ((i * 137 + 42) % 10_000) as f64 / 100.0;
    row(1_000 + i as i64, price, name, data)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
    let cli = Cli::parse();

    if let Some(path) = &cli.schema_out {
        std::fs::write(path, SCHEMA).with_context(|| format!("writing schema {:?}", path))?;
    }

    let out: Box<dyn Write> = if cli.output.to_str() == Some("-") {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(&cli.output).with_context(|| format!("creating {:?}", cli.output))?)
    };

    let written = match cli.format {
        StreamFormat::Bxrows => {
            let mut writer = RowWriter::new(out, RecordSchema::parse(SCHEMA)?)?;
            let n = write_sample(&mut writer, &cli)?;
            writer.finish()?;
            n
        }
        StreamFormat::Avro => {
            let schema = parse_avro_schema(SCHEMA)?;
            let mut writer = AvroRowWriter::new(out, &schema)?;
            let n = write_sample(&mut writer, &cli)?;
            writer.finish()?;
            n
        }
    };

    info!(rows = written, format = %cli.format, "sample written");
    Ok(())
}

fn write_sample<E: RowEncoder>(writer: &mut E, cli: &Cli) -> Result<u64> {
    RowEncoder::write_row(writer, &row(42, 42.195, "run", b"helo".to_vec()))?;
    RowEncoder::write_row(writer, &row(634, 3.776, "fuji", b"mount".to_vec()))?;
    for i in 0..cli.rows {
        RowEncoder::write_row(writer, &synthetic_row(i, cli.blob_size))?;
    }
    Ok(2 + cli.rows)
}
