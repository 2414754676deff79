use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blobext_codecs::{build_mapper, build_restorer};
use blobext_core::avro::field_admits_null;
use blobext_core::compress::DEFAULT_COMPRESSION_LEVEL;
use blobext_core::config::{DEFAULT_BLOB_SIZE_MAX, DEFAULT_SCHEMA_SIZE_MAX};
use blobext_core::{
    load_avro_schema, load_schema, write_rows, AvroRowReader, AvroRowWriter, BlobFieldPolicy,
    CancellationToken, ErrorPolicy, InputConfig, Pipeline, Row, RowReader, RowStage, RowWriter,
    RunSummary, ShortenConfig, StreamFormat, Value,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "blobext",
    about = "Move blobs out of Avro or BXROWS1 record streams into a directory, and back",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store each row's blob as a file and rewrite the row
    Shorten {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        io: IoArgs,
        /// What to leave in the blob field: keep | clear | replace-with-id
        #[arg(long, env = "ENV_BLOB_FIELD_POLICY", default_value = "keep")]
        blob_field_policy: BlobFieldPolicy,
        /// Drop rows whose blob cannot be stored instead of aborting
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Load each row's blob back from the store into the blob field
    Restore {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        io: IoArgs,
    },
    /// Print the embedded schema and a summary of every record
    Inspect {
        /// Record stream ("-" reads stdin)
        #[arg(default_value = "-")]
        input: PathBuf,
        /// Container format: avro | bxrows
        #[arg(long, env = "ENV_STREAM_FORMAT", default_value = "avro")]
        format: StreamFormat,
        /// Print one line per record
        #[arg(long)]
        records: bool,
        /// Largest accepted variable-length field in bytes
        #[arg(long, env = "ENV_BLOB_SIZE_MAX", default_value_t = DEFAULT_BLOB_SIZE_MAX)]
        blob_size_max: usize,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// Field holding the blob bytes
    #[arg(long, env = "ENV_BLOB_KEY")]
    blob_key: String,
    /// Field holding the blob id (long, fixed[16], or string)
    #[arg(long, env = "ENV_BLOB_ID_KEY")]
    id_key: String,
    /// Directory the blob files live in
    #[arg(long, env = "ENV_BLOB_DIRNAME")]
    blob_dir: PathBuf,
    /// Extension of the blob files
    #[arg(long, env = "ENV_BLOB_EXT")]
    blob_ext: String,
    /// Compression: none | gzip | bzip2
    #[arg(long, env = "ENV_COMPRESS_TYPE", default_value = "none")]
    compress_type: String,
    /// Gzip level (0 to 9); ignored for other compressions
    #[arg(long, env = "ENV_COMPRESS_LEVEL", default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    compress_level: u32,
}

#[derive(Args)]
struct IoArgs {
    /// Input stream ("-" reads stdin)
    #[arg(short, long, default_value = "-")]
    input: PathBuf,
    /// Output stream ("-" writes stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,
    /// Container format of both streams: avro | bxrows
    #[arg(long, env = "ENV_STREAM_FORMAT", default_value = "avro")]
    format: StreamFormat,
    /// Output schema file; defaults to the schema embedded in the input
    #[arg(long, env = "ENV_SCHEMA_FILENAME")]
    schema: Option<PathBuf>,
    /// Largest accepted schema source in bytes
    #[arg(long, env = "ENV_SCHEMA_SIZE_LIMIT", default_value_t = DEFAULT_SCHEMA_SIZE_MAX)]
    schema_size_limit: u64,
    /// Largest accepted variable-length field in bytes
    #[arg(long, env = "ENV_BLOB_SIZE_MAX", default_value_t = DEFAULT_BLOB_SIZE_MAX)]
    blob_size_max: usize,
    /// Largest accepted BXROWS1 record frame in bytes [default: blob size max + 15 MiB]
    #[arg(long, env = "ENV_RECORD_SIZE_MAX")]
    record_size_max: Option<usize>,
}

impl IoArgs {
    fn input_config(&self) -> InputConfig {
        let limits = InputConfig::default()
            .with_blob_size_max(self.blob_size_max)
            .with_schema_size_max(self.schema_size_limit);
        match self.record_size_max {
            Some(n) => limits.with_record_size_max(n),
            None => limits,
        }
    }
}

fn shorten_config(store: StoreArgs, io: &IoArgs) -> ShortenConfig {
    let mut cfg = ShortenConfig::new(store.blob_key, store.id_key, store.blob_dir, store.blob_ext)
        .with_compression(store.compress_type, store.compress_level);
    cfg.input = io.input_config();
    cfg.schema_path = io.schema.clone();
    cfg
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn is_std(path: &Path) -> bool {
    path.to_str() == Some("-")
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    if is_std(path) {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let file = File::open(path).with_context(|| format!("opening input file {:?}", path))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn open_output(path: &Path) -> anyhow::Result<Box<dyn Write>> {
    if is_std(path) {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file = File::create(path).with_context(|| format!("creating output file {:?}", path))?;
        Ok(Box::new(file))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the record stream, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

// ── Subcommand implementations ─────────────────────────────────────────────

/// Decode the input, run every row through a stage and encode the result.
///
/// The output schema is the configured file if any, else the input's own.
/// `make_stage` is told whether that schema's blob field admits null.
fn run_stage<T, F>(
    cfg: &ShortenConfig,
    io: &IoArgs,
    make_stage: F,
    cancel: CancellationToken,
) -> anyhow::Result<(RunSummary, T)>
where
    T: RowStage,
    F: FnOnce(bool) -> T,
{
    let input = open_input(&io.input)?;
    match io.format {
        StreamFormat::Bxrows => {
            let reader = RowReader::new(input, cfg.input).context("reading input stream header")?;
            let schema = match &cfg.schema_path {
                Some(path) => load_schema(path, cfg.input.schema_size_max())
                    .with_context(|| format!("loading schema {:?}", path))?,
                None => reader.schema().clone(),
            };
            let nullable = schema
                .field(&cfg.blob_field)
                .map_or(false, |f| f.ty.admits(&Value::Null));
            let mut writer = RowWriter::new(open_output(&io.output)?, schema)
                .context("writing output stream header")?;

            let mut pipeline = Pipeline::new(reader, make_stage(nullable), cancel);
            let summary = write_rows(&mut writer, &mut pipeline, cfg.error_policy)?;
            writer.finish()?;
            Ok((summary, pipeline.into_stage()))
        }
        StreamFormat::Avro => {
            let reader = AvroRowReader::new(input, cfg.input).context("reading Avro header")?;
            let schema = match &cfg.schema_path {
                Some(path) => load_avro_schema(path, cfg.input.schema_size_max())
                    .with_context(|| format!("loading schema {:?}", path))?,
                None => reader.schema().clone(),
            };
            let nullable = field_admits_null(&schema, &cfg.blob_field);
            let mut writer = AvroRowWriter::new(open_output(&io.output)?, &schema)
                .context("preparing Avro output")?;

            let mut pipeline = Pipeline::new(reader, make_stage(nullable), cancel);
            let summary = write_rows(&mut writer, &mut pipeline, cfg.error_policy)?;
            writer.finish()?;
            Ok((summary, pipeline.into_stage()))
        }
    }
}

fn run_shorten(cfg: ShortenConfig, io: &IoArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    // Every setting is checked before the first byte of input is read.
    let mapper = build_mapper(&cfg).context("invalid configuration")?;

    info!(
        blob_key = %cfg.blob_field,
        id_key = %cfg.id_field,
        compression = %cfg.compression,
        format = %io.format,
        dir = %cfg.blob_dir.display(),
        "shortening"
    );

    let t0 = Instant::now();
    let (summary, mapper) = run_stage(&cfg, io, |_| mapper, cancel)?;
    let stats = mapper.stats();

    info!(
        rows = summary.rows_written,
        skipped = summary.rows_skipped,
        blobs = stats.blobs_saved,
        blob_bytes = %human_bytes(stats.bytes_saved),
        elapsed = %format!("{:.3}s", t0.elapsed().as_secs_f64()),
        "shorten complete"
    );
    Ok(())
}

fn run_restore(cfg: ShortenConfig, io: &IoArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let restorer = build_restorer(&cfg).context("invalid configuration")?;

    let t0 = Instant::now();
    let (summary, _) = run_stage(
        &cfg,
        io,
        |nullable| restorer.with_empty_as_null(nullable),
        cancel,
    )?;

    info!(
        rows = summary.rows_written,
        elapsed = %format!("{:.3}s", t0.elapsed().as_secs_f64()),
        "restore complete"
    );
    Ok(())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Bytes(b) => format!("bytes({})", human_bytes(b.len() as u64)),
        Value::Fixed(b) => format!("fixed[{}]", b.len()),
        Value::String(s) if s.len() > 32 => format!("string({} chars)", s.chars().count()),
        Value::String(s) => format!("{:?}", s),
        Value::Long(i) => i.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Double(f) => f.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => format!("array[{}]", items.len()),
        Value::Map(entries) => format!("map{{{}}}", entries.len()),
    }
}

fn summarize_records<I>(rows: I, show_records: bool) -> anyhow::Result<()>
where
    I: Iterator<Item = blobext_core::Result<Row>>,
{
    if show_records {
        println!();
    }
    let mut records = 0u64;
    let mut bytes_fields = 0u64;
    for row in rows {
        let row = row.with_context(|| format!("decoding record {}", records))?;
        bytes_fields += row
            .values()
            .filter_map(Value::as_bytes)
            .map(|b| b.len() as u64)
            .sum::<u64>();
        if show_records {
            let fields: Vec<String> = row
                .iter()
                .map(|(name, value)| format!("{}={}", name, describe(value)))
                .collect();
            println!("  {:>8}  {}", records, fields.join(" "));
        }
        records += 1;
    }

    println!();
    println!("  records        : {}", records);
    println!("  bytes fields   : {}", human_bytes(bytes_fields));
    Ok(())
}

fn run_inspect(
    input: PathBuf,
    format: StreamFormat,
    show_records: bool,
    blob_size_max: usize,
) -> anyhow::Result<()> {
    let limits = InputConfig::default().with_blob_size_max(blob_size_max);
    let source = open_input(&input)?;

    match format {
        StreamFormat::Bxrows => {
            let reader = RowReader::new(source, limits).context("reading stream header")?;
            println!("=== BXROWS1 stream: {:?} ===", input);
            println!();
            println!("  format version : {}", reader.header.version);
            println!("  flags          : 0x{:04x}", reader.header.flags);
            println!("  schema         : {}", reader.schema().to_json());
            summarize_records(reader, show_records)
        }
        StreamFormat::Avro => {
            let reader = AvroRowReader::new(source, limits).context("reading Avro header")?;
            println!("=== Avro stream: {:?} ===", input);
            println!();
            println!("  schema         : {}", reader.schema().canonical_form());
            summarize_records(reader, show_records)
        }
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received, stopping after the current row");
            cancel.cancel();
        })
        .context("installing Ctrl-C handler")?;
    }

    match cli.command {
        Commands::Shorten {
            store,
            io,
            blob_field_policy,
            continue_on_error,
        } => {
            let mut cfg = shorten_config(store, &io);
            cfg.blob_policy = blob_field_policy;
            if continue_on_error {
                cfg.error_policy = ErrorPolicy::SkipFailedRows;
            }
            run_shorten(cfg, &io, cancel)
        }
        Commands::Restore { store, io } => run_restore(shorten_config(store, &io), &io, cancel),
        Commands::Inspect {
            input,
            format,
            records,
            blob_size_max,
        } => run_inspect(input, format, records, blob_size_max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobext_core::{parse_avro_schema, RecordSchema};
    use tempfile::TempDir;

    const SCHEMA: &str = r#"{"type": "record", "name": "t", "fields": [
        {"name": "pid", "type": "long"},
        {"name": "data", "type": ["null", "bytes", "long"]}
    ]}"#;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn shorten_defaults() {
        let cmd = parse(&[
            "blobext", "shorten", "--blob-key", "data", "--id-key", "pid",
            "--blob-dir", "/tmp/blobs", "--blob-ext", "bin",
        ]);
        let Commands::Shorten { store, io, blob_field_policy, continue_on_error } = cmd else {
            panic!("expected shorten");
        };
        assert_eq!(store.compress_type, "none");
        assert_eq!(store.compress_level, 1);
        assert_eq!(blob_field_policy, BlobFieldPolicy::Keep);
        assert!(!continue_on_error);
        assert!(is_std(&io.input) && is_std(&io.output));
        assert_eq!(io.format, StreamFormat::Avro);
        assert_eq!(io.blob_size_max, DEFAULT_BLOB_SIZE_MAX);
        assert_eq!(io.record_size_max, None);
    }

    #[test]
    fn record_cap_tracks_a_raised_blob_cap() {
        let cmd = parse(&[
            "blobext", "restore", "--blob-key", "data", "--id-key", "pid",
            "--blob-dir", "/tmp/blobs", "--blob-ext", "bin", "--format", "bxrows",
            "--blob-size-max", "33554432",
        ]);
        let Commands::Restore { io, .. } = cmd else {
            panic!("expected restore");
        };
        assert_eq!(io.format, StreamFormat::Bxrows);
        assert!(io.input_config().record_size_max() > 33_554_432);
    }

    #[test]
    fn unknown_policy_or_format_is_a_usage_error() {
        let base = [
            "blobext", "shorten", "--blob-key", "data", "--id-key", "pid",
            "--blob-dir", "/tmp/blobs", "--blob-ext", "bin",
        ];
        for extra in [["--blob-field-policy", "drop"], ["--format", "parquet"]] {
            let args: Vec<&str> = base.iter().chain(extra.iter()).copied().collect();
            assert!(Cli::try_parse_from(args).is_err(), "{extra:?}");
        }
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    fn row(pid: i64, data: Value) -> Row {
        let mut row = Row::new();
        row.insert("pid".into(), Value::Long(pid));
        row.insert("data".into(), data);
        row
    }

    fn io_args(format: StreamFormat, input: PathBuf, output: PathBuf) -> IoArgs {
        IoArgs {
            input,
            output,
            format,
            schema: None,
            schema_size_limit: DEFAULT_SCHEMA_SIZE_MAX,
            blob_size_max: DEFAULT_BLOB_SIZE_MAX,
            record_size_max: None,
        }
    }

    /// Shorten `rows` with gzip and `policy`, restore them, and return what
    /// came back plus the blob directory.
    fn shorten_and_restore(
        tmp: &TempDir,
        format: StreamFormat,
        rows: &[Row],
        policy: BlobFieldPolicy,
    ) -> (Vec<Row>, PathBuf) {
        let blobs = tmp.path().join("blobs");
        std::fs::create_dir(&blobs).unwrap();
        let input = tmp.path().join("in");
        let shortened = tmp.path().join("short");
        let restored = tmp.path().join("restored");

        match format {
            StreamFormat::Bxrows => {
                let schema = RecordSchema::parse(SCHEMA).unwrap();
                let mut w = RowWriter::new(File::create(&input).unwrap(), schema).unwrap();
                for r in rows {
                    w.write_row(r).unwrap();
                }
                w.finish().unwrap();
            }
            StreamFormat::Avro => {
                let schema = parse_avro_schema(SCHEMA).unwrap();
                let mut w = AvroRowWriter::new(File::create(&input).unwrap(), &schema).unwrap();
                for r in rows {
                    w.write_row(r).unwrap();
                }
                w.finish().unwrap();
            }
        }

        let store = || StoreArgs {
            blob_key: "data".into(),
            id_key: "pid".into(),
            blob_dir: blobs.clone(),
            blob_ext: "gz".into(),
            compress_type: "gzip".into(),
            compress_level: 6,
        };
        let io = io_args(format, input, shortened.clone());
        let mut cfg = shorten_config(store(), &io);
        cfg.blob_policy = policy;
        run_shorten(cfg, &io, CancellationToken::new()).unwrap();

        let io = io_args(format, shortened, restored.clone());
        run_restore(shorten_config(store(), &io), &io, CancellationToken::new()).unwrap();

        let file = File::open(&restored).unwrap();
        let back = match format {
            StreamFormat::Bxrows => RowReader::new(file, InputConfig::default())
                .unwrap()
                .collect::<blobext_core::Result<Vec<_>>>(),
            StreamFormat::Avro => AvroRowReader::new(file, InputConfig::default())
                .unwrap()
                .collect::<blobext_core::Result<Vec<_>>>(),
        };
        (back.unwrap(), blobs)
    }

    #[test]
    fn bxrows_round_trip_through_files() {
        let tmp = TempDir::new().unwrap();
        let rows = vec![row(42, Value::Bytes(b"helo".to_vec()))];
        let (back, blobs) =
            shorten_and_restore(&tmp, StreamFormat::Bxrows, &rows, BlobFieldPolicy::ReplaceWithId);
        assert!(blobs.join("42.gz").exists());
        assert_eq!(back, rows);
    }

    #[test]
    fn avro_round_trip_keeps_null_blobs() {
        let tmp = TempDir::new().unwrap();
        let rows = vec![
            row(42, Value::Bytes(b"helo".to_vec())),
            row(634, Value::Bytes(b"mount".to_vec())),
            row(7, Value::Null),
        ];
        let (back, blobs) =
            shorten_and_restore(&tmp, StreamFormat::Avro, &rows, BlobFieldPolicy::Clear);
        assert!(blobs.join("634.gz").exists());
        assert!(blobs.join("7.gz").exists());
        assert_eq!(back, rows);
    }
}
