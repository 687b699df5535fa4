//! ncap CLI entry point.

mod args;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ncap_core::audit::{AuditReader, RecordType};
use ncap_core::collector::Collector;
use ncap_core::config::Config;
use ncap_core::pcap::FileSource;

use args::{Args, CaptureArgs, Command, ReadArgs};

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Capture(capture) => run_capture(capture),
        Command::Read(read) => run_read(read),
    }
}

fn run_capture(args: CaptureArgs) -> Result<()> {
    let input_source = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let config = Config {
        out_dir: args.out_dir,
        input_source,
        compress: !args.no_compress,
        conn_flush_interval: args.flush_interval,
        conn_timeout: Duration::from_secs(args.timeout_secs),
        quiet: args.quiet,
        export: args.export,
        workers: args.workers,
        stream_workers: args.stream_workers,
        stream_buffer_size: args.stream_buffer_size,
        banner_size: args.banner_size,
        include_decoders: args.include,
        exclude_decoders: args.exclude,
    };
    let quiet = config.quiet;

    let source = FileSource::open(&args.file)
        .with_context(|| format!("failed to open capture file: {}", args.file.display()))?;
    let collector = Collector::new(config).context("failed to initialize pipeline")?;
    let summary = collector.run(source).context("capture failed")?;

    if !quiet {
        eprintln!("processed {} packets", summary.num_packets);
        if summary.decode_errors > 0 {
            eprintln!("skipped {} packets with decode errors", summary.decode_errors);
        }
        for (name, path, bytes) in &summary.files {
            eprintln!("  {name:<16} {bytes:>10} bytes  {}", path.display());
        }
    }
    Ok(())
}

fn run_read(args: ReadArgs) -> Result<()> {
    let record_type = match &args.record_type {
        Some(name) => RecordType::from_name(name)
            .with_context(|| format!("unknown record type: {name}"))?,
        None => infer_record_type(&args.file)
            .context("cannot infer record type from file name; pass --type")?,
    };

    let mut reader = AuditReader::open(&args.file, record_type)
        .with_context(|| format!("failed to open audit file: {}", args.file.display()))?;

    let header = reader.header();
    println!(
        "# type={} created={} source={} version={}",
        record_type.name(),
        header.created,
        header.input_source,
        header.version
    );
    if args.header_only {
        return Ok(());
    }

    let mut count = 0u64;
    while let Some(record) = reader.next().context("failed to read record")? {
        println!("{record:?}");
        count += 1;
    }
    println!("# {count} records");
    Ok(())
}

/// Audit files are named after their record type: `Connection.ncap.gz`.
fn infer_record_type(path: &std::path::Path) -> Result<RecordType> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .trim_end_matches(".gz")
        .trim_end_matches(".ncap");
    match RecordType::from_name(stem) {
        Some(ty) => Ok(ty),
        None => bail!("no record type matches {stem:?}"),
    }
}
