//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Dissect packet captures into typed audit-record streams.
#[derive(Parser, Debug)]
#[command(name = "ncap")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose output (repeat for more)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process a capture file into audit-record streams
    Capture(CaptureArgs),
    /// Dump the records of an audit file
    Read(ReadArgs),
}

#[derive(clap::Args, Debug)]
pub struct CaptureArgs {
    /// Capture file to read (pcap, pcapng, optionally gzipped)
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    pub file: PathBuf,

    /// Output directory for audit files and stream artifacts
    #[arg(short = 'o', long = "out", value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Write uncompressed .ncap files instead of .ncap.gz
    #[arg(long = "no-compress")]
    pub no_compress: bool,

    /// Sweep the connection tracker every Nth new connection (0 disables)
    #[arg(long = "flush-interval", default_value = "10000")]
    pub flush_interval: u64,

    /// Idle seconds before a tracked connection is evicted
    #[arg(long = "timeout", value_name = "SECONDS", default_value = "60")]
    pub timeout_secs: u64,

    /// Suppress progress output
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Maintain per-record metric counters
    #[arg(long = "export")]
    pub export: bool,

    /// Packet worker threads
    #[arg(long = "workers", default_value = "4")]
    pub workers: usize,

    /// Stream finalizer workers
    #[arg(long = "stream-workers", default_value = "1000")]
    pub stream_workers: usize,

    /// Channel capacity per stream finalizer worker
    #[arg(long = "stream-buffer-size", default_value = "100")]
    pub stream_buffer_size: usize,

    /// Bytes of the server stream recorded as the service banner
    #[arg(long = "banner-size", default_value = "512")]
    pub banner_size: usize,

    /// Only run these decoders (comma separated)
    #[arg(long = "include", value_delimiter = ',', value_name = "DECODERS")]
    pub include: Vec<String>,

    /// Skip these decoders (comma separated)
    #[arg(long = "exclude", value_delimiter = ',', value_name = "DECODERS")]
    pub exclude: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct ReadArgs {
    /// Audit file to read (.ncap or .ncap.gz)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Expected record type (inferred from the file name by default)
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub record_type: Option<String>,

    /// Only print the file header
    #[arg(long = "header")]
    pub header_only: bool,
}
