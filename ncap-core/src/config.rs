//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration consumed by the [`Collector`](crate::collector::Collector)
/// and the components it wires together.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory audit-record files and stream artifacts are written to.
    pub out_dir: PathBuf,

    /// Label recorded in every audit file header (capture file name or
    /// interface name).
    pub input_source: String,

    /// Gzip-compress audit-record streams (`.ncap.gz` instead of `.ncap`).
    pub compress: bool,

    /// Every Nth newly created connection triggers a sweep of the tracker
    /// map for idle entries. 0 disables periodic flushing.
    pub conn_flush_interval: u64,

    /// Maximum idle time, relative to the current packet timestamp, before
    /// a tracked connection is evicted and written.
    pub conn_timeout: Duration,

    /// Suppress progress output on stderr.
    pub quiet: bool,

    /// Maintain per-record metric counters.
    pub export: bool,

    /// Number of packet worker threads driving the decoders.
    pub workers: usize,

    /// Number of stream finalizer workers.
    pub stream_workers: usize,

    /// Channel capacity of each stream finalizer worker.
    pub stream_buffer_size: usize,

    /// Number of bytes of the server-to-client stream recorded as the
    /// service banner.
    pub banner_size: usize,

    /// Decoder names to enable. Empty means all.
    pub include_decoders: Vec<String>,

    /// Decoder names to disable.
    pub exclude_decoders: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            input_source: String::new(),
            compress: true,
            conn_flush_interval: 10_000,
            conn_timeout: Duration::from_secs(60),
            quiet: false,
            export: false,
            workers: 4,
            stream_workers: 1000,
            stream_buffer_size: 100,
            banner_size: 512,
            include_decoders: Vec::new(),
            exclude_decoders: Vec::new(),
        }
    }
}

impl Config {
    /// Whether a decoder with the given name passes the include/exclude gates.
    pub fn decoder_enabled(&self, name: &str) -> bool {
        if self
            .exclude_decoders
            .iter()
            .any(|d| d.eq_ignore_ascii_case(name))
        {
            return false;
        }
        if self.include_decoders.is_empty() {
            return true;
        }
        self.include_decoders
            .iter()
            .any(|d| d.eq_ignore_ascii_case(name))
    }
}
