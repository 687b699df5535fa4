//! # ncap-core
//!
//! Network traffic audit pipeline: dissect packet captures into typed,
//! length-prefixed, optionally compressed audit-record streams.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                           ncap-core                                 |
//! +---------------------------------------------------------------------+
//! |  packet/     - layered packet view, flow identity (FlowId)          |
//! |  pcap/       - PCAP/PCAPNG capture input, gzip handling             |
//! |  decoder/    - per-protocol decoders, connection tracker            |
//! |  stream/     - TCP reassembly, stream readers, finalizer pool       |
//! |  audit/      - typed audit-record streams (writer + reader)         |
//! |  collector/  - lifecycle: run, backpressure, ordered shutdown       |
//! |  metrics/    - Prometheus gauges for the stream pipeline            |
//! |  error/      - error types                                          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ncap_core::collector::Collector;
//! use ncap_core::config::Config;
//! use ncap_core::pcap::FileSource;
//!
//! let config = Config {
//!     out_dir: "out".into(),
//!     input_source: "capture.pcap".into(),
//!     ..Default::default()
//! };
//! let collector = Collector::new(config).unwrap();
//! let source = FileSource::open("capture.pcap").unwrap();
//! let summary = collector.run(source).unwrap();
//! for (name, path, bytes) in &summary.files {
//!     println!("{name}: {} ({bytes} bytes)", path.display());
//! }
//! ```
//!
//! Control flow: packets from the source are fanned out to worker threads;
//! each packet reaches the connection tracker and every enabled decoder,
//! and TCP-bearing packets additionally enter stream reassembly. Closed
//! streams are finalized by a worker pool; every decoder's output funnels
//! through one [`audit::AuditWriter`] per record type.

pub mod audit;
pub mod collector;
pub mod config;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod packet;
pub mod pcap;
pub mod stream;
pub mod utils;

// Re-export commonly used types at crate root for convenience
pub use audit::{AuditReader, AuditRecord, AuditWriter, RecordType};
pub use collector::{Collector, Summary};
pub use config::Config;
pub use error::{AuditError, Error, PcapError, Result};
pub use packet::{FlowId, Packet};
pub use pcap::{FileSource, PacketSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
