//! Per-protocol packet decoders.
//!
//! This module provides:
//! - [`PacketDecoder`] trait all decoders implement
//! - [`DecoderCore`] - the shared writer/counter plumbing every decoder
//!   delegates to
//! - [`LayerDecoder`] - single-layer decoders driven by a handler function
//! - [`default_decoders`] - the gated decoder set for a configuration
//!
//! A decoder consumes packets and emits audit records of exactly one type.
//! Per-packet decode failures never abort the pipeline; a failure to write
//! an emitted record is fatal and propagates to the collector.

mod connection;
mod layers;
mod tls;

pub use connection::ConnectionDecoder;
pub use layers::{ethernet_decoder, ipv4_decoder, tcp_decoder, udp_decoder};
pub use tls::{ja3s_digest, TlsServerHelloDecoder};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prometheus::IntCounter;

use crate::audit::{AuditRecord, AuditWriter, RecordType};
use crate::config::Config;
use crate::error::AuditError;
use crate::packet::{Layers, Packet};

/// Shared state every decoder delegates to: the typed writer, record and
/// error counters, and the optional export counter.
pub struct DecoderCore {
    name: &'static str,
    description: &'static str,
    writer: AuditWriter,
    num_records: AtomicU64,
    num_errors: AtomicU64,
    export_counter: Option<IntCounter>,
}

impl DecoderCore {
    pub fn new(
        name: &'static str,
        description: &'static str,
        writer: AuditWriter,
        export: bool,
    ) -> Self {
        let export_counter = export.then(|| {
            let counter = IntCounter::new(
                format!("nc_{}_records", name.to_ascii_lowercase()),
                format!("Number of {name} records written"),
            )
            .expect("valid metric opts");
            let _ = prometheus::default_registry().register(Box::new(counter.clone()));
            counter
        });

        Self {
            name,
            description,
            writer,
            num_records: AtomicU64::new(0),
            num_errors: AtomicU64::new(0),
            export_counter,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn record_type(&self) -> RecordType {
        self.writer.record_type()
    }

    pub fn writer(&self) -> &AuditWriter {
        &self.writer
    }

    /// Append one record, bumping counters. Failure is fatal to the caller.
    pub fn write_record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if let Some(counter) = &self.export_counter {
            counter.inc();
        }
        self.num_records.fetch_add(1, Ordering::Relaxed);
        self.writer.write(record)
    }

    /// Count a skipped packet (decode failure).
    pub fn record_error(&self) {
        self.num_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn num_records(&self) -> u64 {
        self.num_records.load(Ordering::Relaxed)
    }

    pub fn num_errors(&self) -> u64 {
        self.num_errors.load(Ordering::Relaxed)
    }

    /// Close the writer; returns the file path and bytes written.
    pub fn close(&self) -> Result<(PathBuf, u64), AuditError> {
        self.writer.close()
    }
}

/// A packet decoder emitting audit records of one type.
pub trait PacketDecoder: Send + Sync {
    /// Shared plumbing.
    fn core(&self) -> &DecoderCore;

    /// Decode one packet; emitted records go through the core's writer.
    /// The only error surfaced is a failed audit write, which is fatal.
    fn handle(&self, packet: &Packet) -> Result<(), AuditError>;

    /// Hook run after all decoders are constructed.
    fn post_init(&self) -> Result<(), AuditError> {
        Ok(())
    }

    /// Flush any decoder state that outlives individual packets.
    fn deinit(&self) -> Result<(), AuditError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.core().name()
    }

    fn description(&self) -> &'static str {
        self.core().description()
    }

    fn record_type(&self) -> RecordType {
        self.core().record_type()
    }

    /// Deinit, then close the writer. Returns (file path, bytes written).
    fn destroy(&self) -> Result<(PathBuf, u64), AuditError> {
        self.deinit()?;
        self.core().close()
    }
}

/// Handler signature for single-layer decoders.
pub type LayerHandler = fn(&Packet, &Layers<'_>) -> Option<AuditRecord>;

/// A decoder whose per-packet logic is a plain function over the layered
/// view. Covers every record type that needs no cross-packet state.
pub struct LayerDecoder {
    core: DecoderCore,
    handler: LayerHandler,
}

impl LayerDecoder {
    pub fn new(
        name: &'static str,
        description: &'static str,
        writer: AuditWriter,
        export: bool,
        handler: LayerHandler,
    ) -> Self {
        Self {
            core: DecoderCore::new(name, description, writer, export),
            handler,
        }
    }
}

impl PacketDecoder for LayerDecoder {
    fn core(&self) -> &DecoderCore {
        &self.core
    }

    fn handle(&self, packet: &Packet) -> Result<(), AuditError> {
        let layers = packet.parse();
        match (self.handler)(packet, &layers) {
            Some(record) => self.core.write_record(&record),
            None => Ok(()),
        }
    }
}

/// Build the enabled decoder set for `config`, with file-backed writers in
/// `config.out_dir`.
pub fn default_decoders(config: &Config) -> Result<Vec<Arc<dyn PacketDecoder>>, AuditError> {
    let mut decoders: Vec<Arc<dyn PacketDecoder>> = Vec::new();

    let writer = |ty: RecordType| {
        AuditWriter::create(ty, &config.out_dir, config.compress, &config.input_source)
    };

    if config.decoder_enabled("Connection") {
        decoders.push(Arc::new(ConnectionDecoder::new(
            config,
            writer(RecordType::Connection)?,
        )));
    }
    if config.decoder_enabled("TLSServerHello") {
        decoders.push(Arc::new(TlsServerHelloDecoder::new(
            writer(RecordType::TlsServerHello)?,
            config.export,
        )));
    }
    if config.decoder_enabled("Ethernet") {
        decoders.push(Arc::new(ethernet_decoder(
            writer(RecordType::Ethernet)?,
            config.export,
        )));
    }
    if config.decoder_enabled("IPv4") {
        decoders.push(Arc::new(ipv4_decoder(
            writer(RecordType::Ipv4)?,
            config.export,
        )));
    }
    if config.decoder_enabled("TCP") {
        decoders.push(Arc::new(tcp_decoder(writer(RecordType::Tcp)?, config.export)));
    }
    if config.decoder_enabled("UDP") {
        decoders.push(Arc::new(udp_decoder(writer(RecordType::Udp)?, config.export)));
    }

    for decoder in &decoders {
        decoder.post_init()?;
    }

    Ok(decoders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::test_utils::*;
    use tempfile::tempdir;

    // Test 1: the gated decoder set honors include/exclude
    #[test]
    fn test_default_decoders_gated() {
        let dir = tempdir().unwrap();
        let config = Config {
            out_dir: dir.path().to_path_buf(),
            include_decoders: vec!["Connection".into(), "TCP".into()],
            ..Default::default()
        };
        let decoders = default_decoders(&config).unwrap();
        let names: Vec<_> = decoders.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["Connection", "TCP"]);
        for d in decoders {
            d.destroy().unwrap();
        }
    }

    // Test 2: destroy reports the written file
    #[test]
    fn test_destroy_reports_file() {
        let dir = tempdir().unwrap();
        let config = Config {
            out_dir: dir.path().to_path_buf(),
            include_decoders: vec!["UDP".into()],
            compress: false,
            ..Default::default()
        };
        let decoders = default_decoders(&config).unwrap();
        let udp = &decoders[0];

        let packet = udp_packet(10, [10, 0, 0, 1], 1234, [8, 8, 8, 8], 53, b"\x01\x02");
        udp.handle(&packet).unwrap();
        assert_eq!(udp.core().num_records(), 1);

        let (path, bytes) = udp.destroy().unwrap();
        assert!(path.ends_with("UDP.ncap"));
        assert!(bytes > 0);
    }
}
