//! Pipeline lifecycle.
//!
//! The [`Collector`] wires the configured decoders, the TCP assembler and
//! the stream finalizer pool together, drives a [`PacketSource`] through
//! worker threads, and owns the shutdown ordering:
//!
//! 1. the capture source runs dry (or is stopped),
//! 2. the assembler flushes every open stream into the pool,
//! 3. the pool drains,
//! 4. the connection tracker's terminal drain runs,
//! 5. every audit writer is closed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::decoder::{default_decoders, PacketDecoder};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::pcap::PacketSource;
use crate::stream::{StreamProcessor, StreamSaver, TcpAssembler};

/// Capacity of the packet queue between the source and the workers.
const PACKET_QUEUE: usize = 1024;

/// Totals reported after a completed run.
#[derive(Debug, Default)]
pub struct Summary {
    pub num_packets: u64,
    pub decode_errors: u64,
    /// Per decoder: name, audit file path, bytes written.
    pub files: Vec<(&'static str, PathBuf, u64)>,
}

/// Drives packets from a source through decoders and stream assembly.
pub struct Collector {
    config: Config,
    decoders: Vec<Arc<dyn PacketDecoder>>,
    assembler: Arc<TcpAssembler>,
    pool: Arc<StreamProcessor>,
    num_packets: AtomicU64,
}

impl Collector {
    /// Build the pipeline for `config`: output directory, audit writers,
    /// decoders, stream pool.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.out_dir)?;

        let saver = StreamSaver::new(&config.out_dir, config.banner_size)?;
        let pool = Arc::new(StreamProcessor::new(
            config.stream_workers,
            config.stream_buffer_size,
            saver,
            config.quiet,
        ));
        let assembler = Arc::new(TcpAssembler::new(Arc::clone(&pool)));
        let decoders = default_decoders(&config).map_err(Error::Audit)?;
        debug!(
            decoders = decoders.len(),
            workers = config.workers,
            "pipeline initialized"
        );

        Ok(Self {
            config,
            decoders,
            assembler,
            pool,
            num_packets: AtomicU64::new(0),
        })
    }

    /// Run the source to exhaustion, then shut the pipeline down.
    pub fn run<S: PacketSource>(&self, mut source: S) -> Result<Summary> {
        let fatal: Mutex<Option<Error>> = Mutex::new(None);
        let (tx, rx) = bounded::<Packet>(PACKET_QUEUE);

        let mut source_error = None;
        std::thread::scope(|scope| {
            for _ in 0..self.config.workers.max(1) {
                let rx = rx.clone();
                let fatal = &fatal;
                scope.spawn(move || {
                    for packet in rx {
                        for decoder in &self.decoders {
                            if let Err(e) = decoder.handle(&packet) {
                                *fatal.lock() = Some(Error::Audit(e));
                                return;
                            }
                        }
                        self.assembler.process(&packet);
                    }
                });
            }
            drop(rx);

            loop {
                if fatal.lock().is_some() {
                    break;
                }
                match source.next_packet() {
                    Ok(Some(packet)) => {
                        self.num_packets.fetch_add(1, Ordering::Relaxed);
                        if tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        source_error = Some(e);
                        break;
                    }
                }
            }
            drop(tx);
        });

        if let Some(e) = fatal.into_inner() {
            return Err(e);
        }
        if let Some(e) = source_error {
            return Err(e);
        }
        self.stop()
    }

    /// Ordered shutdown; also usable directly after feeding packets by
    /// hand.
    pub fn stop(&self) -> Result<Summary> {
        let open = self.assembler.open_streams();
        if !self.config.quiet && open > 0 {
            eprint!("processing remaining open TCP streams... (0/{open})");
        }
        self.assembler.flush();
        self.pool.shutdown();
        if !self.config.quiet && open > 0 {
            eprintln!();
        }

        let mut summary = Summary {
            num_packets: self.num_packets.load(Ordering::Relaxed),
            ..Default::default()
        };
        for decoder in &self.decoders {
            let (path, bytes) = decoder.destroy().map_err(Error::Audit)?;
            summary.decode_errors += decoder.core().num_errors();
            summary.files.push((decoder.name(), path, bytes));
        }

        info!(
            packets = summary.num_packets,
            files = summary.files.len(),
            "capture complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditReader, AuditRecord, RecordType};
    use crate::packet::test_utils::*;
    use crate::pcap::VecSource;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            out_dir: dir.to_path_buf(),
            input_source: "test".into(),
            compress: false,
            quiet: true,
            workers: 2,
            stream_workers: 8,
            stream_buffer_size: 16,
            conn_flush_interval: 0,
            ..Default::default()
        }
    }

    // Test 1: a single packet yields exactly one Connection record at
    // shutdown
    #[test]
    fn test_single_packet_terminal_drain() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.include_decoders = vec!["Connection".into()];
        let collector = Collector::new(config).unwrap();

        let packet = udp_packet(5_000, [10, 0, 0, 1], 1234, [8, 8, 8, 8], 53, b"\x00\x01");
        let summary = collector.run(VecSource::new(vec![packet.clone()])).unwrap();
        assert_eq!(summary.num_packets, 1);

        let (_, path, _) = &summary.files[0];
        let mut reader = AuditReader::open(path, RecordType::Connection).unwrap();
        let records = reader.collect_records().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            AuditRecord::Connection(conn) => {
                assert_eq!(conn.timestamp_first, "5000");
                assert_eq!(conn.timestamp_last, "5000");
                assert_eq!(conn.num_packets, 1);
                assert_eq!(conn.total_size, packet.data.len() as i32);
                assert_eq!(conn.src_ip, "10.0.0.1");
                assert_eq!(conn.dst_ip, "8.8.8.8");
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    // Test 2: the full decoder set writes one file per record type
    #[test]
    fn test_one_file_per_record_type() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let collector = Collector::new(config).unwrap();

        let packets = vec![
            tcp_packet(1, [10, 0, 0, 1], 5000, [10, 0, 0, 2], 80, 1, TCP_SYN, b""),
            udp_packet(2, [10, 0, 0, 1], 1234, [8, 8, 8, 8], 53, b"\x00"),
        ];
        let summary = collector.run(VecSource::new(packets)).unwrap();

        let names: Vec<_> = summary.files.iter().map(|(name, _, _)| *name).collect();
        assert_eq!(
            names,
            vec!["Connection", "TLSServerHello", "Ethernet", "IPv4", "TCP", "UDP"]
        );
        for (_, path, _) in &summary.files {
            assert!(path.exists(), "missing audit file {path:?}");
        }
    }

    // Test 3: closed TCP connections leave conversation artifacts
    #[test]
    fn test_stream_artifacts_on_shutdown() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.include_decoders = vec!["Connection".into()];
        let collector = Collector::new(config).unwrap();

        let packets = vec![
            tcp_packet(1, [10, 0, 0, 1], 5000, [10, 0, 0, 2], 80, 10, TCP_SYN, b""),
            tcp_packet(
                2,
                [10, 0, 0, 1],
                5000,
                [10, 0, 0, 2],
                80,
                11,
                TCP_PSH_ACK,
                b"ping",
            ),
            tcp_packet(
                3,
                [10, 0, 0, 2],
                80,
                [10, 0, 0, 1],
                5000,
                20,
                TCP_PSH_ACK,
                b"pong",
            ),
        ];
        collector.run(VecSource::new(packets)).unwrap();

        // Connection never closed: the shutdown flush finalized it.
        let conversations = std::fs::read_dir(dir.path().join("conversations"))
            .unwrap()
            .count();
        assert_eq!(conversations, 2);
        let banners = std::fs::read_dir(dir.path().join("banners")).unwrap().count();
        assert_eq!(banners, 1);
    }
}
