//! Connection tracking decoder.
//!
//! Folds packets into bidirectional [`Connection`] records keyed by
//! [`FlowId`]. The map lock guards insert/remove, a per-entry lock guards
//! field updates; lock order is always map → entry. Records leave the map
//! exactly once: through the periodic idle sweep (a detached writer thread
//! that owns its snapshot) or through the terminal drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::audit::{AuditWriter, Connection};
use crate::config::Config;
use crate::error::AuditError;
use crate::metrics;
use crate::packet::{FlowId, Packet};
use crate::utils::{md5_hex, string_to_time, time_to_string};

use super::{DecoderCore, PacketDecoder};

/// One tracked connection behind its own lock.
struct ConnEntry {
    record: Mutex<Connection>,
}

/// Tracks bidirectional connections and writes each exactly once.
pub struct ConnectionDecoder {
    core: Arc<DecoderCore>,
    conns: Mutex<HashMap<FlowId, Arc<ConnEntry>>>,
    num_conns: AtomicU64,
    flush_interval: u64,
    timeout_nanos: i64,
}

impl ConnectionDecoder {
    pub fn new(config: &Config, writer: AuditWriter) -> Self {
        Self {
            core: Arc::new(DecoderCore::new(
                "Connection",
                "A connection represents bi-directional network communication between two \
                 hosts based on the combined link-, network- and transport layer identifiers",
                writer,
                config.export,
            )),
            conns: Mutex::new(HashMap::new()),
            num_conns: AtomicU64::new(0),
            flush_interval: config.conn_flush_interval,
            timeout_nanos: config.conn_timeout.as_nanos() as i64,
        }
    }

    /// Number of connections currently tracked.
    pub fn num_tracked(&self) -> usize {
        self.conns.lock().len()
    }

    /// Fold one packet into its connection.
    ///
    /// The record for an existing flow is updated under its entry lock with
    /// the map lock already released; a new flow is created and, every
    /// flush-interval creations, idle entries are swept out and written in
    /// the background.
    pub fn observe(&self, packet: &Packet) {
        let layers = packet.parse();
        let flow_id = FlowId::of(&layers);
        let ts = packet.timestamp;

        let mut conns = self.conns.lock();
        if let Some(entry) = conns.get(&flow_id).cloned() {
            let mut conn = entry.record.lock();
            drop(conns);

            let mut calc_duration = false;

            // A packet captured strictly before the recorded start re-decides
            // the flow direction: the first packet in time owns the Src fields.
            if ts < string_to_time(&conn.timestamp_first) {
                calc_duration = true;
                conn.timestamp_first = time_to_string(ts);

                if let Some(link) = layers.link {
                    let flow = link.flow();
                    conn.src_mac = flow.src().to_string();
                    conn.dst_mac = flow.dst().to_string();
                }
                if let Some(network) = layers.network {
                    let flow = network.flow();
                    conn.src_ip = flow.src().to_string();
                    conn.dst_ip = flow.dst().to_string();
                }
                if let Some(transport) = layers.transport {
                    let flow = transport.flow();
                    conn.src_port = flow.src().to_string();
                    conn.dst_port = flow.dst().to_string();
                }
            }

            if ts > string_to_time(&conn.timestamp_last) {
                conn.timestamp_last = time_to_string(ts);
                calc_duration = true;
            }

            conn.num_packets += 1;
            conn.total_size += packet.data.len() as i32;

            if calc_duration {
                conn.duration =
                    string_to_time(&conn.timestamp_last) - string_to_time(&conn.timestamp_first);
            }
            return;
        }

        // New flow: populate the record, fix its UID, insert.
        let mut conn = Connection {
            timestamp_first: time_to_string(ts),
            timestamp_last: time_to_string(ts),
            num_packets: 1,
            total_size: packet.data.len() as i32,
            ..Default::default()
        };

        if let Some(link) = layers.link {
            let flow = link.flow();
            conn.link_proto = link.proto().to_string();
            conn.src_mac = flow.src().to_string();
            conn.dst_mac = flow.dst().to_string();
        }
        if let Some(network) = layers.network {
            let flow = network.flow();
            conn.network_proto = network.proto().to_string();
            conn.src_ip = flow.src().to_string();
            conn.dst_ip = flow.dst().to_string();
        }
        if let Some(transport) = layers.transport {
            let flow = transport.flow();
            conn.transport_proto = transport.proto().to_string();
            conn.src_port = flow.src().to_string();
            conn.dst_port = flow.dst().to_string();
        }
        if let Some(app) = layers.application {
            conn.application_proto = app.proto().to_string();
            conn.app_payload_size = app.payload.len() as i32;
        }

        // The UID is fixed at insert and survives any later direction
        // rewrite.
        conn.uid = md5_hex(conn.canonical_string().as_bytes());

        conns.insert(
            flow_id,
            Arc::new(ConnEntry {
                record: Mutex::new(conn),
            }),
        );
        metrics::NUM_CONNS.inc();

        let total = self.num_conns.fetch_add(1, Ordering::SeqCst) + 1;
        if self.flush_interval != 0 && total > 1 && (total - 1) % self.flush_interval == 0 {
            // Sweep idle entries while still holding the map lock, then hand
            // the removed snapshot to a detached writer thread.
            let mut selected = Vec::new();
            conns.retain(|_, entry| {
                let last = string_to_time(&entry.record.lock().timestamp_last);
                if ts - last > self.timeout_nanos {
                    selected.push(Arc::clone(entry));
                    false
                } else {
                    true
                }
            });

            if !selected.is_empty() {
                let core = Arc::clone(&self.core);
                std::thread::spawn(move || {
                    for entry in selected {
                        let record = entry.record.lock().clone();
                        if let Err(e) = core.write_record(&record.into()) {
                            // A broken writer also fails the next synchronous
                            // write, which is where it turns fatal.
                            error!("background connection flush failed: {e}");
                        }
                    }
                });
            }
        }
    }
}

impl PacketDecoder for ConnectionDecoder {
    fn core(&self) -> &DecoderCore {
        &self.core
    }

    fn handle(&self, packet: &Packet) -> Result<(), AuditError> {
        self.observe(packet);
        Ok(())
    }

    /// Terminal drain: write every remaining connection, unless records go
    /// to a channel sink.
    fn deinit(&self) -> Result<(), AuditError> {
        if self.core.writer().is_chan() {
            return Ok(());
        }
        let mut conns = self.conns.lock();
        for (_, entry) in conns.drain() {
            let record = entry.record.lock().clone();
            self.core.write_record(&record.into())?;
        }
        Ok(())
    }
}
