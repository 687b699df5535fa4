//! TCP stream assembly.
//!
//! Routes TCP-bearing packets into per-direction [`StreamReader`]s. A
//! connection's client side is decided by the SYN (or guessed by port for
//! mid-stream captures, higher port = client). When a connection closes
//! (RST, or FIN seen in both directions) its readers go to the finalizer
//! pool; the shutdown [`flush`](TcpAssembler::flush) dispatches every
//! registered reader and lets the pool skip the already-saved ones.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::metrics::{direction, STREAM_DECODE_TIME, STREAM_FEED_DATA_TIME};
use crate::packet::Packet;

use super::processor::StreamProcessor;
use super::reader::{Conversation, StreamReader, TransportEndpoints};
use super::registry::StreamRegistry;

/// Normalized connection key (lower IP/port first for consistent lookup).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct StreamKey {
    ip_a: IpAddr,
    port_a: u16,
    ip_b: IpAddr,
    port_b: u16,
}

impl StreamKey {
    fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        if (src_ip, src_port) <= (dst_ip, dst_port) {
            Self {
                ip_a: src_ip,
                port_a: src_port,
                ip_b: dst_ip,
                port_b: dst_port,
            }
        } else {
            Self {
                ip_a: dst_ip,
                port_a: dst_port,
                ip_b: src_ip,
                port_b: src_port,
            }
        }
    }
}

/// Both directions of one tracked TCP connection.
struct TcpConnection {
    client_ip: IpAddr,
    client_port: u16,
    client: Arc<StreamReader>,
    server: Arc<StreamReader>,
    client_fin: AtomicBool,
    server_fin: AtomicBool,
    closed: AtomicBool,
}

impl TcpConnection {
    fn is_client_packet(&self, src_ip: IpAddr, src_port: u16) -> bool {
        src_ip == self.client_ip && src_port == self.client_port
    }
}

/// Feeds packets into stream readers and hands closed connections to the
/// finalizer pool.
pub struct TcpAssembler {
    conns: Mutex<HashMap<StreamKey, Arc<TcpConnection>>>,
    registry: StreamRegistry,
    pool: Arc<StreamProcessor>,
}

impl TcpAssembler {
    pub fn new(pool: Arc<StreamProcessor>) -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
            registry: StreamRegistry::new(),
            pool,
        }
    }

    /// Number of stream readers not yet persisted.
    pub fn open_streams(&self) -> usize {
        self.registry.num_unsaved()
    }

    /// Route one packet. Non-TCP packets are ignored.
    pub fn process(&self, packet: &Packet) {
        let start = Instant::now();
        let layers = packet.parse();

        let (Some(network), Some(transport)) = (layers.network, layers.transport) else {
            return;
        };
        let Some(tcp) = transport.tcp else {
            return;
        };

        let key = StreamKey::new(
            network.src,
            transport.src_port,
            network.dst,
            transport.dst_port,
        );

        let conn = {
            let mut conns = self.conns.lock();
            match conns.get(&key) {
                Some(conn) => Arc::clone(conn),
                None => {
                    let conn = self.create_connection(
                        network.src,
                        transport.src_port,
                        network.dst,
                        transport.dst_port,
                        tcp.flags.syn && !tcp.flags.ack,
                    );
                    conns.insert(key.clone(), Arc::clone(&conn));
                    conn
                }
            }
        };

        let from_client = conn.is_client_packet(network.src, transport.src_port);
        let reader = if from_client {
            &conn.client
        } else {
            &conn.server
        };

        let payload = layers.application.map(|a| a.payload).unwrap_or(&[]);
        let feed_start = Instant::now();
        reader.feed(
            tcp.seq,
            payload,
            packet.timestamp,
            tcp.flags.syn,
            tcp.flags.fin,
        );
        STREAM_FEED_DATA_TIME
            .with_label_values(&[if from_client {
                direction::CLIENT_TO_SERVER
            } else {
                direction::SERVER_TO_CLIENT
            }])
            .set(feed_start.elapsed().as_nanos() as f64);

        if tcp.flags.fin {
            if from_client {
                conn.client_fin.store(true, Ordering::Release);
            } else {
                conn.server_fin.store(true, Ordering::Release);
            }
        }

        let both_closed = conn.client_fin.load(Ordering::Acquire)
            && conn.server_fin.load(Ordering::Acquire);
        if (tcp.flags.rst || both_closed) && !conn.closed.swap(true, Ordering::AcqRel) {
            // Server side first so the banner is on disk before the merged
            // conversation refers to it.
            self.pool.handle_stream(Arc::clone(&conn.server));
            self.pool.handle_stream(Arc::clone(&conn.client));
            self.conns.lock().remove(&key);
        }

        STREAM_DECODE_TIME
            .with_label_values(&["TCP"])
            .set(start.elapsed().as_nanos() as f64);
    }

    fn create_connection(
        &self,
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        is_syn: bool,
    ) -> Arc<TcpConnection> {
        // The SYN sender is the client; mid-stream the higher port is the
        // better guess.
        let (client_ip, client_port, server_ip, server_port) = if is_syn || src_port > dst_port {
            (src_ip, src_port, dst_ip, dst_port)
        } else {
            (dst_ip, dst_port, src_ip, src_port)
        };

        let conversation = Conversation::new();
        let client = Arc::new(StreamReader::new(
            true,
            TransportEndpoints {
                src_ip: client_ip,
                src_port: client_port,
                dst_ip: server_ip,
                dst_port: server_port,
            },
            Arc::clone(&conversation),
        ));
        let server = Arc::new(StreamReader::new(
            false,
            TransportEndpoints {
                src_ip: server_ip,
                src_port: server_port,
                dst_ip: client_ip,
                dst_port: client_port,
            },
            conversation,
        ));

        self.registry.register(Arc::clone(&client));
        self.registry.register(Arc::clone(&server));

        Arc::new(TcpConnection {
            client_ip,
            client_port,
            client,
            server,
            client_fin: AtomicBool::new(false),
            server_fin: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Shutdown flush: dispatch every registered reader to the pool. The
    /// pool skips readers that were saved when their connection closed.
    pub fn flush(&self) {
        self.conns.lock().clear();
        let readers = self.registry.drain();
        self.pool.set_total(readers.len());
        for reader in readers {
            self.pool.handle_stream(reader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::test_utils::*;
    use crate::stream::save::StreamSaver;
    use tempfile::tempdir;

    fn assembler(dir: &std::path::Path) -> (TcpAssembler, Arc<StreamProcessor>) {
        let saver = StreamSaver::new(dir, 512).unwrap();
        let pool = Arc::new(StreamProcessor::new(4, 16, saver, true));
        (TcpAssembler::new(Arc::clone(&pool)), pool)
    }

    // Test 1: SYN decides the client side
    #[test]
    fn test_syn_decides_client() {
        let dir = tempdir().unwrap();
        let (assembler, pool) = assembler(dir.path());

        let syn = tcp_packet(0, [10, 0, 0, 1], 5000, [10, 0, 0, 2], 80, 100, TCP_SYN, b"");
        assembler.process(&syn);
        assert_eq!(assembler.registry.len(), 2);

        let data = tcp_packet(
            1,
            [10, 0, 0, 1],
            5000,
            [10, 0, 0, 2],
            80,
            101,
            TCP_PSH_ACK,
            b"hello",
        );
        assembler.process(&data);

        let readers = assembler.registry.drain();
        let client = readers.iter().find(|r| r.is_client()).unwrap();
        assert_eq!(client.ident(), "10.0.0.1:5000->10.0.0.2:80");
        assert_eq!(client.data(), b"hello");
        pool.shutdown();
    }

    // Test 2: both FINs close the connection and dispatch both readers
    #[test]
    fn test_fin_close_dispatches() {
        let dir = tempdir().unwrap();
        let (assembler, pool) = assembler(dir.path());

        let syn = tcp_packet(0, [10, 0, 0, 1], 5000, [10, 0, 0, 2], 80, 100, TCP_SYN, b"");
        assembler.process(&syn);
        let req = tcp_packet(
            1,
            [10, 0, 0, 1],
            5000,
            [10, 0, 0, 2],
            80,
            101,
            TCP_PSH_ACK,
            b"ping",
        );
        assembler.process(&req);
        let resp = tcp_packet(
            2,
            [10, 0, 0, 2],
            80,
            [10, 0, 0, 1],
            5000,
            500,
            TCP_PSH_ACK,
            b"pong",
        );
        assembler.process(&resp);

        let fin_client = tcp_packet(
            3,
            [10, 0, 0, 1],
            5000,
            [10, 0, 0, 2],
            80,
            105,
            TCP_FIN_ACK,
            b"",
        );
        assembler.process(&fin_client);
        let fin_server = tcp_packet(
            4,
            [10, 0, 0, 2],
            80,
            [10, 0, 0, 1],
            5000,
            504,
            TCP_FIN_ACK,
            b"",
        );
        assembler.process(&fin_server);

        pool.shutdown();

        // Conversation and banner on disk.
        let conv_count = std::fs::read_dir(dir.path().join("conversations"))
            .unwrap()
            .count();
        assert_eq!(conv_count, 2);
        let banner_count = std::fs::read_dir(dir.path().join("banners")).unwrap().count();
        assert_eq!(banner_count, 1);
    }

    // Test 3: the shutdown flush skips already-saved readers
    #[test]
    fn test_flush_skips_saved() {
        let dir = tempdir().unwrap();
        let (assembler, pool) = assembler(dir.path());

        // Connection closed by RST: saved immediately.
        let syn = tcp_packet(0, [10, 0, 0, 1], 5000, [10, 0, 0, 2], 80, 100, TCP_SYN, b"");
        assembler.process(&syn);
        let rst = tcp_packet(1, [10, 0, 0, 1], 5000, [10, 0, 0, 2], 80, 101, TCP_RST, b"");
        assembler.process(&rst);

        // Connection still open at shutdown.
        let syn2 = tcp_packet(2, [10, 0, 0, 3], 6000, [10, 0, 0, 2], 80, 1, TCP_SYN, b"");
        assembler.process(&syn2);
        let data2 = tcp_packet(
            3,
            [10, 0, 0, 3],
            6000,
            [10, 0, 0, 2],
            80,
            2,
            TCP_PSH_ACK,
            b"open",
        );
        assembler.process(&data2);

        assembler.flush();
        pool.shutdown();

        assert_eq!(assembler.open_streams(), 0);
        let conv_count = std::fs::read_dir(dir.path().join("conversations"))
            .unwrap()
            .count();
        // Two closed connections, two raw + two colored conversations.
        assert_eq!(conv_count, 4);
    }
}
