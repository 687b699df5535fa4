//! Per-direction stream readers.
//!
//! A [`StreamReader`] accumulates the reassembled fragments of one
//! direction of a TCP flow and shares a [`Conversation`] with its peer, so
//! the client-side reader can reproduce the full exchange. Readers carry
//! the idempotent `saved` flag the finalizer pool keys on.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use compact_str::CompactString;
use parking_lot::Mutex;

use super::reassembly::{Fragment, StreamBuffer};

/// ANSI colors for the debug conversation dump: client red, server blue.
const COLOR_CLIENT: &[u8] = b"\x1b[31m";
const COLOR_SERVER: &[u8] = b"\x1b[34m";
const COLOR_RESET: &[u8] = b"\x1b[0m";

/// The transport endpoint pair of one stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportEndpoints {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl fmt::Display for TransportEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// One timestamped chunk of the merged bidirectional exchange.
#[derive(Debug, Clone)]
struct ConvFragment {
    timestamp: i64,
    client: bool,
    data: Vec<u8>,
}

/// The merged exchange, shared by both directions of a connection.
#[derive(Default)]
pub struct Conversation {
    fragments: Mutex<Vec<ConvFragment>>,
}

impl Conversation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, timestamp: i64, client: bool, data: Vec<u8>) {
        self.fragments.lock().push(ConvFragment {
            timestamp,
            client,
            data,
        });
    }

    /// Raw bytes of both directions, ordered by capture time (stable for
    /// ties).
    fn raw(&self) -> Vec<u8> {
        let mut fragments = self.fragments.lock().clone();
        fragments.sort_by_key(|f| f.timestamp);
        fragments.into_iter().flat_map(|f| f.data).collect()
    }

    /// Like [`Conversation::raw`] with each chunk wrapped in a per-side
    /// ANSI color.
    fn colored(&self) -> Vec<u8> {
        let mut fragments = self.fragments.lock().clone();
        fragments.sort_by_key(|f| f.timestamp);

        let mut out = Vec::new();
        for fragment in fragments {
            out.extend_from_slice(if fragment.client {
                COLOR_CLIENT
            } else {
                COLOR_SERVER
            });
            out.extend_from_slice(&fragment.data);
            out.extend_from_slice(COLOR_RESET);
        }
        out
    }
}

/// One direction of a reassembled TCP flow.
pub struct StreamReader {
    ident: CompactString,
    is_client: bool,
    saved: AtomicBool,
    first_packet: AtomicI64,
    transport: TransportEndpoints,
    buffer: Mutex<StreamBuffer>,
    fragments: Mutex<Vec<Fragment>>,
    conversation: Arc<Conversation>,
}

impl StreamReader {
    pub fn new(
        is_client: bool,
        transport: TransportEndpoints,
        conversation: Arc<Conversation>,
    ) -> Self {
        Self {
            ident: CompactString::from(transport.to_string()),
            is_client,
            saved: AtomicBool::new(false),
            first_packet: AtomicI64::new(i64::MAX),
            transport,
            buffer: Mutex::new(StreamBuffer::new()),
            fragments: Mutex::new(Vec::new()),
            conversation,
        }
    }

    /// Canonical stream key, `srcIP:srcPort->dstIP:dstPort`.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    /// Whether this reader has already been persisted.
    pub fn saved(&self) -> bool {
        self.saved.load(Ordering::Acquire)
    }

    /// Flip the saved flag; returns true for the caller that won.
    pub fn mark_saved(&self) -> bool {
        !self.saved.swap(true, Ordering::AcqRel)
    }

    /// Timestamp of the first contributing packet, 0 before any data.
    pub fn first_packet(&self) -> i64 {
        match self.first_packet.load(Ordering::Acquire) {
            i64::MAX => 0,
            ts => ts,
        }
    }

    pub fn transport(&self) -> &TransportEndpoints {
        &self.transport
    }

    /// Feed one TCP segment of this direction into reassembly.
    pub fn feed(&self, seq: u32, payload: &[u8], timestamp: i64, syn: bool, fin: bool) {
        self.first_packet.fetch_min(timestamp, Ordering::AcqRel);

        let delivered = {
            let mut buffer = self.buffer.lock();
            if syn {
                buffer.set_initial_seq(seq);
            }
            let delivered = buffer.add_segment(seq, payload, timestamp);
            if fin {
                buffer.mark_fin();
            }
            delivered
        };

        if !delivered.is_empty() {
            let mut fragments = self.fragments.lock();
            for fragment in delivered {
                self.conversation
                    .push(fragment.timestamp, self.is_client, fragment.data.clone());
                fragments.push(fragment);
            }
        }
    }

    /// Stable merge of out-of-order fragments: order by relative sequence
    /// number and drop exact duplicates.
    pub fn sort_and_merge_fragments(&self) {
        let mut fragments = self.fragments.lock();
        if fragments.len() < 2 {
            return;
        }
        // Signed distance from the first fragment keeps the order correct
        // across sequence wraparound and for out-of-band early fragments.
        let base = fragments[0].seq;
        fragments.sort_by_key(|f| f.seq.wrapping_sub(base) as i32);
        fragments.dedup_by(|a, b| a.seq == b.seq && a.data == b.data);
    }

    /// Bytes of this direction, in fragment order.
    pub fn data(&self) -> Vec<u8> {
        self.fragments
            .lock()
            .iter()
            .flat_map(|f| f.data.clone())
            .collect()
    }

    /// The full bidirectional exchange.
    pub fn conversation_raw(&self) -> Vec<u8> {
        self.conversation.raw()
    }

    /// The full exchange with per-side ANSI coloring.
    pub fn conversation_colored(&self) -> Vec<u8> {
        self.conversation.colored()
    }

    /// FIN seen and no reassembly gaps outstanding.
    pub fn is_complete(&self) -> bool {
        self.buffer.lock().is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> TransportEndpoints {
        TransportEndpoints {
            src_ip: "10.0.0.1".parse().unwrap(),
            src_port: 5000,
            dst_ip: "10.0.0.2".parse().unwrap(),
            dst_port: 80,
        }
    }

    fn reversed(e: TransportEndpoints) -> TransportEndpoints {
        TransportEndpoints {
            src_ip: e.dst_ip,
            src_port: e.dst_port,
            dst_ip: e.src_ip,
            dst_port: e.src_port,
        }
    }

    // Test 1: ident format
    #[test]
    fn test_ident() {
        let reader = StreamReader::new(true, endpoints(), Conversation::new());
        assert_eq!(reader.ident(), "10.0.0.1:5000->10.0.0.2:80");
    }

    // Test 2: conversation merges both directions by capture time
    #[test]
    fn test_conversation_merge() {
        let conversation = Conversation::new();
        let client = StreamReader::new(true, endpoints(), Arc::clone(&conversation));
        let server = StreamReader::new(false, reversed(endpoints()), conversation);

        client.feed(100, b"GET /", 10, false, false);
        server.feed(500, b"200 OK", 20, false, false);
        client.feed(105, b" more", 30, false, false);

        assert_eq!(client.conversation_raw(), b"GET /200 OK more");
        let colored = client.conversation_colored();
        assert!(colored.starts_with(b"\x1b[31m"));
        assert!(colored.windows(5).any(|w| w == b"\x1b[34m"));
    }

    // Test 3: saved flag is claimed exactly once
    #[test]
    fn test_mark_saved_once() {
        let reader = StreamReader::new(true, endpoints(), Conversation::new());
        assert!(!reader.saved());
        assert!(reader.mark_saved());
        assert!(reader.saved());
        assert!(!reader.mark_saved());
    }

    // Test 4: first_packet is the minimum over fed segments
    #[test]
    fn test_first_packet() {
        let reader = StreamReader::new(true, endpoints(), Conversation::new());
        assert_eq!(reader.first_packet(), 0);
        reader.feed(100, b"b", 50, false, false);
        reader.feed(101, b"c", 20, false, false);
        assert_eq!(reader.first_packet(), 20);
    }

    // Test 5: sort_and_merge orders out-of-band fragments and drops
    // duplicates
    #[test]
    fn test_sort_and_merge() {
        let reader = StreamReader::new(false, endpoints(), Conversation::new());
        // Mid-stream: first segment sets the inferred start at 200.
        reader.feed(200, b"world", 5, false, false);
        // Earlier segment arrives late, delivered out of band.
        reader.feed(195, b"hello", 6, false, false);
        assert_eq!(reader.data(), b"worldhello");

        reader.sort_and_merge_fragments();
        assert_eq!(reader.data(), b"helloworld");
    }
}
