//! Capture input.
//!
//! [`PacketSource`] is the iterator surface the collector drives;
//! [`FileSource`] reads PCAP and PCAPNG files, transparently handling
//! gzip-compressed captures.

mod reader;

pub use reader::FileSource;

use crate::error::Result;
use crate::packet::Packet;

/// A source of timestamped packets.
pub trait PacketSource: Send {
    /// The next packet, or `Ok(None)` when the source is exhausted.
    fn next_packet(&mut self) -> Result<Option<Packet>>;
}

/// An in-memory source, used by tests and embedders.
pub struct VecSource {
    packets: std::vec::IntoIter<Packet>,
}

impl VecSource {
    pub fn new(packets: Vec<Packet>) -> Self {
        Self {
            packets: packets.into_iter(),
        }
    }
}

impl PacketSource for VecSource {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        Ok(self.packets.next())
    }
}
