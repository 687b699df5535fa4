//! Layered packet view.
//!
//! A [`Packet`] is raw capture data plus a nanosecond timestamp. Calling
//! [`Packet::parse`] walks the layer chain (Ethernet, optional 802.1Q tag,
//! IPv4/IPv6 with extension headers, TCP/UDP) and returns a [`Layers`] view.
//! Each layer exposes a [`Flow`](flow::Flow) of its endpoint pair, which is
//! what the connection tracker hashes into a [`FlowId`](flow::FlowId).
//!
//! Parsing never fails: a layer that cannot be decoded is simply absent from
//! the view, and downstream consumers treat missing layers as zero
//! contributions.

mod flow;

pub use flow::{Endpoint, Flow, FlowId};

use std::net::IpAddr;

use bytes::Bytes;
use etherparse::{
    Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice, UdpHeaderSlice,
};

/// EtherType values the layer walk understands.
mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
    pub const VLAN: u16 = 0x8100;
}

/// IP protocol numbers the layer walk understands.
mod ip_protocol {
    pub const HOP_BY_HOP: u8 = 0;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const DEST_OPTS: u8 = 60;
}

/// A captured packet: raw bytes and the capture timestamp in nanoseconds
/// since the Unix epoch.
#[derive(Debug, Clone)]
pub struct Packet {
    pub timestamp: i64,
    pub data: Bytes,
}

impl Packet {
    pub fn new(timestamp: i64, data: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            data: data.into(),
        }
    }

    /// Walk the layer chain and return the layered view.
    pub fn parse(&self) -> Layers<'_> {
        parse_layers(&self.data)
    }
}

/// Link layer (Ethernet II).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLayer {
    pub src: [u8; 6],
    pub dst: [u8; 6],
    pub ether_type: u16,
}

impl LinkLayer {
    pub fn proto(&self) -> &'static str {
        "Ethernet"
    }

    pub fn flow(&self) -> Flow {
        Flow::link(self.src, self.dst)
    }
}

/// Network layer (IPv4 or IPv6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkLayer {
    pub src: IpAddr,
    pub dst: IpAddr,
    /// Transport protocol number (after IPv6 extension headers).
    pub protocol: u8,
}

impl NetworkLayer {
    pub fn proto(&self) -> &'static str {
        match self.src {
            IpAddr::V4(_) => "IPv4",
            IpAddr::V6(_) => "IPv6",
        }
    }

    pub fn flow(&self) -> Flow {
        Flow::network(self.src, self.dst)
    }
}

/// TCP flags carried into connection and stream handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
}

/// TCP-specific header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpInfo {
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
}

/// Transport layer (TCP or UDP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLayer {
    pub src_port: u16,
    pub dst_port: u16,
    /// Present for TCP, absent for UDP.
    pub tcp: Option<TcpInfo>,
}

impl TransportLayer {
    pub fn proto(&self) -> &'static str {
        if self.tcp.is_some() {
            "TCP"
        } else {
            "UDP"
        }
    }

    pub fn flow(&self) -> Flow {
        Flow::transport(self.src_port, self.dst_port)
    }
}

/// Application layer: whatever bytes remain after the transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationLayer<'a> {
    pub payload: &'a [u8],
}

impl ApplicationLayer<'_> {
    pub fn proto(&self) -> &'static str {
        "Payload"
    }
}

/// The layered view of one packet. Absent layers are `None`.
#[derive(Debug, Clone, Default)]
pub struct Layers<'a> {
    pub link: Option<LinkLayer>,
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer>,
    pub application: Option<ApplicationLayer<'a>>,
}

impl Layers<'_> {
    /// Length of the application payload, 0 when the layer is absent.
    pub fn app_payload_len(&self) -> usize {
        self.application.map(|a| a.payload.len()).unwrap_or(0)
    }
}

fn parse_layers(data: &[u8]) -> Layers<'_> {
    let mut layers = Layers::default();

    let eth = match Ethernet2HeaderSlice::from_slice(data) {
        Ok(eth) => eth,
        Err(_) => return layers,
    };
    let mut ether_type = eth.ether_type().0;
    let mut rest = &data[eth.slice().len()..];

    // Single 802.1Q tag: skip TCI, take the inner EtherType.
    if ether_type == ethertype::VLAN && rest.len() >= 4 {
        ether_type = u16::from_be_bytes([rest[2], rest[3]]);
        rest = &rest[4..];
    }

    layers.link = Some(LinkLayer {
        src: eth.source(),
        dst: eth.destination(),
        ether_type,
    });

    let (network, payload) = match ether_type {
        ethertype::IPV4 => match parse_ipv4(rest) {
            Some(v) => v,
            None => return layers,
        },
        ethertype::IPV6 => match parse_ipv6(rest) {
            Some(v) => v,
            None => return layers,
        },
        _ => return layers,
    };
    layers.network = Some(network);

    match network.protocol {
        ip_protocol::TCP => {
            if let Ok(tcp) = TcpHeaderSlice::from_slice(payload) {
                layers.transport = Some(TransportLayer {
                    src_port: tcp.source_port(),
                    dst_port: tcp.destination_port(),
                    tcp: Some(TcpInfo {
                        seq: tcp.sequence_number(),
                        ack: tcp.acknowledgment_number(),
                        flags: TcpFlags {
                            syn: tcp.syn(),
                            ack: tcp.ack(),
                            fin: tcp.fin(),
                            rst: tcp.rst(),
                            psh: tcp.psh(),
                        },
                        window: tcp.window_size(),
                    }),
                });
                let app = &payload[tcp.slice().len()..];
                if !app.is_empty() {
                    layers.application = Some(ApplicationLayer { payload: app });
                }
            }
        }
        ip_protocol::UDP => {
            if let Ok(udp) = UdpHeaderSlice::from_slice(payload) {
                layers.transport = Some(TransportLayer {
                    src_port: udp.source_port(),
                    dst_port: udp.destination_port(),
                    tcp: None,
                });
                let app = &payload[8..];
                if !app.is_empty() {
                    layers.application = Some(ApplicationLayer { payload: app });
                }
            }
        }
        _ => {}
    }

    layers
}

fn parse_ipv4(data: &[u8]) -> Option<(NetworkLayer, &[u8])> {
    let ipv4 = Ipv4HeaderSlice::from_slice(data).ok()?;
    let header_len = ipv4.slice().len();
    let total_len = ipv4.total_len() as usize;
    // Clamp to the captured bytes; truncated captures are common.
    let end = total_len.clamp(header_len, data.len());
    Some((
        NetworkLayer {
            src: IpAddr::V4(ipv4.source_addr()),
            dst: IpAddr::V4(ipv4.destination_addr()),
            protocol: ipv4.protocol().0,
        },
        &data[header_len..end],
    ))
}

fn parse_ipv6(data: &[u8]) -> Option<(NetworkLayer, &[u8])> {
    let ipv6 = Ipv6HeaderSlice::from_slice(data).ok()?;
    let mut next = ipv6.next_header().0;
    let mut rest = &data[40..];

    // Skip the common extension headers; each carries its successor in the
    // first byte and its length (in 8-byte units, excluding the first) in
    // the second.
    while matches!(
        next,
        ip_protocol::HOP_BY_HOP
            | ip_protocol::ROUTING
            | ip_protocol::FRAGMENT
            | ip_protocol::DEST_OPTS
    ) {
        if rest.len() < 8 {
            return None;
        }
        let ext_len = if next == ip_protocol::FRAGMENT {
            8
        } else {
            (rest[1] as usize + 1) * 8
        };
        if rest.len() < ext_len {
            return None;
        }
        next = rest[0];
        rest = &rest[ext_len..];
    }

    Some((
        NetworkLayer {
            src: IpAddr::V6(ipv6.source_addr()),
            dst: IpAddr::V6(ipv6.destination_addr()),
            protocol: next,
        },
        rest,
    ))
}
