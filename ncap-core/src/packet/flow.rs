//! Flow identity.
//!
//! Every layer of a packet yields a [`Flow`]: the pair of endpoints the
//! layer connects. Flows hash direction-symmetrically, so both halves of a
//! bidirectional exchange land on the same value, and the per-layer hashes
//! combine into the [`FlowId`] the connection tracker keys its map by.

use std::fmt;
use std::hash::Hasher;
use std::net::IpAddr;

use twox_hash::XxHash64;

use super::Layers;

/// Per-layer hash seeds, so identical endpoint bytes on different layers
/// do not collide.
const LINK_SEED: u64 = 0x6c69_6e6b;
const NETWORK_SEED: u64 = 0x6e65_7477;
const TRANSPORT_SEED: u64 = 0x7472_616e;

/// One endpoint of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Mac([u8; 6]),
    Ip(IpAddr),
    Port(u16),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Mac(mac) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
            ),
            Endpoint::Ip(ip) => write!(f, "{ip}"),
            Endpoint::Port(port) => write!(f, "{port}"),
        }
    }
}

impl Endpoint {
    fn feed(&self, hasher: &mut XxHash64) {
        match self {
            Endpoint::Mac(mac) => hasher.write(mac),
            Endpoint::Ip(IpAddr::V4(ip)) => hasher.write(&ip.octets()),
            Endpoint::Ip(IpAddr::V6(ip)) => hasher.write(&ip.octets()),
            Endpoint::Port(port) => hasher.write(&port.to_be_bytes()),
        }
    }
}

/// The endpoint pair of one layer of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    seed: u64,
    src: Endpoint,
    dst: Endpoint,
}

impl Flow {
    pub(crate) fn link(src: [u8; 6], dst: [u8; 6]) -> Self {
        Self {
            seed: LINK_SEED,
            src: Endpoint::Mac(src),
            dst: Endpoint::Mac(dst),
        }
    }

    pub(crate) fn network(src: IpAddr, dst: IpAddr) -> Self {
        Self {
            seed: NETWORK_SEED,
            src: Endpoint::Ip(src),
            dst: Endpoint::Ip(dst),
        }
    }

    pub(crate) fn transport(src: u16, dst: u16) -> Self {
        Self {
            seed: TRANSPORT_SEED,
            src: Endpoint::Port(src),
            dst: Endpoint::Port(dst),
        }
    }

    pub fn src(&self) -> Endpoint {
        self.src
    }

    pub fn dst(&self) -> Endpoint {
        self.dst
    }

    /// Direction-symmetric 64-bit hash: the same value for a flow and its
    /// reverse, so both directions of an exchange share a map entry.
    pub fn fast_hash(&self) -> u64 {
        let a = hash_endpoint(self.seed, &self.src);
        let b = hash_endpoint(self.seed, &self.dst);
        a.wrapping_add(b)
    }
}

fn hash_endpoint(seed: u64, endpoint: &Endpoint) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    endpoint.feed(&mut hasher);
    hasher.finish()
}

/// Identity of a bidirectional connection: the combined link-, network-
/// and transport-layer flow hashes. A missing layer contributes 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlowId {
    pub link: u64,
    pub network: u64,
    pub transport: u64,
}

impl FlowId {
    /// Derive the flow identity from a layered packet view.
    pub fn of(layers: &Layers<'_>) -> Self {
        Self {
            link: layers.link.map(|l| l.flow().fast_hash()).unwrap_or(0),
            network: layers.network.map(|n| n.flow().fast_hash()).unwrap_or(0),
            transport: layers
                .transport
                .map(|t| t.flow().fast_hash())
                .unwrap_or(0),
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.link, self.network, self.transport)
    }
}
