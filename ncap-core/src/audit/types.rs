//! Audit record message types.
//!
//! Every record kind is a hand-derived [`prost::Message`] struct; the wire
//! layout is therefore plain protobuf and stays readable by any protobuf
//! tooling given the matching schema. [`AuditRecord`] wraps them in a single
//! enum so the writer and reader can dispatch statically.

use prost::Message;

/// Identifies the record kind a stream carries. Stored in the file header
/// and checked by readers before any record is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum RecordType {
    Unknown = 0,
    Connection = 1,
    TlsServerHello = 2,
    Ethernet = 3,
    Ipv4 = 4,
    Tcp = 5,
    Udp = 6,
}

impl RecordType {
    /// Stable name, used for audit file names and decoder identifiers.
    pub fn name(&self) -> &'static str {
        match self {
            RecordType::Unknown => "Unknown",
            RecordType::Connection => "Connection",
            RecordType::TlsServerHello => "TLSServerHello",
            RecordType::Ethernet => "Ethernet",
            RecordType::Ipv4 => "IPv4",
            RecordType::Tcp => "TCP",
            RecordType::Udp => "UDP",
        }
    }

    /// Inverse of [`RecordType::name`], case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let all = [
            RecordType::Connection,
            RecordType::TlsServerHello,
            RecordType::Ethernet,
            RecordType::Ipv4,
            RecordType::Tcp,
            RecordType::Udp,
        ];
        all.into_iter().find(|t| t.name().eq_ignore_ascii_case(name))
    }
}

/// File header preceding the record frames.
#[derive(Clone, PartialEq, Message)]
pub struct Header {
    #[prost(enumeration = "RecordType", tag = "1")]
    pub record_type: i32,
    /// Creation time, nanoseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub created: i64,
    /// Capture file or interface the records were derived from.
    #[prost(string, tag = "3")]
    pub input_source: String,
    /// Schema version of the producing build.
    #[prost(string, tag = "4")]
    pub version: String,
}

/// A bidirectional connection summary.
///
/// Timestamps are nanosecond-precision wall time serialized as decimal
/// strings; `duration` is their difference in nanoseconds.
#[derive(Clone, PartialEq, Message)]
pub struct Connection {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub timestamp_first: String,
    #[prost(string, tag = "3")]
    pub timestamp_last: String,
    #[prost(string, tag = "4")]
    pub link_proto: String,
    #[prost(string, tag = "5")]
    pub network_proto: String,
    #[prost(string, tag = "6")]
    pub transport_proto: String,
    #[prost(string, tag = "7")]
    pub application_proto: String,
    #[prost(string, tag = "8")]
    pub src_mac: String,
    #[prost(string, tag = "9")]
    pub dst_mac: String,
    #[prost(string, tag = "10")]
    pub src_ip: String,
    #[prost(string, tag = "11")]
    pub dst_ip: String,
    #[prost(string, tag = "12")]
    pub src_port: String,
    #[prost(string, tag = "13")]
    pub dst_port: String,
    #[prost(int32, tag = "14")]
    pub total_size: i32,
    #[prost(int32, tag = "15")]
    pub app_payload_size: i32,
    #[prost(int32, tag = "16")]
    pub num_packets: i32,
    #[prost(int64, tag = "17")]
    pub duration: i64,
}

impl Connection {
    /// Canonical string the UID digest is computed over at insert time.
    /// The UID must never be recomputed afterwards: a later direction
    /// rewrite would change this string.
    pub fn canonical_string(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.timestamp_first,
            self.link_proto,
            self.network_proto,
            self.transport_proto,
            self.src_mac,
            self.dst_mac,
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
        )
    }
}

/// A parsed TLS ServerHello with its JA3S fingerprint.
#[derive(Clone, PartialEq, Message)]
pub struct TlsServerHello {
    #[prost(string, tag = "1")]
    pub timestamp: String,
    #[prost(int32, tag = "2")]
    pub version: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub random: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub session_id: Vec<u8>,
    #[prost(int32, tag = "5")]
    pub cipher_suite: i32,
    #[prost(int32, tag = "6")]
    pub compression_method: i32,
    #[prost(bool, tag = "7")]
    pub next_proto_neg: bool,
    #[prost(string, repeated, tag = "8")]
    pub next_protos: Vec<String>,
    #[prost(bool, tag = "9")]
    pub ocsp_stapling: bool,
    #[prost(bool, tag = "10")]
    pub ticket_supported: bool,
    #[prost(bool, tag = "11")]
    pub secure_renegotiation_supported: bool,
    #[prost(bytes = "vec", tag = "12")]
    pub secure_renegotiation: Vec<u8>,
    #[prost(string, tag = "13")]
    pub alpn_protocol: String,
    #[prost(bool, tag = "14")]
    pub ems: bool,
    #[prost(bool, tag = "15")]
    pub scts: bool,
    #[prost(int32, tag = "16")]
    pub supported_version: i32,
    #[prost(bool, tag = "17")]
    pub selected_identity_present: bool,
    #[prost(int32, tag = "18")]
    pub selected_identity: i32,
    #[prost(bytes = "vec", tag = "19")]
    pub cookie: Vec<u8>,
    #[prost(int32, tag = "20")]
    pub selected_group: i32,
    #[prost(string, tag = "21")]
    pub ja3s: String,
    #[prost(string, tag = "22")]
    pub src_ip: String,
    #[prost(string, tag = "23")]
    pub dst_ip: String,
    #[prost(string, tag = "24")]
    pub src_mac: String,
    #[prost(string, tag = "25")]
    pub dst_mac: String,
    #[prost(int32, tag = "26")]
    pub src_port: i32,
    #[prost(int32, tag = "27")]
    pub dst_port: i32,
    #[prost(int32, repeated, tag = "28")]
    pub extensions: Vec<i32>,
}

/// One Ethernet frame.
#[derive(Clone, PartialEq, Message)]
pub struct Ethernet {
    #[prost(string, tag = "1")]
    pub timestamp: String,
    #[prost(string, tag = "2")]
    pub src_mac: String,
    #[prost(string, tag = "3")]
    pub dst_mac: String,
    #[prost(int32, tag = "4")]
    pub ether_type: i32,
    #[prost(int32, tag = "5")]
    pub payload_size: i32,
}

/// One IPv4 datagram.
#[derive(Clone, PartialEq, Message)]
pub struct Ipv4 {
    #[prost(string, tag = "1")]
    pub timestamp: String,
    #[prost(string, tag = "2")]
    pub src_ip: String,
    #[prost(string, tag = "3")]
    pub dst_ip: String,
    #[prost(int32, tag = "4")]
    pub protocol: i32,
    #[prost(int32, tag = "5")]
    pub ttl: i32,
    #[prost(int32, tag = "6")]
    pub payload_size: i32,
}

/// One TCP segment.
#[derive(Clone, PartialEq, Message)]
pub struct Tcp {
    #[prost(string, tag = "1")]
    pub timestamp: String,
    #[prost(int32, tag = "2")]
    pub src_port: i32,
    #[prost(int32, tag = "3")]
    pub dst_port: i32,
    #[prost(uint32, tag = "4")]
    pub seq: u32,
    #[prost(uint32, tag = "5")]
    pub ack: u32,
    #[prost(int32, tag = "6")]
    pub window: i32,
    #[prost(bool, tag = "7")]
    pub syn: bool,
    #[prost(bool, tag = "8")]
    pub ack_flag: bool,
    #[prost(bool, tag = "9")]
    pub fin: bool,
    #[prost(bool, tag = "10")]
    pub rst: bool,
    #[prost(bool, tag = "11")]
    pub psh: bool,
    #[prost(int32, tag = "12")]
    pub payload_size: i32,
}

/// One UDP datagram.
#[derive(Clone, PartialEq, Message)]
pub struct Udp {
    #[prost(string, tag = "1")]
    pub timestamp: String,
    #[prost(int32, tag = "2")]
    pub src_port: i32,
    #[prost(int32, tag = "3")]
    pub dst_port: i32,
    #[prost(int32, tag = "4")]
    pub payload_size: i32,
}

/// A record of any kind, dispatching encode and type queries statically.
#[derive(Clone, Debug, PartialEq)]
pub enum AuditRecord {
    Connection(Connection),
    TlsServerHello(TlsServerHello),
    Ethernet(Ethernet),
    Ipv4(Ipv4),
    Tcp(Tcp),
    Udp(Udp),
}

macro_rules! delegate_record {
    ($self:expr, |$rec:ident| $body:expr) => {
        match $self {
            AuditRecord::Connection($rec) => $body,
            AuditRecord::TlsServerHello($rec) => $body,
            AuditRecord::Ethernet($rec) => $body,
            AuditRecord::Ipv4($rec) => $body,
            AuditRecord::Tcp($rec) => $body,
            AuditRecord::Udp($rec) => $body,
        }
    };
}

impl AuditRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            AuditRecord::Connection(_) => RecordType::Connection,
            AuditRecord::TlsServerHello(_) => RecordType::TlsServerHello,
            AuditRecord::Ethernet(_) => RecordType::Ethernet,
            AuditRecord::Ipv4(_) => RecordType::Ipv4,
            AuditRecord::Tcp(_) => RecordType::Tcp,
            AuditRecord::Udp(_) => RecordType::Udp,
        }
    }

    /// Encode as one stream frame: varint length followed by the record.
    pub fn encode_framed(&self) -> Vec<u8> {
        delegate_record!(self, |rec| rec.encode_length_delimited_to_vec())
    }

    /// Decode a record body of the given type.
    pub fn decode(ty: RecordType, body: &[u8]) -> Result<Self, prost::DecodeError> {
        Ok(match ty {
            RecordType::Connection => AuditRecord::Connection(Connection::decode(body)?),
            RecordType::TlsServerHello => {
                AuditRecord::TlsServerHello(TlsServerHello::decode(body)?)
            }
            RecordType::Ethernet => AuditRecord::Ethernet(Ethernet::decode(body)?),
            RecordType::Ipv4 => AuditRecord::Ipv4(Ipv4::decode(body)?),
            RecordType::Tcp => AuditRecord::Tcp(Tcp::decode(body)?),
            RecordType::Udp => AuditRecord::Udp(Udp::decode(body)?),
            RecordType::Unknown => {
                return Err(prost::DecodeError::new("unknown record type"));
            }
        })
    }
}

impl From<Connection> for AuditRecord {
    fn from(r: Connection) -> Self {
        AuditRecord::Connection(r)
    }
}

impl From<TlsServerHello> for AuditRecord {
    fn from(r: TlsServerHello) -> Self {
        AuditRecord::TlsServerHello(r)
    }
}

impl From<Ethernet> for AuditRecord {
    fn from(r: Ethernet) -> Self {
        AuditRecord::Ethernet(r)
    }
}

impl From<Ipv4> for AuditRecord {
    fn from(r: Ipv4) -> Self {
        AuditRecord::Ipv4(r)
    }
}

impl From<Tcp> for AuditRecord {
    fn from(r: Tcp) -> Self {
        AuditRecord::Tcp(r)
    }
}

impl From<Udp> for AuditRecord {
    fn from(r: Udp) -> Self {
        AuditRecord::Udp(r)
    }
}
