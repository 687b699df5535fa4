//! Typed audit-record streams.
//!
//! An audit file is a length-delimited [`Header`] followed by
//! length-delimited protobuf record frames, optionally gzip-compressed as a
//! whole. One file per [`RecordType`]; readers refuse files whose header
//! carries a different type than requested.

mod reader;
mod types;
mod writer;

pub use reader::AuditReader;
pub use types::{
    AuditRecord, Connection, Ethernet, Header, Ipv4, RecordType, Tcp, TlsServerHello, Udp,
};
pub use writer::{AuditWriter, COMPRESSED_FILE_EXTENSION, FILE_EXTENSION};
