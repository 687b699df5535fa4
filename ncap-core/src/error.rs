//! Error types for ncap-core.
//!
//! This module provides structured error types for all ncap-core operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`PcapError`] - Errors from capture file reading
//! - [`AuditError`] - Errors from audit-record streams
//!
//! All errors implement `std::error::Error` and can be converted to `anyhow::Error`.

use thiserror::Error;

use crate::audit::RecordType;

/// Main error type for ncap-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading or parsing a capture file
    #[error("PCAP error: {0}")]
    Pcap(#[from] PcapError),

    /// Error on an audit-record stream
    #[error("audit record error: {0}")]
    Audit(#[from] AuditError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to capture file reading.
#[derive(Error, Debug)]
pub enum PcapError {
    /// File not found
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// Invalid PCAP format
    #[error("invalid PCAP format: {reason}")]
    InvalidFormat { reason: String },

    /// Unsupported link type
    #[error("unsupported link type: {link_type}")]
    UnsupportedLinkType { link_type: u16 },
}

/// Errors related to audit-record streams.
///
/// Write failures are treated as fatal by every caller; read failures
/// distinguish the header-mismatch case so tools can fail fast without
/// consuming record bytes.
#[derive(Error, Debug)]
pub enum AuditError {
    /// The file header carries a different record type than requested.
    #[error("audit record type mismatch: file contains {found:?}, expected {expected:?}")]
    TypeMismatch {
        expected: RecordType,
        found: RecordType,
    },

    /// The stream ended in the middle of a length-prefixed frame.
    #[error("unexpected end of stream inside a record frame")]
    UnexpectedEof,

    /// The file header could not be decoded.
    #[error("invalid audit file header: {reason}")]
    InvalidHeader { reason: String },

    /// A record emitted to a writer of a different type.
    #[error("record of type {record:?} written to a {writer:?} stream")]
    WrongRecordType {
        writer: RecordType,
        record: RecordType,
    },

    /// The writer was closed and cannot accept further records.
    #[error("audit writer for {0:?} is closed")]
    Closed(RecordType),

    /// Protobuf decode failure for a record body.
    #[error("record decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The channel sink was disconnected.
    #[error("audit channel sink disconnected")]
    ChannelClosed,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
