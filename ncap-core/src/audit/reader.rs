//! Audit-record stream reader.
//!
//! Opens `.ncap` / `.ncap.gz` files, verifies the header type before any
//! record is decoded, and iterates length-delimited record frames. A stream
//! ending inside a frame surfaces [`AuditError::UnexpectedEof`].

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use prost::Message;

use crate::error::AuditError;

use super::{AuditRecord, Header, RecordType};

/// Reader over a single typed audit-record stream.
pub struct AuditReader {
    input: Box<dyn Read + Send>,
    header: Header,
    record_type: RecordType,
}

impl std::fmt::Debug for AuditReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditReader")
            .field("header", &self.header)
            .field("record_type", &self.record_type)
            .finish()
    }
}

impl AuditReader {
    /// Open a stream and verify it carries `expected` records.
    ///
    /// Compression is sniffed from the gzip magic bytes, independent of the
    /// file extension. A type mismatch fails fast without consuming any
    /// record bytes.
    pub fn open(path: &Path, expected: RecordType) -> Result<Self, AuditError> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 2];
        let n = file.read(&mut magic)?;
        drop(file);
        let gzip = n == 2 && magic == [0x1f, 0x8b];

        let file = File::open(path)?;
        let input: Box<dyn Read + Send> = if gzip {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Self::from_reader(input, expected)
    }

    /// Read the header from an arbitrary source (e.g. a channel-fed
    /// buffer in tests) and verify the record type.
    pub fn from_reader(
        mut input: Box<dyn Read + Send>,
        expected: RecordType,
    ) -> Result<Self, AuditError> {
        let frame = match read_frame(&mut input)? {
            Some(frame) => frame,
            None => {
                return Err(AuditError::InvalidHeader {
                    reason: "empty stream".into(),
                })
            }
        };
        let header = Header::decode(frame.as_slice()).map_err(|e| AuditError::InvalidHeader {
            reason: e.to_string(),
        })?;

        let found = RecordType::try_from(header.record_type).unwrap_or(RecordType::Unknown);
        if found != expected {
            return Err(AuditError::TypeMismatch { expected, found });
        }

        Ok(Self {
            input,
            header,
            record_type: expected,
        })
    }

    /// The stream header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Read the next record. `Ok(None)` at a clean end of stream.
    pub fn next(&mut self) -> Result<Option<AuditRecord>, AuditError> {
        match read_frame(&mut self.input)? {
            Some(frame) => Ok(Some(AuditRecord::decode(self.record_type, &frame)?)),
            None => Ok(None),
        }
    }

    /// Read all remaining records.
    pub fn collect_records(&mut self) -> Result<Vec<AuditRecord>, AuditError> {
        let mut records = Vec::new();
        while let Some(record) = self.next()? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Read one varint-length-prefixed frame. `Ok(None)` only at a clean EOF
/// before the first length byte; EOF anywhere else is an error.
fn read_frame(input: &mut (dyn Read + Send)) -> Result<Option<Vec<u8>>, AuditError> {
    let len = match read_varint(input)? {
        Some(len) => len as usize,
        None => return Ok(None),
    };

    let mut frame = vec![0u8; len];
    input
        .read_exact(&mut frame)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => AuditError::UnexpectedEof,
            _ => AuditError::Io(e),
        })?;
    Ok(Some(frame))
}

fn read_varint(input: &mut (dyn Read + Send)) -> Result<Option<u64>, AuditError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut byte = [0u8; 1];

    loop {
        let n = input.read(&mut byte)?;
        if n == 0 {
            if shift == 0 {
                return Ok(None); // clean EOF between frames
            }
            return Err(AuditError::UnexpectedEof);
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
        if shift >= 64 {
            return Err(AuditError::InvalidHeader {
                reason: "varint overflow in frame length".into(),
            });
        }
    }
}
