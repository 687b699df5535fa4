//! Audit-record stream writer.
//!
//! One writer per record type. The stream layout is a length-delimited
//! [`Header`] followed by length-delimited record frames; gzip, when
//! enabled, wraps the entire framed stream including the header. `write`
//! is safe for concurrent callers; append order is the order writers
//! acquire the internal lock.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use prost::Message;

use crate::error::AuditError;

use super::{AuditRecord, Header, RecordType};

/// File extension of uncompressed audit streams.
pub const FILE_EXTENSION: &str = "ncap";
/// File extension of gzip-compressed audit streams.
pub const COMPRESSED_FILE_EXTENSION: &str = "ncap.gz";

enum Sink {
    File(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    /// Encoded frames handed to a channel instead of disk. The terminal
    /// drain skips writers of this kind.
    Channel(Sender<Vec<u8>>),
    Closed,
}

struct State {
    sink: Sink,
    bytes_written: u64,
}

/// Typed, append-only audit-record sink.
pub struct AuditWriter {
    record_type: RecordType,
    path: PathBuf,
    is_chan: bool,
    state: Mutex<State>,
}

impl AuditWriter {
    /// Create a file-backed writer in `dir` and emit the stream header.
    ///
    /// The file is named after the record type: `Connection.ncap` or
    /// `Connection.ncap.gz` when `compress` is set.
    pub fn create(
        record_type: RecordType,
        dir: &Path,
        compress: bool,
        input_source: &str,
    ) -> Result<Self, AuditError> {
        let extension = if compress {
            COMPRESSED_FILE_EXTENSION
        } else {
            FILE_EXTENSION
        };
        let path = dir.join(format!("{}.{extension}", record_type.name()));
        let file = BufWriter::new(File::create(&path)?);

        let sink = if compress {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::File(file)
        };

        let writer = Self {
            record_type,
            path,
            is_chan: false,
            state: Mutex::new(State {
                sink,
                bytes_written: 0,
            }),
        };
        writer.write_header(input_source)?;
        Ok(writer)
    }

    /// Create a writer that hands encoded frames to a channel.
    pub fn channel(
        record_type: RecordType,
        sender: Sender<Vec<u8>>,
        input_source: &str,
    ) -> Result<Self, AuditError> {
        let writer = Self {
            record_type,
            path: PathBuf::new(),
            is_chan: true,
            state: Mutex::new(State {
                sink: Sink::Channel(sender),
                bytes_written: 0,
            }),
        };
        writer.write_header(input_source)?;
        Ok(writer)
    }

    fn write_header(&self, input_source: &str) -> Result<(), AuditError> {
        let header = Header {
            record_type: self.record_type as i32,
            created: unix_nanos(),
            input_source: input_source.to_string(),
            version: crate::VERSION.to_string(),
        };
        self.write_frame(header.encode_length_delimited_to_vec())
    }

    /// The record type this stream carries.
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Whether this writer hands frames to a channel instead of a file.
    /// Channel writers are skipped by the connection tracker's terminal
    /// drain.
    pub fn is_chan(&self) -> bool {
        self.is_chan
    }

    /// Append one record. Fails only if the underlying sink fails; callers
    /// treat a failure as fatal.
    pub fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if record.record_type() != self.record_type {
            return Err(AuditError::WrongRecordType {
                writer: self.record_type,
                record: record.record_type(),
            });
        }
        self.write_frame(record.encode_framed())
    }

    fn write_frame(&self, frame: Vec<u8>) -> Result<(), AuditError> {
        let mut state = self.state.lock();
        let len = frame.len() as u64;
        match &mut state.sink {
            Sink::File(file) => file.write_all(&frame)?,
            Sink::Gzip(encoder) => encoder.write_all(&frame)?,
            Sink::Channel(sender) => sender
                .send(frame)
                .map_err(|_| AuditError::ChannelClosed)?,
            Sink::Closed => return Err(AuditError::Closed(self.record_type)),
        }
        state.bytes_written += len;
        Ok(())
    }

    /// Flush buffers and close the sink. Writes no framing footer.
    /// Returns the file path (empty for channel writers) and the number of
    /// frame bytes written.
    pub fn close(&self) -> Result<(PathBuf, u64), AuditError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut state.sink, Sink::Closed) {
            Sink::File(mut file) => file.flush()?,
            Sink::Gzip(encoder) => encoder.finish()?.flush()?,
            Sink::Channel(sender) => drop(sender),
            Sink::Closed => return Err(AuditError::Closed(self.record_type)),
        }
        Ok((self.path.clone(), state.bytes_written))
    }
}

/// Current wall time in nanoseconds since the Unix epoch.
pub(crate) fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditReader, Connection};
    use crossbeam_channel::unbounded;
    use tempfile::tempdir;

    fn sample_connection(uid: &str) -> Connection {
        Connection {
            uid: uid.into(),
            timestamp_first: "100".into(),
            timestamp_last: "200".into(),
            num_packets: 1,
            ..Default::default()
        }
    }

    // Test 1: records round-trip through an uncompressed file
    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let writer =
            AuditWriter::create(RecordType::Connection, dir.path(), false, "test.pcap").unwrap();
        writer
            .write(&sample_connection("a").into())
            .unwrap();
        writer
            .write(&sample_connection("b").into())
            .unwrap();
        let (path, bytes) = writer.close().unwrap();
        assert!(path.ends_with("Connection.ncap"));
        assert!(bytes > 0);

        let mut reader = AuditReader::open(&path, RecordType::Connection).unwrap();
        assert_eq!(reader.header().input_source, "test.pcap");
        let first = reader.next().unwrap().unwrap();
        assert_eq!(first, sample_connection("a").into());
        let second = reader.next().unwrap().unwrap();
        assert_eq!(second, sample_connection("b").into());
        assert!(reader.next().unwrap().is_none());
    }

    // Test 2: gzip wraps the whole stream, header included
    #[test]
    fn test_gzip_roundtrip() {
        let dir = tempdir().unwrap();
        let writer =
            AuditWriter::create(RecordType::Connection, dir.path(), true, "test.pcap").unwrap();
        writer
            .write(&sample_connection("a").into())
            .unwrap();
        let (path, _) = writer.close().unwrap();
        assert!(path.ends_with("Connection.ncap.gz"));

        // The on-disk bytes must start with the gzip magic, not a varint.
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        let mut reader = AuditReader::open(&path, RecordType::Connection).unwrap();
        assert_eq!(
            reader.next().unwrap().unwrap(),
            sample_connection("a").into()
        );
    }

    // Test 3: mismatched record kinds are rejected before encoding
    #[test]
    fn test_wrong_record_type() {
        let dir = tempdir().unwrap();
        let writer =
            AuditWriter::create(RecordType::Tcp, dir.path(), false, "test.pcap").unwrap();
        let err = writer
            .write(&sample_connection("a").into())
            .unwrap_err();
        assert!(matches!(err, AuditError::WrongRecordType { .. }));
        writer.close().unwrap();
    }

    // Test 4: channel writers emit frames and report is_chan
    #[test]
    fn test_channel_writer() {
        let (tx, rx) = unbounded();
        let writer = AuditWriter::channel(RecordType::Connection, tx, "live").unwrap();
        assert!(writer.is_chan());

        writer
            .write(&sample_connection("a").into())
            .unwrap();
        writer.close().unwrap();

        // Header frame plus one record frame.
        let frames: Vec<_> = rx.iter().collect();
        assert_eq!(frames.len(), 2);
    }

    // Test 5: writes after close fail
    #[test]
    fn test_write_after_close() {
        let dir = tempdir().unwrap();
        let writer =
            AuditWriter::create(RecordType::Connection, dir.path(), false, "t").unwrap();
        writer.close().unwrap();
        let err = writer
            .write(&sample_connection("a").into())
            .unwrap_err();
        assert!(matches!(err, AuditError::Closed(RecordType::Connection)));
    }
}
