//! PCAP/PCAPNG file reading.
//!
//! Built on `pcap_parser`'s streaming readers with enum dispatch for the
//! two formats. Compression is sniffed from the gzip magic bytes and
//! handled transparently; legacy captures with the nanosecond magic keep
//! their precision, PCAPNG timestamps are interpreted at the default
//! microsecond resolution.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapReader, PcapBlockOwned, PcapError as ParserError, PcapNGReader};

use crate::error::{Error, PcapError, Result};
use crate::packet::Packet;

use super::PacketSource;

/// Buffer size for the pcap_parser readers.
const BUFFER_SIZE: usize = 262144;

type Input = Box<dyn Read + Send>;

/// Capture file format, from the magic bytes after decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    LegacyMicro,
    LegacyNano,
    PcapNg,
}

impl Format {
    fn detect(magic: &[u8; 4]) -> Result<Self> {
        match magic {
            [0xd4, 0xc3, 0xb2, 0xa1] | [0xa1, 0xb2, 0xc3, 0xd4] => Ok(Format::LegacyMicro),
            [0x4d, 0x3c, 0xb2, 0xa1] | [0xa1, 0xb2, 0x3c, 0x4d] => Ok(Format::LegacyNano),
            [0x0a, 0x0d, 0x0d, 0x0a] => Ok(Format::PcapNg),
            _ => Err(Error::Pcap(PcapError::InvalidFormat {
                reason: format!("unknown capture magic: {magic:02x?}"),
            })),
        }
    }
}

enum ReaderInner {
    Legacy(LegacyPcapReader<Input>),
    Ng(PcapNGReader<Input>),
}

/// File-backed packet source.
pub struct FileSource {
    inner: ReaderInner,
    /// Legacy ts_usec field actually holds nanoseconds.
    nanosecond_precision: bool,
    frame_count: u64,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("nanosecond_precision", &self.nanosecond_precision)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

impl FileSource {
    /// Open a capture file, decompressing gzip transparently.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut file = File::open(path).map_err(|_| {
            Error::Pcap(PcapError::FileNotFound {
                path: path.display().to_string(),
            })
        })?;
        let mut gz_magic = [0u8; 2];
        let n = file.read(&mut gz_magic)?;
        let gzip = n == 2 && gz_magic == [0x1f, 0x8b];
        drop(file);

        // The magic sits behind the compression, so peek through a
        // throwaway decoder, then reopen for the real reader.
        let mut probe = open_input(path, gzip)?;
        let mut magic = [0u8; 4];
        probe.read_exact(&mut magic).map_err(|_| {
            Error::Pcap(PcapError::InvalidFormat {
                reason: "file too short for capture magic".into(),
            })
        })?;
        drop(probe);
        let format = Format::detect(&magic)?;

        let input = open_input(path, gzip)?;
        let inner = match format {
            Format::PcapNg => ReaderInner::Ng(PcapNGReader::new(BUFFER_SIZE, input).map_err(
                |e| {
                    Error::Pcap(PcapError::InvalidFormat {
                        reason: format!("failed to parse PCAPNG: {e:?}"),
                    })
                },
            )?),
            Format::LegacyMicro | Format::LegacyNano => {
                ReaderInner::Legacy(LegacyPcapReader::new(BUFFER_SIZE, input).map_err(|e| {
                    Error::Pcap(PcapError::InvalidFormat {
                        reason: format!("failed to parse PCAP: {e:?}"),
                    })
                })?)
            }
        };

        Ok(Self {
            inner,
            nanosecond_precision: format == Format::LegacyNano,
            frame_count: 0,
        })
    }

    /// Number of packets read so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

fn convert(nanosecond_precision: bool, block: &PcapBlockOwned<'_>) -> Option<Packet> {
    match block {
        PcapBlockOwned::Legacy(packet) => {
            let fraction = packet.ts_usec as i64;
            let nanos = packet.ts_sec as i64 * 1_000_000_000
                + if nanosecond_precision {
                    fraction
                } else {
                    fraction * 1000
                };
            Some(Packet::new(nanos, packet.data.to_vec()))
        }
        PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => {
            // Default PCAPNG resolution: microseconds.
            let ticks = ((packet.ts_high as i64) << 32) | packet.ts_low as i64;
            Some(Packet::new(ticks * 1000, packet.data.to_vec()))
        }
        _ => None,
    }
}

fn open_input(path: &Path, gzip: bool) -> Result<Input> {
    let file = File::open(path)?;
    Ok(if gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

impl PacketSource for FileSource {
    fn next_packet(&mut self) -> Result<Option<Packet>> {
        let nanosecond_precision = self.nanosecond_precision;
        loop {
            let next = match &mut self.inner {
                ReaderInner::Legacy(reader) => reader.next(),
                ReaderInner::Ng(reader) => reader.next(),
            };
            match next {
                Ok((offset, block)) => {
                    let packet = convert(nanosecond_precision, &block);
                    drop(block);
                    match &mut self.inner {
                        ReaderInner::Legacy(reader) => reader.consume(offset),
                        ReaderInner::Ng(reader) => reader.consume(offset),
                    }
                    if let Some(packet) = packet {
                        self.frame_count += 1;
                        return Ok(Some(packet));
                    }
                }
                Err(ParserError::Eof) => return Ok(None),
                Err(ParserError::Incomplete(_)) => {
                    let refill = match &mut self.inner {
                        ReaderInner::Legacy(reader) => reader.refill(),
                        ReaderInner::Ng(reader) => reader.refill(),
                    };
                    refill.map_err(|e| {
                        Error::Pcap(PcapError::InvalidFormat {
                            reason: format!("refill error: {e:?}"),
                        })
                    })?;
                }
                Err(e) => {
                    return Err(Error::Pcap(PcapError::InvalidFormat {
                        reason: format!("capture parse error: {e:?}"),
                    }))
                }
            }
        }
    }
}
