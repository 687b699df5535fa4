//! End-to-end pipeline test: a synthetic capture file goes in, audit-record
//! streams and stream artifacts come out.

use ncap_core::audit::{AuditReader, AuditRecord, RecordType};
use ncap_core::collector::Collector;
use ncap_core::config::Config;
use ncap_core::pcap::FileSource;

/// Build an Ethernet/IPv4/TCP frame.
#[allow(clippy::too_many_arguments)]
fn tcp_frame(
    src_ip: [u8; 4],
    src_port: u16,
    dst_ip: [u8; 4],
    dst_port: u16,
    seq: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    data.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    data.extend_from_slice(&[0x08, 0x00]);

    let total_len = (20 + 20 + payload.len()) as u16;
    data.push(0x45);
    data.push(0x00);
    data.extend_from_slice(&total_len.to_be_bytes());
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    data.push(64);
    data.push(6);
    data.extend_from_slice(&[0x00, 0x00]);
    data.extend_from_slice(&src_ip);
    data.extend_from_slice(&dst_ip);

    data.extend_from_slice(&src_port.to_be_bytes());
    data.extend_from_slice(&dst_port.to_be_bytes());
    data.extend_from_slice(&seq.to_be_bytes());
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    data.push(0x50);
    data.push(flags);
    data.extend_from_slice(&[0xff, 0xff]);
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    data.extend_from_slice(payload);
    data
}

/// Serialize frames into a legacy PCAP image (microsecond timestamps).
fn legacy_pcap(frames: &[(i64, Vec<u8>)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    data.extend_from_slice(&2u16.to_le_bytes());
    data.extend_from_slice(&4u16.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&65535u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());

    for (nanos, frame) in frames {
        let secs = (nanos / 1_000_000_000) as u32;
        let micros = ((nanos % 1_000_000_000) / 1000) as u32;
        data.extend_from_slice(&secs.to_le_bytes());
        data.extend_from_slice(&micros.to_le_bytes());
        data.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        data.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        data.extend_from_slice(frame);
    }
    data
}

const SYN: u8 = 0x02;
const PSH_ACK: u8 = 0x18;
const FIN_ACK: u8 = 0x11;

#[test]
fn test_capture_to_audit_records() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("session.pcap");
    let out_dir = dir.path().join("out");

    let second = 1_000_000_000i64;
    let client = [192, 168, 0, 10];
    let server = [192, 168, 0, 20];
    let frames = vec![
        (second, tcp_frame(client, 40000, server, 80, 100, SYN, b"")),
        (
            2 * second,
            tcp_frame(client, 40000, server, 80, 101, PSH_ACK, b"GET / HTTP/1.1\r\n\r\n"),
        ),
        (
            3 * second,
            tcp_frame(server, 80, client, 40000, 500, PSH_ACK, b"HTTP/1.1 200 OK\r\n\r\n"),
        ),
        (
            4 * second,
            tcp_frame(client, 40000, server, 80, 119, FIN_ACK, b""),
        ),
        (
            5 * second,
            tcp_frame(server, 80, client, 40000, 519, FIN_ACK, b""),
        ),
    ];
    std::fs::write(&capture, legacy_pcap(&frames)).unwrap();

    let config = Config {
        out_dir: out_dir.clone(),
        input_source: "session.pcap".into(),
        compress: true,
        quiet: true,
        workers: 1, // deterministic packet order
        stream_workers: 8,
        stream_buffer_size: 16,
        conn_flush_interval: 0,
        ..Default::default()
    };
    let collector = Collector::new(config).unwrap();
    let summary = collector.run(FileSource::open(&capture).unwrap()).unwrap();
    assert_eq!(summary.num_packets, 5);
    assert_eq!(summary.decode_errors, 0);

    // One compressed audit file per record type.
    let connection_file = out_dir.join("Connection.ncap.gz");
    assert!(connection_file.exists());
    assert!(out_dir.join("TCP.ncap.gz").exists());

    // The connection record sums both directions.
    let mut reader = AuditReader::open(&connection_file, RecordType::Connection).unwrap();
    assert_eq!(reader.header().input_source, "session.pcap");
    let records = reader.collect_records().unwrap();
    assert_eq!(records.len(), 1);
    let AuditRecord::Connection(conn) = &records[0] else {
        panic!("expected a connection record");
    };
    assert_eq!(conn.num_packets, 5);
    assert_eq!(conn.src_ip, "192.168.0.10");
    assert_eq!(conn.dst_ip, "192.168.0.20");
    assert_eq!(conn.transport_proto, "TCP");
    assert_eq!(conn.duration, 4 * second);

    // TCP records: one per segment.
    let mut reader = AuditReader::open(&out_dir.join("TCP.ncap.gz"), RecordType::Tcp).unwrap();
    assert_eq!(reader.collect_records().unwrap().len(), 5);

    // The closed connection produced a conversation holding both payloads
    // in capture order.
    let conversations = out_dir.join("conversations");
    let raw = std::fs::read_dir(&conversations)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| !p.to_string_lossy().contains("colored"))
        .unwrap();
    let exchange = std::fs::read(raw).unwrap();
    assert_eq!(exchange, b"GET / HTTP/1.1\r\n\r\nHTTP/1.1 200 OK\r\n\r\n".to_vec());

    // And a service banner from the server side.
    let banners: Vec<_> = std::fs::read_dir(out_dir.join("banners"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(banners.len(), 1);
    let banner = std::fs::read(&banners[0]).unwrap();
    assert!(banner.starts_with(b"HTTP/1.1 200 OK"));
}

#[test]
fn test_header_mismatch_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("one.pcap");
    let out_dir = dir.path().join("out");

    let frames = vec![(0, tcp_frame([10, 0, 0, 1], 1, [10, 0, 0, 2], 2, 0, SYN, b""))];
    std::fs::write(&capture, legacy_pcap(&frames)).unwrap();

    let config = Config {
        out_dir: out_dir.clone(),
        input_source: "one.pcap".into(),
        compress: false,
        quiet: true,
        workers: 1,
        stream_workers: 2,
        stream_buffer_size: 4,
        include_decoders: vec!["Connection".into()],
        ..Default::default()
    };
    let collector = Collector::new(config).unwrap();
    collector.run(FileSource::open(&capture).unwrap()).unwrap();

    let err = AuditReader::open(&out_dir.join("Connection.ncap"), RecordType::Udp).unwrap_err();
    assert!(matches!(
        err,
        ncap_core::AuditError::TypeMismatch {
            expected: RecordType::Udp,
            found: RecordType::Connection,
        }
    ));
}
