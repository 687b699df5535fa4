//! TLS ServerHello decoder.
//!
//! Parses TLS handshake records out of TCP payloads, looking for a
//! ServerHello, and emits one record per hit carrying the negotiated
//! parameters, the JA3S fingerprint and the full L2/L3/L4 endpoints.
//! Absent layers leave their fields at zero; a payload that is not a
//! ServerHello is simply skipped.

use smallvec::SmallVec;

use crate::audit::{AuditWriter, TlsServerHello};
use crate::error::AuditError;
use crate::packet::Packet;
use crate::utils::{md5_hex, time_to_string};

use super::{DecoderCore, PacketDecoder};

/// TLS record types.
mod record_type {
    pub const HANDSHAKE: u8 = 22;
}

/// TLS handshake message types.
mod handshake_type {
    pub const SERVER_HELLO: u8 = 2;
}

/// TLS extension types carried into the record.
mod extension {
    pub const STATUS_REQUEST: u16 = 5;
    pub const ALPN: u16 = 16;
    pub const SCT: u16 = 18;
    pub const EXTENDED_MASTER_SECRET: u16 = 23;
    pub const SESSION_TICKET: u16 = 35;
    pub const PRE_SHARED_KEY: u16 = 41;
    pub const SUPPORTED_VERSIONS: u16 = 43;
    pub const COOKIE: u16 = 44;
    pub const KEY_SHARE: u16 = 51;
    pub const NEXT_PROTO_NEG: u16 = 13172;
    pub const RENEGOTIATION_INFO: u16 = 65281;
}

/// A parsed ServerHello message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerHello {
    pub version: u16,
    pub random: Vec<u8>,
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
    /// Extension types in wire order; fingerprinting depends on it.
    pub extensions: SmallVec<[u16; 16]>,
    pub next_proto_neg: bool,
    pub next_protos: Vec<String>,
    pub ocsp_stapling: bool,
    pub ticket_supported: bool,
    pub secure_renegotiation_supported: bool,
    pub secure_renegotiation: Vec<u8>,
    pub alpn_protocol: String,
    pub ems: bool,
    pub scts: bool,
    pub supported_version: u16,
    pub selected_identity_present: bool,
    pub selected_identity: u16,
    pub cookie: Vec<u8>,
    pub selected_group: u16,
}

/// JA3S: MD5 over `version,cipher,ext1-ext2-…` with extensions in wire
/// order.
pub fn ja3s_digest(hello: &ServerHello) -> String {
    let extensions = hello
        .extensions
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("-");
    let canonical = format!("{},{},{extensions}", hello.version, hello.cipher_suite);
    md5_hex(canonical.as_bytes())
}

/// Scan a TCP payload for a handshake record containing a ServerHello.
pub fn parse_server_hello(payload: &[u8]) -> Option<ServerHello> {
    let mut rest = payload;
    while rest.len() >= 5 {
        let content_type = rest[0];
        let record_len = u16::from_be_bytes([rest[3], rest[4]]) as usize;
        let record = rest.get(5..5 + record_len)?;

        if content_type == record_type::HANDSHAKE {
            if let Some(hello) = parse_handshake(record) {
                return Some(hello);
            }
        }
        rest = &rest[5 + record_len..];
    }
    None
}

fn parse_handshake(mut record: &[u8]) -> Option<ServerHello> {
    while record.len() >= 4 {
        let msg_type = record[0];
        let msg_len =
            ((record[1] as usize) << 16) | ((record[2] as usize) << 8) | (record[3] as usize);
        let body = record.get(4..4 + msg_len)?;

        if msg_type == handshake_type::SERVER_HELLO {
            return parse_server_hello_body(body);
        }
        record = &record[4 + msg_len..];
    }
    None
}

fn parse_server_hello_body(body: &[u8]) -> Option<ServerHello> {
    if body.len() < 38 {
        return None;
    }
    let mut hello = ServerHello {
        version: u16::from_be_bytes([body[0], body[1]]),
        random: body[2..34].to_vec(),
        ..Default::default()
    };

    let mut offset = 34;
    let session_id_len = *body.get(offset)? as usize;
    hello.session_id = body.get(offset + 1..offset + 1 + session_id_len)?.to_vec();
    offset += 1 + session_id_len;

    let cipher = body.get(offset..offset + 2)?;
    hello.cipher_suite = u16::from_be_bytes([cipher[0], cipher[1]]);
    hello.compression_method = *body.get(offset + 2)?;
    offset += 3;

    // Extensions are optional; a hello may end here.
    let Some(ext_len_bytes) = body.get(offset..offset + 2) else {
        return Some(hello);
    };
    let extensions_len = u16::from_be_bytes([ext_len_bytes[0], ext_len_bytes[1]]) as usize;
    offset += 2;
    let mut extensions = body.get(offset..offset + extensions_len)?;

    while extensions.len() >= 4 {
        let ext_type = u16::from_be_bytes([extensions[0], extensions[1]]);
        let ext_len = u16::from_be_bytes([extensions[2], extensions[3]]) as usize;
        let data = extensions.get(4..4 + ext_len)?;

        hello.extensions.push(ext_type);
        parse_extension(&mut hello, ext_type, data);

        extensions = &extensions[4 + ext_len..];
    }

    Some(hello)
}

fn parse_extension(hello: &mut ServerHello, ext_type: u16, data: &[u8]) {
    match ext_type {
        extension::STATUS_REQUEST => hello.ocsp_stapling = true,
        extension::SESSION_TICKET => hello.ticket_supported = true,
        extension::EXTENDED_MASTER_SECRET => hello.ems = true,
        extension::SCT => hello.scts = true,
        extension::RENEGOTIATION_INFO => {
            hello.secure_renegotiation_supported = true;
            if let Some(&len) = data.first() {
                if let Some(body) = data.get(1..1 + len as usize) {
                    hello.secure_renegotiation = body.to_vec();
                }
            }
        }
        extension::ALPN => {
            // list length (2), then one length-prefixed protocol name.
            if data.len() >= 3 {
                let name_len = data[2] as usize;
                if let Some(name) = data.get(3..3 + name_len) {
                    hello.alpn_protocol = String::from_utf8_lossy(name).into_owned();
                }
            }
        }
        extension::NEXT_PROTO_NEG => {
            hello.next_proto_neg = true;
            let mut rest = data;
            while let Some(&len) = rest.first() {
                let Some(name) = rest.get(1..1 + len as usize) else {
                    break;
                };
                hello
                    .next_protos
                    .push(String::from_utf8_lossy(name).into_owned());
                rest = &rest[1 + len as usize..];
            }
        }
        extension::SUPPORTED_VERSIONS => {
            if data.len() >= 2 {
                hello.supported_version = u16::from_be_bytes([data[0], data[1]]);
            }
        }
        extension::PRE_SHARED_KEY => {
            if data.len() >= 2 {
                hello.selected_identity_present = true;
                hello.selected_identity = u16::from_be_bytes([data[0], data[1]]);
            }
        }
        extension::COOKIE => {
            if data.len() >= 2 {
                let len = u16::from_be_bytes([data[0], data[1]]) as usize;
                if let Some(body) = data.get(2..2 + len) {
                    hello.cookie = body.to_vec();
                }
            }
        }
        extension::KEY_SHARE => {
            if data.len() >= 2 {
                hello.selected_group = u16::from_be_bytes([data[0], data[1]]);
            }
        }
        _ => {}
    }
}

/// Emits one record per observed TLS ServerHello.
pub struct TlsServerHelloDecoder {
    core: DecoderCore,
}

impl TlsServerHelloDecoder {
    pub fn new(writer: AuditWriter, export: bool) -> Self {
        Self {
            core: DecoderCore::new(
                "TLSServerHello",
                "A TLS ServerHello message with its JA3S fingerprint",
                writer,
                export,
            ),
        }
    }
}

impl PacketDecoder for TlsServerHelloDecoder {
    fn core(&self) -> &DecoderCore {
        &self.core
    }

    fn handle(&self, packet: &Packet) -> Result<(), AuditError> {
        let layers = packet.parse();
        let Some(app) = layers.application else {
            return Ok(());
        };
        let Some(hello) = parse_server_hello(app.payload) else {
            // A payload that opens like a handshake record but does not
            // parse is a decode failure, not merely foreign traffic.
            if app.payload.first() == Some(&record_type::HANDSHAKE)
                && app.payload.get(1) == Some(&3)
            {
                self.core.record_error();
            }
            return Ok(());
        };

        let mut record = TlsServerHello {
            timestamp: time_to_string(packet.timestamp),
            version: hello.version as i32,
            random: hello.random.clone(),
            session_id: hello.session_id.clone(),
            cipher_suite: hello.cipher_suite as i32,
            compression_method: hello.compression_method as i32,
            next_proto_neg: hello.next_proto_neg,
            next_protos: hello.next_protos.clone(),
            ocsp_stapling: hello.ocsp_stapling,
            ticket_supported: hello.ticket_supported,
            secure_renegotiation_supported: hello.secure_renegotiation_supported,
            secure_renegotiation: hello.secure_renegotiation.clone(),
            alpn_protocol: hello.alpn_protocol.clone(),
            ems: hello.ems,
            scts: hello.scts,
            supported_version: hello.supported_version as i32,
            selected_identity_present: hello.selected_identity_present,
            selected_identity: hello.selected_identity as i32,
            cookie: hello.cookie.clone(),
            selected_group: hello.selected_group as i32,
            ja3s: ja3s_digest(&hello),
            extensions: hello.extensions.iter().map(|e| *e as i32).collect(),
            ..Default::default()
        };

        if let Some(link) = layers.link {
            let flow = link.flow();
            record.src_mac = flow.src().to_string();
            record.dst_mac = flow.dst().to_string();
        }
        if let Some(network) = layers.network {
            record.src_ip = network.src.to_string();
            record.dst_ip = network.dst.to_string();
        }
        if let Some(transport) = layers.transport {
            record.src_port = transport.src_port as i32;
            record.dst_port = transport.dst_port as i32;
        }

        self.core.write_record(&record.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditRecord, RecordType};
    use crate::packet::test_utils::*;
    use tempfile::tempdir;

    /// Build a handshake record holding a ServerHello: TLS 1.2,
    /// cipher 0xc02f, renegotiation_info + ALPN h2 + session_ticket.
    fn sample_server_hello() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // TLS 1.2
        body.extend_from_slice(&[0xab; 32]); // random
        body.push(4); // session id
        body.extend_from_slice(&[1, 2, 3, 4]);
        body.extend_from_slice(&[0xc0, 0x2f]); // cipher
        body.push(0); // compression

        let mut exts = Vec::new();
        // renegotiation_info, empty renegotiated_connection
        exts.extend_from_slice(&[0xff, 0x01, 0x00, 0x01, 0x00]);
        // ALPN: h2
        exts.extend_from_slice(&[0x00, 0x10, 0x00, 0x05, 0x00, 0x03, 0x02]);
        exts.extend_from_slice(b"h2");
        // session_ticket, empty
        exts.extend_from_slice(&[0x00, 0x23, 0x00, 0x00]);
        body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
        body.extend_from_slice(&exts);

        let mut handshake = vec![2, 0, 0, 0]; // server_hello, len patched below
        handshake[1..4].copy_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![22, 0x03, 0x03];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    // Test 1: field extraction from a synthetic hello
    #[test]
    fn test_parse_server_hello() {
        let payload = sample_server_hello();
        let hello = parse_server_hello(&payload).unwrap();

        assert_eq!(hello.version, 0x0303);
        assert_eq!(hello.cipher_suite, 0xc02f);
        assert_eq!(hello.session_id, vec![1, 2, 3, 4]);
        assert_eq!(hello.extensions.as_slice(), &[65281, 16, 35]);
        assert!(hello.secure_renegotiation_supported);
        assert!(hello.ticket_supported);
        assert_eq!(hello.alpn_protocol, "h2");
        assert!(!hello.ocsp_stapling);
    }

    // Test 2: JA3S covers version, cipher and extension order
    #[test]
    fn test_ja3s_digest() {
        let payload = sample_server_hello();
        let hello = parse_server_hello(&payload).unwrap();
        assert_eq!(ja3s_digest(&hello), md5_hex(b"771,49199,65281-16-35"));

        // Extension order matters.
        let mut reordered = hello.clone();
        reordered.extensions = SmallVec::from_slice(&[16, 65281, 35]);
        assert_ne!(ja3s_digest(&reordered), ja3s_digest(&hello));
    }

    // Test 3: non-TLS payloads and client hellos are skipped
    #[test]
    fn test_skips_non_server_hello() {
        assert!(parse_server_hello(b"GET / HTTP/1.1\r\n").is_none());

        // A handshake record holding a ClientHello (type 1).
        let mut record = vec![22, 0x03, 0x03, 0x00, 0x04];
        record.extend_from_slice(&[1, 0, 0, 0]);
        assert!(parse_server_hello(&record).is_none());
    }

    // Test 4: the decoder emits a record with endpoints filled in
    #[test]
    fn test_decoder_emits_record() {
        let dir = tempdir().unwrap();
        let writer =
            AuditWriter::create(RecordType::TlsServerHello, dir.path(), false, "t").unwrap();
        let decoder = TlsServerHelloDecoder::new(writer, false);

        let packet = tcp_packet(
            9,
            [192, 168, 1, 2],
            443,
            [192, 168, 1, 1],
            51000,
            1,
            TCP_PSH_ACK,
            &sample_server_hello(),
        );
        decoder.handle(&packet).unwrap();
        assert_eq!(decoder.core().num_records(), 1);

        let (path, _) = decoder.destroy().unwrap();
        let mut reader =
            crate::audit::AuditReader::open(&path, RecordType::TlsServerHello).unwrap();
        match reader.next().unwrap().unwrap() {
            AuditRecord::TlsServerHello(hello) => {
                assert_eq!(hello.src_ip, "192.168.1.2");
                assert_eq!(hello.src_port, 443);
                assert_eq!(hello.cipher_suite, 0xc02f);
                assert_eq!(hello.ja3s.len(), 32);
                assert_eq!(hello.extensions, vec![65281, 16, 35]);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
