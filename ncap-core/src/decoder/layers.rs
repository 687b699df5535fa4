//! Single-layer record decoders.
//!
//! Each emits one record per packet carrying the matching layer, built from
//! the shared layered view via [`LayerDecoder`].

use crate::audit::{AuditRecord, AuditWriter, Ethernet, Ipv4, Tcp, Udp};
use crate::packet::{Layers, Packet};
use crate::utils::time_to_string;

use etherparse::Ipv4HeaderSlice;

use super::LayerDecoder;

pub fn ethernet_decoder(writer: AuditWriter, export: bool) -> LayerDecoder {
    LayerDecoder::new(
        "Ethernet",
        "An Ethernet II frame",
        writer,
        export,
        handle_ethernet,
    )
}

pub fn ipv4_decoder(writer: AuditWriter, export: bool) -> LayerDecoder {
    LayerDecoder::new("IPv4", "An IPv4 datagram", writer, export, handle_ipv4)
}

pub fn tcp_decoder(writer: AuditWriter, export: bool) -> LayerDecoder {
    LayerDecoder::new("TCP", "A TCP segment", writer, export, handle_tcp)
}

pub fn udp_decoder(writer: AuditWriter, export: bool) -> LayerDecoder {
    LayerDecoder::new("UDP", "A UDP datagram", writer, export, handle_udp)
}

fn handle_ethernet(packet: &Packet, layers: &Layers<'_>) -> Option<AuditRecord> {
    let link = layers.link?;
    let flow = link.flow();
    Some(
        Ethernet {
            timestamp: time_to_string(packet.timestamp),
            src_mac: flow.src().to_string(),
            dst_mac: flow.dst().to_string(),
            ether_type: link.ether_type as i32,
            payload_size: (packet.data.len().saturating_sub(14)) as i32,
        }
        .into(),
    )
}

fn handle_ipv4(packet: &Packet, layers: &Layers<'_>) -> Option<AuditRecord> {
    let network = layers.network?;
    if network.proto() != "IPv4" {
        return None;
    }
    // The layered view keeps only the flow endpoints; re-slice the header
    // for the remaining fields.
    let ip_data = packet.data.get(14..)?;
    let ttl = Ipv4HeaderSlice::from_slice(ip_data).ok()?.ttl();
    Some(
        Ipv4 {
            timestamp: time_to_string(packet.timestamp),
            src_ip: network.src.to_string(),
            dst_ip: network.dst.to_string(),
            protocol: network.protocol as i32,
            ttl: ttl as i32,
            payload_size: layers.app_payload_len() as i32,
        }
        .into(),
    )
}

fn handle_tcp(packet: &Packet, layers: &Layers<'_>) -> Option<AuditRecord> {
    let transport = layers.transport?;
    let tcp = transport.tcp?;
    Some(
        Tcp {
            timestamp: time_to_string(packet.timestamp),
            src_port: transport.src_port as i32,
            dst_port: transport.dst_port as i32,
            seq: tcp.seq,
            ack: tcp.ack,
            window: tcp.window as i32,
            syn: tcp.flags.syn,
            ack_flag: tcp.flags.ack,
            fin: tcp.flags.fin,
            rst: tcp.flags.rst,
            psh: tcp.flags.psh,
            payload_size: layers.app_payload_len() as i32,
        }
        .into(),
    )
}

fn handle_udp(packet: &Packet, layers: &Layers<'_>) -> Option<AuditRecord> {
    let transport = layers.transport?;
    if transport.tcp.is_some() {
        return None;
    }
    Some(
        Udp {
            timestamp: time_to_string(packet.timestamp),
            src_port: transport.src_port as i32,
            dst_port: transport.dst_port as i32,
            payload_size: layers.app_payload_len() as i32,
        }
        .into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordType;
    use crate::decoder::PacketDecoder;
    use crate::packet::test_utils::*;
    use tempfile::tempdir;

    // Test 1: a TCP packet feeds the Ethernet, IPv4 and TCP decoders but
    // not UDP
    #[test]
    fn test_layer_selection() {
        let dir = tempdir().unwrap();
        let packet = tcp_packet(
            7,
            [10, 0, 0, 1],
            5000,
            [10, 0, 0, 2],
            80,
            99,
            TCP_PSH_ACK,
            b"hello",
        );

        let make = |ty| AuditWriter::create(ty, dir.path(), false, "t").unwrap();
        let eth = ethernet_decoder(make(RecordType::Ethernet), false);
        let ip = ipv4_decoder(make(RecordType::Ipv4), false);
        let tcp = tcp_decoder(make(RecordType::Tcp), false);
        let udp = udp_decoder(make(RecordType::Udp), false);

        for decoder in [&eth, &ip, &tcp, &udp] {
            decoder.handle(&packet).unwrap();
        }
        assert_eq!(eth.core().num_records(), 1);
        assert_eq!(ip.core().num_records(), 1);
        assert_eq!(tcp.core().num_records(), 1);
        assert_eq!(udp.core().num_records(), 0);
    }

    // Test 2: TCP record fields match the packet
    #[test]
    fn test_tcp_record_fields() {
        let packet = tcp_packet(
            7,
            [10, 0, 0, 1],
            5000,
            [10, 0, 0, 2],
            80,
            99,
            TCP_PSH_ACK,
            b"hello",
        );
        let layers = packet.parse();
        let record = handle_tcp(&packet, &layers).unwrap();
        match record {
            AuditRecord::Tcp(tcp) => {
                assert_eq!(tcp.timestamp, "7");
                assert_eq!(tcp.src_port, 5000);
                assert_eq!(tcp.seq, 99);
                assert!(tcp.psh && tcp.ack_flag);
                assert_eq!(tcp.payload_size, 5);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
