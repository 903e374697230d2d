pub mod ipv4;
pub mod tcp;
pub mod udp;

pub use ipv4::{decode_ip, IpFields, IpPacket, Protocol};
pub use tcp::{decode_tcp, TcpPacket};
pub use udp::{decode_udp, UdpPacket};

use crate::error::DecodeError;
use std::borrow::Cow;
use std::fmt;
use std::net::Ipv4Addr;

const SEPARATOR_WIDTH: usize = 120;

/// 1つのデータグラムを解析した結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEvent {
    IpOnly(IpPacket),
    Tcp(TcpPacket),
    Udp(UdpPacket),
}

/// まずIP層を解析してプロトコルを判定し、TCP/UDPであれば専用のデコーダーで解析し直す
pub fn decode(data: &[u8]) -> Result<PacketEvent, DecodeError> {
    let packet = decode_ip(data)?;

    match packet.ip.protocol {
        Protocol::Tcp => Ok(PacketEvent::Tcp(decode_tcp(data)?)),
        Protocol::Udp => Ok(PacketEvent::Udp(decode_udp(data)?)),
        Protocol::Icmp | Protocol::Igmp | Protocol::Unknown => Ok(PacketEvent::IpOnly(packet)),
    }
}

impl PacketEvent {
    pub fn ip(&self) -> &IpFields {
        match self {
            PacketEvent::IpOnly(packet) => &packet.ip,
            PacketEvent::Tcp(packet) => &packet.ip,
            PacketEvent::Udp(packet) => &packet.ip,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.ip().protocol
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        self.ip().source
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        self.ip().destination
    }

    pub fn src_port(&self) -> Option<u16> {
        match self {
            PacketEvent::IpOnly(packet) => packet.src_port,
            PacketEvent::Tcp(packet) => Some(packet.src_port),
            PacketEvent::Udp(packet) => Some(packet.src_port),
        }
    }

    pub fn dst_port(&self) -> Option<u16> {
        match self {
            PacketEvent::IpOnly(packet) => packet.dst_port,
            PacketEvent::Tcp(packet) => Some(packet.dst_port),
            PacketEvent::Udp(packet) => Some(packet.dst_port),
        }
    }

    /// TCPペイロードをUTF-8として解釈したもの。TCP以外や空のペイロードではNone
    pub fn tcp_payload_text(&self) -> Option<Cow<'_, str>> {
        match self {
            PacketEvent::Tcp(packet) if !packet.payload.is_empty() => {
                Some(String::from_utf8_lossy(&packet.payload))
            }
            _ => None,
        }
    }
}

fn port_text(port: Option<u16>) -> String {
    port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

fn write_bytes(f: &mut fmt::Formatter<'_>, label: &str, bytes: &[u8]) -> fmt::Result {
    if bytes.is_empty() {
        return Ok(());
    }
    write!(f, "{}:", label)?;
    for b in bytes {
        write!(f, "\\{}", b)?;
    }
    writeln!(f)
}

impl fmt::Display for PacketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = self.ip();
        let separator = "*".repeat(SEPARATOR_WIDTH);

        writeln!(f, "{}", separator)?;
        write!(f, "Protocol Type:{}\tIP Version:{}\t", ip.protocol, ip.version)?;
        write!(f, "Destination Address:{}:{}\t", ip.destination, port_text(self.dst_port()))?;
        write!(f, "Source Address:{}:{}\t", ip.source, port_text(self.src_port()))?;
        write!(f, "Header Length:{}\tMessage Length:{}", ip.header_length, ip.payload_length())?;

        match self {
            PacketEvent::IpOnly(_) => {}
            PacketEvent::Tcp(tcp) => {
                writeln!(f)?;
                write!(
                    f,
                    "TCP Header Length:{}\tTCP Message Length:{}\t",
                    tcp.header_length,
                    tcp.payload_length()
                )?;
                write!(
                    f,
                    "URG:{}\tACK:{}\tPSH:{}\tRST:{}\tSYN:{}\tFIN:{}",
                    tcp.flags.urg, tcp.flags.ack, tcp.flags.psh, tcp.flags.rst, tcp.flags.syn, tcp.flags.fin
                )?;
            }
            PacketEvent::Udp(udp) => {
                write!(
                    f,
                    "\tUDP Header Length:{}\tUDP Message Length:{}",
                    udp.header_length(),
                    udp.payload_length()
                )?;
            }
        }
        writeln!(f)?;

        write_bytes(f, "Header", &ip.header)?;
        match self {
            PacketEvent::IpOnly(packet) => write_bytes(f, "Message", &packet.ip.payload)?,
            PacketEvent::Tcp(tcp) => {
                write_bytes(f, "TCP Header", &tcp.header)?;
                write_bytes(f, "TCP Message", &tcp.payload)?;
            }
            PacketEvent::Udp(udp) => {
                write_bytes(f, "UDP Header", &udp.header)?;
                write_bytes(f, "UDP Message", &udp.payload)?;
            }
        }

        writeln!(f, "{}", separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(protocol: u8, total: usize) -> Vec<u8> {
        let mut data = vec![0u8; total];
        data[0] = 0x45;
        data[9] = protocol;
        data[12..16].copy_from_slice(&[10, 1, 1, 1]);
        data[16..20].copy_from_slice(&[10, 2, 2, 2]);
        if total >= 24 {
            data[20..22].copy_from_slice(&1024u16.to_be_bytes());
            data[22..24].copy_from_slice(&80u16.to_be_bytes());
        }
        if protocol == 6 && total >= 40 {
            data[32] = 0x50;
        }
        data
    }

    #[test]
    fn dispatches_on_protocol() {
        assert!(matches!(decode(&raw(6, 40)).unwrap(), PacketEvent::Tcp(_)));
        assert!(matches!(decode(&raw(17, 28)).unwrap(), PacketEvent::Udp(_)));
        assert!(matches!(decode(&raw(1, 28)).unwrap(), PacketEvent::IpOnly(_)));
        assert!(matches!(decode(&raw(2, 28)).unwrap(), PacketEvent::IpOnly(_)));
        assert!(matches!(decode(&raw(50, 28)).unwrap(), PacketEvent::IpOnly(_)));
    }

    #[test]
    fn accessors_agree_across_variants() {
        for protocol in [6u8, 17, 1] {
            let event = decode(&raw(protocol, 40)).unwrap();
            assert_eq!(event.src_addr(), Ipv4Addr::new(10, 1, 1, 1));
            assert_eq!(event.dst_addr(), Ipv4Addr::new(10, 2, 2, 2));
            assert_eq!(event.src_port(), Some(1024));
            assert_eq!(event.dst_port(), Some(80));
        }
    }

    #[test]
    fn truncated_tcp_is_an_error() {
        assert_eq!(
            decode(&raw(6, 30)),
            Err(DecodeError::TruncatedPacket { needed: 40, actual: 30 })
        );
    }

    #[test]
    fn tcp_payload_text_is_lossy_utf8() {
        let mut data = raw(6, 40);
        data.extend_from_slice(b"hello\xff");
        let event = decode(&data).unwrap();
        assert_eq!(event.tcp_payload_text().as_deref(), Some("hello\u{fffd}"));

        let event = decode(&raw(6, 40)).unwrap();
        assert!(event.tcp_payload_text().is_none());
        let event = decode(&raw(17, 40)).unwrap();
        assert!(event.tcp_payload_text().is_none());
    }

    #[test]
    fn padded_ack_has_no_payload_text() {
        let mut data = raw(6, 40);
        data[2..4].copy_from_slice(&40u16.to_be_bytes());
        data[33] = 0x10;
        data.resize(46, 0);
        let event = decode(&data).unwrap();
        assert!(event.tcp_payload_text().is_none());
        assert!(!event.to_string().contains("TCP Message:"));
    }

    #[test]
    fn report_lists_fields_and_bytes() {
        let mut data = raw(17, 28);
        data.extend_from_slice(&[7, 8]);
        let report = decode(&data).unwrap().to_string();
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines[0], "*".repeat(120));
        assert!(lines[1].starts_with("Protocol Type:UDP\tIP Version:4\t"));
        assert!(lines[1].contains("Destination Address:10.2.2.2:80\t"));
        assert!(lines[1].contains("Source Address:10.1.1.1:1024\t"));
        assert!(lines[1].contains("UDP Header Length:8\tUDP Message Length:2"));
        assert!(lines[2].starts_with("Header:\\69\\0"));
        assert!(lines[3].starts_with("UDP Header:\\4\\0\\0\\80"));
        assert_eq!(lines[4], "UDP Message:\\7\\8");
        assert_eq!(lines[5], "*".repeat(120));
    }

    #[test]
    fn report_shows_tcp_flags() {
        let mut data = raw(6, 40);
        data[33] = 0x12;
        let report = decode(&data).unwrap().to_string();
        assert!(report.contains("URG:false\tACK:true\tPSH:false\tRST:false\tSYN:true\tFIN:false"));
        assert!(!report.contains("TCP Message:"));
    }

    #[test]
    fn report_marks_missing_ports() {
        let report = decode(&raw(1, 20)).unwrap().to_string();
        assert!(report.contains("Destination Address:10.2.2.2:-\t"));
        assert!(!report.contains("Message:\\"));
    }
}
