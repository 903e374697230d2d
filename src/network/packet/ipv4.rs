use crate::error::DecodeError;
use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;

// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Version|  IHL  |Type of Service|          Total Length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Identification        |Flags|      Fragment Offset    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Time to Live |    Protocol   |         Header Checksum       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Source Address                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Destination Address                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

/// オプションなしのIPv4ヘッダー長
pub const MIN_HEADER_LENGTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Icmp,
    Igmp,
    Tcp,
    Udp,
    Unknown,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Icmp => "ICMP",
            Protocol::Igmp => "IGMP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Unknown => "UNKNOWN",
        }
    }
}

impl From<u8> for Protocol {
    fn from(code: u8) -> Self {
        match code {
            1 => Protocol::Icmp,
            2 => Protocol::Igmp,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            _ => Protocol::Unknown,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// すべてのパケットに共通するIP層の情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpFields {
    pub protocol: Protocol,
    pub version: u8,
    pub header_length: usize,
    /// データグラム全体の長さ。リンク層のパディングは含まない
    pub total_length: usize,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub header: Bytes,
    pub payload: Bytes,
}

impl IpFields {
    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }

    /// IP層のみを解析する。長さの検証に失敗した場合はエラーを返す
    pub(crate) fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_HEADER_LENGTH {
            return Err(DecodeError::TruncatedPacket {
                needed: MIN_HEADER_LENGTH,
                actual: data.len(),
            });
        }

        let header_length = ((data[0] & 0x0F) as usize) << 2;
        if header_length < MIN_HEADER_LENGTH {
            return Err(DecodeError::InvalidHeaderLength(header_length));
        }
        if data.len() < header_length {
            return Err(DecodeError::TruncatedPacket {
                needed: header_length,
                actual: data.len(),
            });
        }

        let data = &data[..datagram_length(data, header_length)];
        let version = (data[0] & 0xF0) >> 4;
        let source = Ipv4Addr::from(u32::from_be_bytes([data[12], data[13], data[14], data[15]]));
        let destination = Ipv4Addr::from(u32::from_be_bytes([data[16], data[17], data[18], data[19]]));

        // 受信バッファを参照しないようにコピーする
        Ok(Self {
            protocol: Protocol::from(data[9]),
            version,
            header_length,
            total_length: data.len(),
            source,
            destination,
            header: Bytes::copy_from_slice(&data[..header_length]),
            payload: Bytes::copy_from_slice(&data[header_length..]),
        })
    }
}

/// Total Lengthフィールドがヘッダー長以上かつ受信長以下ならその値、それ以外は受信長。
/// 短いイーサネットフレームの末尾パディングをペイロードに含めないためのもの
fn datagram_length(data: &[u8], header_length: usize) -> usize {
    let total = u16::from_be_bytes([data[2], data[3]]) as usize;
    if total >= header_length && total <= data.len() {
        total
    } else {
        data.len()
    }
}

/// TCP/UDP以外のパケット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPacket {
    pub ip: IpFields,
    /// IPヘッダー直後の2ワード。ICMP/IGMPではポートとしての意味を持たない
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

/// `offset` から始まる2つの16ビットワードを読む
pub(crate) fn read_port_pair(data: &[u8], offset: usize) -> Option<(u16, u16)> {
    let words = data.get(offset..offset + 4)?;
    Some((
        u16::from_be_bytes([words[0], words[1]]),
        u16::from_be_bytes([words[2], words[3]]),
    ))
}

pub fn decode_ip(data: &[u8]) -> Result<IpPacket, DecodeError> {
    let ip = IpFields::parse(data)?;
    let ports = read_port_pair(&data[..ip.total_length], ip.header_length);

    Ok(IpPacket {
        src_port: ports.map(|(src, _)| src),
        dst_port: ports.map(|(_, dst)| dst),
        ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(protocol: u8) -> Vec<u8> {
        let mut data = vec![0u8; 24];
        data[0] = 0x45;
        data[9] = protocol;
        data[12..16].copy_from_slice(&[192, 168, 1, 10]);
        data[16..20].copy_from_slice(&[10, 0, 0, 1]);
        data[20..24].copy_from_slice(&[0xC3, 0x50, 0x00, 0x35]);
        data
    }

    #[test]
    fn first_byte_0x45_is_v4_with_20_byte_header() {
        let packet = decode_ip(&header(1)).unwrap();
        assert_eq!(packet.ip.version, 4);
        assert_eq!(packet.ip.header_length, 20);
        assert_eq!(packet.ip.total_length, 24);
        assert_eq!(packet.ip.payload_length(), 4);
        assert_eq!(packet.ip.header_length + packet.ip.payload_length(), packet.ip.total_length);
    }

    #[test]
    fn protocol_codes_are_classified() {
        assert_eq!(Protocol::from(1), Protocol::Icmp);
        assert_eq!(Protocol::from(2), Protocol::Igmp);
        assert_eq!(Protocol::from(6), Protocol::Tcp);
        assert_eq!(Protocol::from(17), Protocol::Udp);
        assert_eq!(Protocol::from(0), Protocol::Unknown);
        assert_eq!(Protocol::from(41), Protocol::Unknown);
        assert_eq!(Protocol::from(255), Protocol::Unknown);
    }

    #[test]
    fn addresses_render_as_dotted_decimal() {
        let packet = decode_ip(&header(17)).unwrap();
        assert_eq!(packet.ip.source.to_string(), "192.168.1.10");
        assert_eq!(packet.ip.destination.to_string(), "10.0.0.1");
    }

    #[test]
    fn ports_are_read_after_header_in_host_order() {
        let packet = decode_ip(&header(1)).unwrap();
        // 0xC350 は符号付きで読むと負になる値
        assert_eq!(packet.src_port, Some(50000));
        assert_eq!(packet.dst_port, Some(53));
    }

    #[test]
    fn ports_are_absent_when_no_bytes_follow_header() {
        let data = header(2);
        let packet = decode_ip(&data[..20]).unwrap();
        assert_eq!(packet.src_port, None);
        assert_eq!(packet.dst_port, None);
        assert!(packet.ip.payload.is_empty());
    }

    #[test]
    fn header_with_options_moves_payload() {
        let mut data = vec![0u8; 28];
        data[0] = 0x46;
        data[9] = 1;
        data[24..28].copy_from_slice(&[0, 7, 0, 9]);
        let packet = decode_ip(&data).unwrap();
        assert_eq!(packet.ip.header_length, 24);
        assert_eq!(packet.ip.header.len(), 24);
        assert_eq!(packet.src_port, Some(7));
        assert_eq!(packet.dst_port, Some(9));
    }

    #[test]
    fn link_layer_padding_is_trimmed_by_total_length() {
        // 最小イーサネットフレームに合わせて46バイトに詰められた24バイトのICMP
        let mut data = header(1);
        data[2..4].copy_from_slice(&24u16.to_be_bytes());
        data.resize(46, 0);
        let packet = decode_ip(&data).unwrap();
        assert_eq!(packet.ip.total_length, 24);
        assert_eq!(packet.ip.payload_length(), 4);
        assert_eq!(packet.src_port, Some(50000));

        // ポートの位置がパディングにしかない場合は読まない
        data[2..4].copy_from_slice(&20u16.to_be_bytes());
        let packet = decode_ip(&data).unwrap();
        assert_eq!(packet.ip.total_length, 20);
        assert!(packet.ip.payload.is_empty());
        assert_eq!(packet.src_port, None);
    }

    #[test]
    fn implausible_total_length_falls_back_to_buffer_length() {
        let mut data = header(1);
        // 0 (オフロード時など) もヘッダー長未満として無視する
        for total in [0u16, 19, 25, 1500] {
            data[2..4].copy_from_slice(&total.to_be_bytes());
            assert_eq!(decode_ip(&data).unwrap().ip.total_length, 24);
        }
    }

    #[test]
    fn short_buffer_is_truncated() {
        assert_eq!(
            decode_ip(&[0x45; 10]),
            Err(DecodeError::TruncatedPacket { needed: 20, actual: 10 })
        );
    }

    #[test]
    fn header_length_below_minimum_is_rejected() {
        let mut data = header(6);
        data[0] = 0x44;
        assert_eq!(decode_ip(&data), Err(DecodeError::InvalidHeaderLength(16)));
    }

    #[test]
    fn header_longer_than_buffer_is_truncated() {
        let mut data = header(6);
        data[0] = 0x4F;
        assert_eq!(
            decode_ip(&data),
            Err(DecodeError::TruncatedPacket { needed: 60, actual: 24 })
        );
    }
}
