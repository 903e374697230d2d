use crate::error::DecodeError;
use crate::network::packet::ipv4::IpFields;
use bytes::Bytes;

// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Source Port          |       Destination Port        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Sequence Number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Acknowledgment Number                      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Data |           |U|A|P|R|S|F|                               |
// | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
// |       |           |G|K|H|T|N|N|                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Checksum            |         Urgent Pointer        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

pub const MIN_HEADER_LENGTH: usize = 20;

pub const TCP_URG: u8 = 0x20;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_RST: u8 = 0x04;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_FIN: u8 = 0x01;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

impl From<u8> for TcpFlags {
    fn from(bits: u8) -> Self {
        Self {
            urg: bits & TCP_URG != 0,
            ack: bits & TCP_ACK != 0,
            psh: bits & TCP_PSH != 0,
            rst: bits & TCP_RST != 0,
            syn: bits & TCP_SYN != 0,
            fin: bits & TCP_FIN != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpPacket {
    pub ip: IpFields,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub header_length: usize,
    pub flags: TcpFlags,
    pub window: u16,
    pub header: Bytes,
    pub payload: Bytes,
}

impl TcpPacket {
    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }
}

/// IPヘッダーとTCPヘッダーを解析する。
/// TCPのフィールドはIPヘッダー長からの相対位置で読む (20バイトのIPヘッダーなら 24/28/32/33/34)
pub fn decode_tcp(data: &[u8]) -> Result<TcpPacket, DecodeError> {
    let ip = IpFields::parse(data)?;
    let data = &data[..ip.total_length];
    let base = ip.header_length;

    if data.len() < base + MIN_HEADER_LENGTH {
        return Err(DecodeError::TruncatedPacket {
            needed: base + MIN_HEADER_LENGTH,
            actual: data.len(),
        });
    }
    let tcp = &data[base..];

    let header_length = ((tcp[12] & 0xF0) >> 2) as usize;
    if header_length < MIN_HEADER_LENGTH {
        return Err(DecodeError::InvalidTcpHeaderLength(header_length));
    }
    if tcp.len() < header_length {
        return Err(DecodeError::TruncatedPacket {
            needed: base + header_length,
            actual: data.len(),
        });
    }

    Ok(TcpPacket {
        src_port: u16::from_be_bytes([tcp[0], tcp[1]]),
        dst_port: u16::from_be_bytes([tcp[2], tcp[3]]),
        seq_num: u32::from_be_bytes([tcp[4], tcp[5], tcp[6], tcp[7]]),
        ack_num: u32::from_be_bytes([tcp[8], tcp[9], tcp[10], tcp[11]]),
        header_length,
        flags: TcpFlags::from(tcp[13]),
        window: u16::from_be_bytes([tcp[14], tcp[15]]),
        header: Bytes::copy_from_slice(&tcp[..header_length]),
        payload: Bytes::copy_from_slice(&tcp[header_length..]),
        ip,
    })
}
